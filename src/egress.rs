//! Egress multiplexer (C8). A single writer owns the client transport,
//! fed by a bounded channel, replacing many call sites independently
//! racing a send-like method. Grounded in `ws_audio::handle_socket`'s
//! single `SplitSink` writer loop in `streaming-core`'s WebSocket ingress.

use tokio::sync::{mpsc, watch};

use crate::ids::Generation;
use crate::protocol::{ServerMessage, Tagged};

/// Handle held by the turn controller; `send` queues a message for the
/// single writer task, `bump_generation` establishes the drop-stale-at-
/// head-of-queue boundary used on barge-in.
#[derive(Clone)]
pub struct Egress {
    tx: mpsc::Sender<Tagged<ServerMessage>>,
    current_generation: watch::Sender<Generation>,
}

impl Egress {
    /// Construct a channel pair; the receiver half is driven by
    /// `run_writer` on the transport task.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Tagged<ServerMessage>>, watch::Receiver<Generation>) {
        let (tx, rx) = mpsc::channel(capacity);
        let (gen_tx, gen_rx) = watch::channel(Generation(0));
        (Self { tx, current_generation: gen_tx }, rx, gen_rx)
    }

    pub async fn send(&self, generation: Generation, message: ServerMessage) {
        if self.tx.send(Tagged::new(generation, message)).await.is_err() {
            tracing::debug!("egress receiver dropped, message discarded");
        }
    }

    /// Record a new generation as current; the writer task uses this to
    /// drop any already-queued message whose tagged generation is now
    /// stale: any queued message whose generation is less than the
    /// current one is dropped rather than written to the transport.
    pub fn bump_generation(&self, generation: Generation) {
        let _ = self.current_generation.send(generation);
    }
}

/// Runs on the transport task: the sole consumer of the egress channel,
/// serializing each `Tagged<ServerMessage>` to the client unless its
/// generation has been superseded.
pub async fn run_writer<F, Fut>(
    mut rx: mpsc::Receiver<Tagged<ServerMessage>>,
    mut current_generation: watch::Receiver<Generation>,
    mut write: F,
) where
    F: FnMut(ServerMessage) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    while let Some(tagged) = rx.recv().await {
        let current = *current_generation.borrow_and_update();
        if tagged.generation < current {
            tracing::debug!(stale = %tagged.generation, current = %current, "dropping stale egress message");
            continue;
        }
        write(tagged.payload).await;
    }
}
