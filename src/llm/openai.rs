//! Concrete `LlmProvider` backed by `async-openai`'s streaming chat
//! completions, grounded in `64bit-async-openai`'s `chat-stream` example's
//! `src/main.rs`: build a
//! `CreateChatCompletionRequest`, call `client.chat().create_stream`, and
//! read `delta.content` off each `ChatCompletionResponseStreamMessage`.

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::Mutex;

use super::{DialogMessage, LlmError, LlmProvider, LlmStream, Role};
use crate::cancel::CancelToken;

pub struct OpenAiLlm {
    client: Client<OpenAIConfig>,
}

impl OpenAiLlm {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

impl Default for OpenAiLlm {
    fn default() -> Self {
        Self::new()
    }
}

fn to_request_message(msg: &DialogMessage) -> Result<ChatCompletionRequestMessage, LlmError> {
    let built = match msg.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(msg.content.clone())
            .build()
            .map(Into::into),
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(msg.content.clone())
            .build()
            .map(Into::into),
        Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(msg.content.clone())
            .build()
            .map(Into::into),
    };
    built.map_err(|e| LlmError::Provider(e.to_string()))
}

struct OpenAiLlmStream {
    inner: Mutex<
        std::pin::Pin<
            Box<dyn futures_util::Stream<Item = Result<async_openai::types::CreateChatCompletionStreamResponse, async_openai::error::OpenAIError>> + Send>,
        >,
    >,
    cancel: CancelToken,
    failure: Option<LlmError>,
}

#[async_trait]
impl LlmStream for OpenAiLlmStream {
    async fn next_fragment(&mut self) -> Option<String> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            let mut inner = self.inner.lock().await;
            match inner.next().await {
                Some(Ok(response)) => {
                    let fragment: String = response
                        .choices
                        .iter()
                        .filter_map(|choice| choice.delta.content.clone())
                        .collect();
                    if fragment.is_empty() {
                        continue;
                    }
                    return Some(fragment);
                }
                Some(Err(err)) => {
                    self.failure = Some(LlmError::Provider(err.to_string()));
                    return None;
                }
                None => return None,
            }
        }
    }

    fn partial_failure(&self) -> Option<&LlmError> {
        self.failure.as_ref()
    }
}

#[async_trait]
impl LlmProvider for OpenAiLlm {
    async fn start(
        &self,
        model: &str,
        history: Vec<DialogMessage>,
        cancel: CancelToken,
    ) -> Result<Box<dyn LlmStream>, LlmError> {
        let messages = history
            .iter()
            .map(to_request_message)
            .collect::<Result<Vec<_>, _>>()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(messages)
            .build()
            .map_err(|e| LlmError::Provider(e.to_string()))?;

        let stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| LlmError::Provider(e.to_string()))?;

        Ok(Box::new(OpenAiLlmStream { inner: Mutex::new(Box::pin(stream)), cancel, failure: None }))
    }
}
