//! Response chunker: splits LLM text fragments into sentence-bounded
//! synthesis units, forcing emission past a soft character cap so a
//! long unpunctuated run still reaches TTS promptly. Built in the style
//! of the other small stateful stream transformers in this crate
//! (`vad::edge::EdgeDetector`).

use crate::config::ChunkerConfig;
use crate::ids::Generation;

/// One synthesis unit, carrying its index within the turn and the
/// generation at emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisUnit {
    pub index: u32,
    pub text: String,
    pub generation: Generation,
}

const TERMINATORS: [char; 3] = ['.', '?', '!'];

pub struct Chunker {
    soft_cap_chars: usize,
    buffer: String,
    next_index: u32,
}

impl Chunker {
    pub fn new(config: &ChunkerConfig) -> Self {
        Self { soft_cap_chars: config.soft_cap_chars, buffer: String::new(), next_index: 0 }
    }

    /// Feed one LLM text fragment, returning zero or more newly completed
    /// units (in order). Call `flush` at end-of-stream for any tail.
    pub fn push(&mut self, fragment: &str, generation: Generation) -> Vec<SynthesisUnit> {
        self.buffer.push_str(fragment);
        let mut units = Vec::new();

        loop {
            if let Some(cut) = self.find_sentence_boundary() {
                let text: String = self.buffer.drain(..cut).collect();
                units.push(self.emit(text, generation));
                continue;
            }
            if self.buffer.chars().count() > self.soft_cap_chars {
                let cut = self.char_boundary_at(self.soft_cap_chars);
                let text: String = self.buffer.drain(..cut).collect();
                units.push(self.emit(text, generation));
                continue;
            }
            break;
        }
        units
    }

    /// End-of-stream: emit any remaining non-empty tail as a final unit.
    pub fn flush(&mut self, generation: Generation) -> Option<SynthesisUnit> {
        if self.buffer.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.buffer);
        Some(self.emit(text, generation))
    }

    fn emit(&mut self, text: String, generation: Generation) -> SynthesisUnit {
        let unit = SynthesisUnit { index: self.next_index, text, generation };
        self.next_index += 1;
        unit
    }

    /// Byte offset just past the first sentence-terminal punctuation
    /// followed by whitespace (or end of buffer), if one exists.
    fn find_sentence_boundary(&self) -> Option<usize> {
        let bytes = self.buffer.as_bytes();
        for (i, ch) in self.buffer.char_indices() {
            if TERMINATORS.contains(&ch) {
                let after = i + ch.len_utf8();
                if after == bytes.len() {
                    // Terminal punctuation at the very end of what we have
                    // so far — wait for more input (might be "..." etc.)
                    // unless this is genuinely end-of-stream, handled by flush.
                    continue;
                }
                if self.buffer[after..].starts_with(char::is_whitespace) {
                    // include the single trailing whitespace char in the unit
                    let ws_len = self.buffer[after..].chars().next().map(|c| c.len_utf8()).unwrap_or(0);
                    return Some(after + ws_len);
                }
            }
        }
        None
    }

    fn char_boundary_at(&self, char_count: usize) -> usize {
        self.buffer
            .char_indices()
            .nth(char_count)
            .map(|(idx, _)| idx)
            .unwrap_or(self.buffer.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(soft_cap: usize) -> ChunkerConfig {
        ChunkerConfig { soft_cap_chars: soft_cap }
    }

    #[test]
    fn emits_on_sentence_terminal_punctuation() {
        let mut c = Chunker::new(&config(240));
        let units = c.push("It is three. ", Generation(1));
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].text, "It is three. ");
        assert_eq!(units[0].index, 0);
    }

    #[test]
    fn forces_emission_past_soft_cap_without_punctuation() {
        let mut c = Chunker::new(&config(10));
        let units = c.push("0123456789ABCDE", Generation(1));
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].text, "0123456789");
        // remaining "ABCDE" stays buffered
        let tail = c.flush(Generation(1)).unwrap();
        assert_eq!(tail.text, "ABCDE");
        assert_eq!(tail.index, 1);
    }

    #[test]
    fn indices_strictly_increase_across_pushes() {
        let mut c = Chunker::new(&config(240));
        let mut all = c.push("One. Two. ", Generation(1));
        all.extend(c.push("Three.", Generation(1)));
        all.extend(c.flush(Generation(1)));
        let indices: Vec<u32> = all.iter().map(|u| u.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn single_token_without_terminal_punctuation_yields_one_unit_at_eos() {
        let mut c = Chunker::new(&config(240));
        let units = c.push("hello", Generation(1));
        assert!(units.is_empty());
        let tail = c.flush(Generation(1)).unwrap();
        assert_eq!(tail.text, "hello");
    }

    #[test]
    fn exactly_240_chars_forces_unit_and_next_starts_at_241() {
        let mut c = Chunker::new(&config(240));
        let run: String = "a".repeat(241);
        let units = c.push(&run, Generation(1));
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].text.chars().count(), 240);
        let tail = c.flush(Generation(1)).unwrap();
        assert_eq!(tail.text, "a");
    }
}
