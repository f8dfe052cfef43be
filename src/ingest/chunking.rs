//! Sliding-window chunking.

const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', '\n'];
const TRAILING_SEARCH_WINDOW: usize = 100;

#[derive(Debug, Clone, Copy)]
pub struct ChunkingPolicy {
    pub max_chars: usize,
    pub overlap: usize,
}

impl Default for ChunkingPolicy {
    fn default() -> Self {
        Self {
            max_chars: 1200,
            overlap: 150,
        }
    }
}

/// One windowed slice of `text`, with its character offsets into the
/// original.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Splits `text` into overlapping windows, breaking on the nearest
/// sentence terminator within the trailing 100 characters of each window
/// when one exists, so chunks don't split mid-sentence.
pub fn chunk_text(text: &str, policy: ChunkingPolicy) -> Vec<TextChunk> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    if len == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < len {
        let mut end = (start + policy.max_chars).min(len);
        if end < len {
            let search_from = end.saturating_sub(TRAILING_SEARCH_WINDOW);
            if let Some(break_at) = find_last_terminator(&chars[search_from..end]) {
                end = search_from + break_at + 1;
            }
        }
        let slice: String = chars[start..end].iter().collect();
        chunks.push(TextChunk {
            text: slice,
            start,
            end,
        });
        if end >= len {
            break;
        }
        start = end.saturating_sub(policy.overlap);
        if start >= end {
            break;
        }
    }
    chunks
}

fn find_last_terminator(window: &[char]) -> Option<usize> {
    window
        .iter()
        .rposition(|c| SENTENCE_TERMINATORS.contains(c))
}
