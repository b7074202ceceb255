use crate::error::ConfigError;
use crate::models::RagConfig;
use std::ops::Range;

const SENTENCE_BOUNDARIES: [char; 7] = ['.', '。', '!', '！', '?', '？', '\n'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ConfigError> {
        if chunk_size == 0 {
            return Err(ConfigError::ZeroValue("chunk_size"));
        }
        if chunk_overlap >= chunk_size {
            return Err(ConfigError::InvalidChunking {
                chunk_size,
                chunk_overlap,
            });
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    fn stride(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

impl TryFrom<&RagConfig> for ChunkingConfig {
    type Error = ConfigError;

    fn try_from(value: &RagConfig) -> Result<Self, Self::Error> {
        Self::new(value.chunk_size, value.chunk_overlap)
    }
}

pub fn sentence_boundaries(chars: &[char]) -> Vec<usize> {
    chars
        .iter()
        .enumerate()
        .filter(|(_, ch)| SENTENCE_BOUNDARIES.contains(ch))
        .map(|(offset, _)| offset)
        .collect()
}

/// Splits `text` into overlapping chunks that prefer to end on a sentence or
/// line boundary. No chunk is longer than `chunk_size` characters.
pub fn split_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chunk_spans(&chars, config)
        .into_iter()
        .filter_map(|span| {
            let piece: String = chars[span].iter().collect();
            let trimmed = piece.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}

fn chunk_spans(chars: &[char], config: ChunkingConfig) -> Vec<Range<usize>> {
    if chars.is_empty() {
        return Vec::new();
    }

    let boundaries = sentence_boundaries(chars);
    if boundaries.is_empty() {
        return fixed_stride_spans(chars.len(), config);
    }

    let len = chars.len();
    let mut spans = Vec::new();
    let mut start = 0;

    while start < len {
        let mut end = (start + config.chunk_size).min(len);

        if end < len {
            // Rightmost terminator that still fits in the window; it only counts
            // if cutting there moves the next window forward.
            let fitting = boundaries.partition_point(|&offset| offset < end);
            if let Some(&boundary) = fitting.checked_sub(1).and_then(|idx| boundaries.get(idx)) {
                if boundary + 1 > start + config.chunk_overlap {
                    end = boundary + 1;
                }
            }
        }

        spans.push(start..end);
        if end == len {
            break;
        }
        start = end - config.chunk_overlap;
    }

    spans
}

fn fixed_stride_spans(len: usize, config: ChunkingConfig) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start = 0;
    while start < len {
        let end = (start + config.chunk_size).min(len);
        spans.push(start..end);
        if end == len {
            break;
        }
        start += config.stride();
    }
    spans
}
