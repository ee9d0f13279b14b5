//! Paragraph-preserving text chunking with overlap

use crate::config::ChunkingConfig;

/// Rough characters-per-token ratio used for every estimate
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimated token count of `text`
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub index: usize,
    pub text: String,
}

/// Splits long text into overlapping chunks that fit the token budget
#[derive(Debug, Clone)]
pub struct TextChunker {
    config: ChunkingConfig,
}

impl TextChunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn needs_chunking(&self, text: &str) -> bool {
        char_len(text) > self.max_chars()
    }

    /// Chunk `text`; short text comes back as a single chunk
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }
        if !self.needs_chunking(text) {
            return vec![TextChunk {
                index: 0,
                text: text.to_string(),
            }];
        }

        let max_chars = self.max_chars();
        let pieces = if self.config.preserve_paragraphs {
            self.pack_paragraphs(text, max_chars)
        } else {
            self.fixed_windows(text, max_chars)
        };

        pieces
            .into_iter()
            .enumerate()
            .map(|(index, text)| TextChunk { index, text })
            .collect()
    }

    /// Half of the token budget goes to chunk text, the rest to prompt and response
    fn max_chars(&self) -> usize {
        (self.config.max_tokens * CHARS_PER_TOKEN / 2).max(1)
    }

    fn overlap_chars(&self) -> usize {
        self.config.overlap_tokens * CHARS_PER_TOKEN
    }

    fn pack_paragraphs(&self, text: &str, max_chars: usize) -> Vec<String> {
        let mut units = Vec::new();
        for paragraph in split_paragraphs(text) {
            if char_len(paragraph) <= max_chars {
                units.push(paragraph.to_string());
            } else {
                units.extend(split_oversized(paragraph, max_chars));
            }
        }

        let mut chunks = Vec::new();
        let mut current = String::new();

        for unit in units {
            if current.is_empty() {
                current = unit;
                continue;
            }

            if char_len(&current) + 2 + char_len(&unit) <= max_chars {
                current.push_str("\n\n");
                current.push_str(&unit);
                continue;
            }

            let room = max_chars.saturating_sub(char_len(&unit) + 2);
            let overlap = overlap_tail(&current, self.overlap_chars().min(room));
            chunks.push(std::mem::take(&mut current));

            if overlap.is_empty() {
                current = unit;
            } else {
                current = format!("{}\n\n{}", overlap, unit);
            }
        }

        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }

    fn fixed_windows(&self, text: &str, max_chars: usize) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let overlap = self.overlap_chars().min(max_chars / 2);
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let mut end = (start + max_chars).min(chars.len());
            if end < chars.len() {
                // Back off to the last whitespace in the second half of the window
                if let Some(ws) = (start + max_chars / 2..end).rev().find(|&i| chars[i].is_whitespace()) {
                    end = ws;
                }
            }

            let piece: String = chars[start..end].iter().collect();
            let piece = piece.trim();
            if !piece.is_empty() {
                chunks.push(piece.to_string());
            }

            if end >= chars.len() {
                break;
            }

            let mut next = end.saturating_sub(overlap);
            while next < end && !chars[next].is_whitespace() && next > start {
                next += 1;
            }
            start = if next <= start { end } else { next };
        }

        chunks
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Blank-line separated paragraphs, trimmed, empties dropped
fn split_paragraphs(text: &str) -> Vec<&str> {
    let mut paragraphs = Vec::new();
    let mut start: Option<usize> = None;
    let mut end = 0;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        if line.trim().is_empty() {
            if let Some(s) = start.take() {
                paragraphs.push(text[s..end].trim());
            }
        } else {
            if start.is_none() {
                start = Some(offset);
            }
            end = offset + line.len();
        }
        offset += line.len();
    }
    if let Some(s) = start {
        paragraphs.push(text[s..end].trim());
    }

    paragraphs.retain(|p| !p.is_empty());
    paragraphs
}

/// Split a paragraph larger than `max_chars` by sentences, then hard windows
fn split_oversized(paragraph: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(paragraph) {
        let sentence_len = char_len(sentence);
        if sentence_len > max_chars {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            out.extend(hard_windows(sentence, max_chars));
            continue;
        }

        if current.is_empty() {
            current.push_str(sentence);
        } else if char_len(&current) + 1 + sentence_len <= max_chars {
            current.push(' ');
            current.push_str(sentence);
        } else {
            out.push(std::mem::replace(&mut current, sentence.to_string()));
        }
    }

    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Sentences ending in `.`, `!` or `?` followed by whitespace
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev_terminal = false;

    for (idx, c) in text.char_indices() {
        if prev_terminal && c.is_whitespace() {
            let sentence = text[start..idx].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = idx;
        }
        prev_terminal = matches!(c, '.' | '!' | '?');
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

fn hard_windows(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|w| w.iter().collect::<String>().trim().to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Trailing `max_chars` of `text`, starting on a word boundary
fn overlap_tail(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    let total = char_len(text);
    if total <= max_chars {
        return text.to_string();
    }

    let skip = total - max_chars;
    let mut iter = text.char_indices().skip(skip).peekable();
    let starts_clean = text
        .chars()
        .nth(skip - 1)
        .is_some_and(char::is_whitespace);

    let start = if starts_clean {
        iter.peek().map(|(i, _)| *i)
    } else {
        // Drop the partial word at the front
        iter.find(|(_, c)| c.is_whitespace()).map(|(i, _)| i)
    };

    match start {
        Some(i) => text[i..].trim().to_string(),
        None => String::new(),
    }
}
