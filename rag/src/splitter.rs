/// Separators tried in order, from markdown headings down to single characters.
pub const MARKDOWN_SEPARATORS: [&str; 14] = [
    "\n# ",
    "\n## ",
    "\n### ",
    "\n#### ",
    "\n##### ",
    "\n###### ",
    "```\n",
    "\n***\n",
    "\n---\n",
    "\n___\n",
    "\n\n",
    "\n",
    " ",
    "",
];

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Recursive markdown-aware splitter. Sizes are counted in characters.
#[derive(Debug, Clone, Copy)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for TextSplitter {
    fn default() -> Self {
        TextSplitter::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Splits before every occurrence of `separator`, keeping it at the start of
/// the following piece. Empty pieces are dropped.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (index, _) in text.match_indices(separator) {
        if index > start {
            pieces.push(&text[start..index]);
        }
        start = index;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        TextSplitter {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size),
        }
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &MARKDOWN_SEPARATORS)
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut remaining: &[&str] = &[];
        let mut separator = "";
        for (i, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() || text.contains(candidate) {
                separator = candidate;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                chunks.extend(self.merge(&fitting));
                fitting.clear();
            }
            if remaining.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_with(piece, remaining));
            }
        }
        if !fitting.is_empty() {
            chunks.extend(self.merge(&fitting));
        }
        chunks
    }

    /// Packs consecutive pieces into chunks of at most `chunk_size`, carrying
    /// up to `chunk_overlap` characters of trailing pieces into the next chunk.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: std::collections::VecDeque<&str> = std::collections::VecDeque::new();
        let mut total = 0;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                push_joined(&mut chunks, &window);
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }
            window.push_back(piece);
            total += len;
        }
        push_joined(&mut chunks, &window);
        chunks
    }
}

fn push_joined(chunks: &mut Vec<String>, window: &std::collections::VecDeque<&str>) {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = TextSplitter::default().split("# Title\n\nSome text.");
        assert_eq!(chunks, vec!["# Title\n\nSome text.".to_string()]);
    }

    #[test]
    fn blank_text_has_no_chunks() {
        assert!(TextSplitter::default().split("  \n\n ").is_empty());
    }

    #[test]
    fn chunks_respect_the_size_limit() {
        let paragraph = "palavra ".repeat(60);
        let text = (0..40)
            .map(|i| format!("## Secção {}\n\n{}", i, paragraph))
            .collect::<Vec<_>>()
            .join("\n");

        let chunks = TextSplitter::default().split(&text);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= DEFAULT_CHUNK_SIZE));
    }

    #[test]
    fn headings_start_new_chunks() {
        let splitter = TextSplitter::new(40, 0);
        let chunks = splitter.split("# One\nfirst part\n# Two\nsecond part");
        assert_eq!(chunks, vec!["# One\nfirst part", "# Two\nsecond part"]);
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let splitter = TextSplitter::new(20, 10);
        let chunks = splitter.split("aaaa bbbb cccc dddd eeee ffff gggg");
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let last_word = pair[0].split(' ').last().unwrap();
            assert!(pair[1].contains(last_word));
        }
    }

    #[test]
    fn long_words_fall_back_to_characters() {
        let chunks = TextSplitter::new(10, 0).split(&"x".repeat(25));
        assert_eq!(chunks, vec!["x".repeat(10), "x".repeat(10), "x".repeat(5)]);
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let chunks = TextSplitter::new(5, 0).split(&"ç".repeat(12));
        assert_eq!(chunks.concat(), "ç".repeat(12));
    }
}
