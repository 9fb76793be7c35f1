use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chunk::{Chunk, Position};
use crate::keywords::is_cjk;

/// Page/slide separator emitted by PDF and slide text extraction
pub const PAGE_BREAK: char = '\x0c';

// 1.3 tokens per word, kept in tenths to stay in integer arithmetic
const TOKEN_TENTHS_PER_WORD: usize = 13;
// Runs longer than this (unspaced scripts, URLs, base64) are split into pieces
const MAX_WORD_CHARS: usize = 16;
const PIECE_CHARS: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    pub target_tokens_max: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_tokens_max: 400,
            overlap_tokens: 50,
        }
    }
}

/// Splits document text on pages, headings and paragraphs, falling back to an
/// overlapping word window for paragraphs that exceed the token budget.
pub struct Chunker {
    config: ChunkerConfig,
}

#[derive(Debug, Clone, Copy)]
struct Unit {
    start: usize,
    end: usize,
    cjk: bool,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn chunk_text(&self, source_id: &str, text: &str) -> Vec<Chunk> {
        let mut spans: Vec<Position> = Vec::new();
        let mut page_start = 0;

        for (page_idx, page) in text.split(PAGE_BREAK).enumerate() {
            let page_end = page_start + page.len();
            self.chunk_page(text, page_start, page_end, page_idx + 1, &mut spans);
            page_start = page_end + PAGE_BREAK.len_utf8();
        }

        let chunks: Vec<Chunk> = spans
            .into_iter()
            .enumerate()
            .map(|(ordinal, position)| {
                let body = text[position.start..position.end].to_string();
                Chunk::new(source_id, ordinal, body, position)
            })
            .collect();

        debug!(source = source_id, chunks = chunks.len(), "Chunked document");
        chunks
    }

    fn chunk_page(
        &self,
        text: &str,
        start: usize,
        end: usize,
        page: usize,
        out: &mut Vec<Position>,
    ) {
        let max = self.config.target_tokens_max.max(1);
        let mut buffer: Option<(usize, usize)> = None;
        let mut buffer_tokens = 0;

        for (p_start, p_end) in paragraph_spans(&text[start..end], start) {
            let para = &text[p_start..p_end];
            let para_tokens = estimate_tokens(para);

            // Oversized paragraph: flush, then slide a window over it
            if para_tokens > max {
                if let Some((b_start, b_end)) = buffer.take() {
                    out.push(Position { page, start: b_start, end: b_end });
                }
                buffer_tokens = 0;
                self.window_spans(text, p_start, p_end, page, out);
                continue;
            }

            // Headings open a new chunk, as does exceeding the budget
            if let Some((b_start, b_end)) = buffer {
                if is_heading(para) || buffer_tokens + para_tokens > max {
                    out.push(Position { page, start: b_start, end: b_end });
                    buffer = None;
                    buffer_tokens = 0;
                }
            }

            buffer = match buffer {
                Some((b_start, _)) => Some((b_start, p_end)),
                None => Some((p_start, p_end)),
            };
            buffer_tokens += para_tokens;
        }

        if let Some((b_start, b_end)) = buffer {
            out.push(Position { page, start: b_start, end: b_end });
        }
    }

    fn window_spans(&self, text: &str, start: usize, end: usize, page: usize, out: &mut Vec<Position>) {
        let units = units(&text[start..end], start);
        if units.is_empty() {
            return;
        }

        let window = (self.config.target_tokens_max * 10 / TOKEN_TENTHS_PER_WORD).max(1);
        let overlap = (self.config.overlap_tokens * 10 / TOKEN_TENTHS_PER_WORD).min(window - 1);
        let step = window - overlap;

        let mut first = 0;
        loop {
            let last = (first + window).min(units.len());
            out.push(Position {
                page,
                start: units[first].start,
                end: units[last - 1].end,
            });
            if last == units.len() {
                break;
            }
            first += step;
        }
    }
}

fn is_heading(paragraph: &str) -> bool {
    paragraph.trim_start().starts_with('#')
}

/// Absolute byte spans of the blank-line separated paragraphs in `page`,
/// trimmed of surrounding whitespace.
fn paragraph_spans(page: &str, base: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut para_start: Option<usize> = None;
    let mut para_end = 0;
    let mut offset = 0;

    for line in page.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        if line.trim().is_empty() {
            if let Some(s) = para_start.take() {
                spans.push((base + s, base + para_end));
            }
            continue;
        }

        if para_start.is_none() {
            para_start = Some(line_start + (line.len() - line.trim_start().len()));
        }
        para_end = line_start + line.trim_end().len();
    }

    if let Some(s) = para_start {
        spans.push((base + s, base + para_end));
    }

    spans
}

/// Words, plus one unit per CJK ideograph. Words over `MAX_WORD_CHARS`
/// characters count as one unit per `PIECE_CHARS` characters.
fn units(text: &str, base: usize) -> Vec<Unit> {
    let mut units = Vec::new();
    let mut word_start: Option<usize> = None;

    for (i, c) in text.char_indices() {
        if c.is_whitespace() || is_cjk(c) {
            if let Some(s) = word_start.take() {
                push_word(&mut units, text, s, i, base);
            }
            if !c.is_whitespace() {
                units.push(Unit { start: base + i, end: base + i + c.len_utf8(), cjk: true });
            }
        } else if word_start.is_none() {
            word_start = Some(i);
        }
    }

    if let Some(s) = word_start {
        push_word(&mut units, text, s, text.len(), base);
    }

    units
}

fn push_word(units: &mut Vec<Unit>, text: &str, start: usize, end: usize, base: usize) {
    let word = &text[start..end];
    if word.chars().count() <= MAX_WORD_CHARS {
        units.push(Unit { start: base + start, end: base + end, cjk: false });
        return;
    }

    let mut piece_start = start;
    for (n, (i, _)) in word.char_indices().enumerate() {
        if n > 0 && n % PIECE_CHARS == 0 {
            units.push(Unit { start: base + piece_start, end: base + start + i, cjk: false });
            piece_start = start + i;
        }
    }
    units.push(Unit { start: base + piece_start, end: base + end, cjk: false });
}

/// Rough token estimate: 1.3 tokens per word, one per CJK ideograph
pub fn estimate_tokens(text: &str) -> usize {
    let units = units(text, 0);
    let cjk = units.iter().filter(|u| u.cjk).count();
    let words = units.len() - cjk;
    words * TOKEN_TENTHS_PER_WORD / 10 + cjk
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_chunker(max: usize, overlap: usize) -> Chunker {
        Chunker::new(ChunkerConfig {
            target_tokens_max: max,
            overlap_tokens: overlap,
        })
    }

    #[test]
    fn test_basic_chunking() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let text = "This is a test paragraph.\n\nThis is another paragraph.";
        let chunks = chunker.chunk_text("test-doc", text);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source, "test-doc");
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].position.page, 1);
    }

    #[test]
    fn test_empty_document_has_no_chunks() {
        let chunker = Chunker::new(ChunkerConfig::default());
        assert!(chunker.chunk_text("doc", "").is_empty());
        assert!(chunker.chunk_text("doc", "  \n\n \x0c \n").is_empty());
    }

    #[test]
    fn test_pages_are_numbered_from_form_feeds() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let text = "Slide one text.\x0cSlide two text.\x0c\x0cSlide four text.";
        let chunks = chunker.chunk_text("deck", text);

        let pages: Vec<usize> = chunks.iter().map(|c| c.position.page).collect();
        assert_eq!(pages, vec![1, 2, 4]);
        assert_eq!(chunks[2].text, "Slide four text.");
    }

    #[test]
    fn test_offsets_slice_back_to_text() {
        let chunker = small_chunker(6, 0);
        let text = "  Alpha beta gamma.\n\nDelta epsilon zeta.\x0c\nEta theta.\n";
        for chunk in chunker.chunk_text("doc", text) {
            assert_eq!(&text[chunk.position.start..chunk.position.end], chunk.text);
        }
    }

    #[test]
    fn test_heading_starts_new_chunk() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let text = "Intro words.\n\n# Convolution\n\nKernels slide over images.";
        let chunks = chunker.chunk_text("doc", text);

        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].text.starts_with("# Convolution"));
    }

    #[test]
    fn test_paragraphs_merge_until_budget() {
        // each paragraph is 3 words ~ 3 tokens
        let chunker = small_chunker(7, 0);
        let text = "one two three\n\nfour five six\n\nseven eight nine";
        let chunks = chunker.chunk_text("doc", text);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "one two three\n\nfour five six");
        assert_eq!(chunks[1].text, "seven eight nine");
    }

    #[test]
    fn test_long_paragraph_uses_overlapping_windows() {
        // window = 130 / 13 = 10 words, overlap = 40 / 13 = 3 words
        let chunker = small_chunker(13, 4);
        let words: Vec<String> = (0..25).map(|i| format!("w{}", i)).collect();
        let text = words.join(" ");
        let chunks = chunker.chunk_text("doc", &text);

        assert_eq!(chunks[0].text, words[0..10].join(" "));
        assert_eq!(chunks[1].text, words[7..17].join(" "));
        assert_eq!(chunks[2].text, words[14..24].join(" "));
        assert_eq!(chunks[3].text, words[21..25].join(" "));
        for chunk in &chunks {
            assert!(chunk.estimated_tokens() <= 13);
        }
    }

    #[test]
    fn test_cjk_paragraph_is_windowed_by_character() {
        let chunker = small_chunker(5, 0);
        let text = "卷積神經網路使用卷積層";
        let chunks = chunker.chunk_text("doc", text);

        // window = 5 * 10 / 13 = 3 ideographs
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].text, "卷積神");
        assert_eq!(chunks[3].text, "卷積層");
        assert!(chunks.iter().all(|c| c.estimated_tokens() <= 5));
    }

    #[test]
    fn test_rechunking_is_deterministic() {
        let chunker = small_chunker(20, 5);
        let text = "Dropout is used to prevent overfitting. ".repeat(30)
            + "\n\nRegularization penalises large weights.\x0cPage two.";
        let first = chunker.chunk_text("doc", &text);
        let second = chunker.chunk_text("doc", &text);

        assert_eq!(first, second);
        for (i, chunk) in first.iter().enumerate() {
            assert_eq!(chunk.ordinal, i);
        }
    }

    #[test]
    fn test_unspaced_paragraph_respects_budget() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let text = "ภาษาไทยเขียนติดกันโดยไม่เว้นวรรค".repeat(200);
        let chunks = chunker.chunk_text("thai", &text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.estimated_tokens() <= 400);
            assert_eq!(&text[chunk.position.start..chunk.position.end], chunk.text);
        }
        assert_eq!(chunks.first().map(|c| c.position.start), Some(0));
        assert_eq!(chunks.last().map(|c| c.position.end), Some(text.len()));
    }

    #[test]
    fn test_long_tokens_are_counted_by_length() {
        let url = format!("https://example.org/{}", "a".repeat(80));
        assert!(estimate_tokens(&url) >= 20);
        assert_eq!(estimate_tokens("regularization"), 1);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens("one two three four five six seven eight nine ten"), 13);
        assert_eq!(estimate_tokens("反向傳播"), 4);
        assert_eq!(estimate_tokens(""), 0);
    }
}
