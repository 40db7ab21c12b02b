//! Text segmentation and size-bounded chunking.
//!
//! The splitter is naive: it cuts on every `.` with no special handling of
//! decimals, abbreviations or URLs. `chunk_text` re-inserts the delimiter
//! between joined candidates, so the chunks of a message rejoined with `.`
//! give back the original text whenever no single candidate overflows.

/// Splits text into ordered sentence candidates
pub trait Segmenter: Send + Sync {
    /// The delimiter re-inserted between candidates joined into one chunk
    fn delimiter(&self) -> &str;

    fn segments<'a>(&self, text: &'a str) -> Vec<&'a str>;
}

/// Splits on the literal `.` character
#[derive(Debug, Clone, Copy, Default)]
pub struct PeriodSegmenter;

impl Segmenter for PeriodSegmenter {
    fn delimiter(&self) -> &str {
        "."
    }

    fn segments<'a>(&self, text: &'a str) -> Vec<&'a str> {
        text.split('.').collect()
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Pack sentence candidates into chunks of at most `max_len` characters.
///
/// A new chunk starts only when appending the next candidate (plus one
/// delimiter) would cross `max_len`. A single candidate longer than
/// `max_len` still becomes its own over-limit chunk. An empty accumulator is
/// never emitted.
pub fn chunk_text(text: &str, segmenter: &dyn Segmenter, max_len: usize) -> Vec<String> {
    let delimiter = segmenter.delimiter();
    let delimiter_len = char_len(delimiter);

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for candidate in segmenter.segments(text) {
        let candidate_len = char_len(candidate);
        if current_len + candidate_len + delimiter_len > max_len {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            current.push_str(candidate);
            current_len = candidate_len;
        } else {
            if !current.is_empty() {
                current.push_str(delimiter);
                current_len += delimiter_len;
            }
            current.push_str(candidate);
            current_len += candidate_len;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
