//! Message formatting for chat delivery.
//!
//! Builds the decorated text posted for each announcement item. Link lines
//! are the only place a block is split here; the webhook sender still
//! hard-chunks the joined output afterwards.

use crate::extract::Fragment;
use crate::item::{AnnouncementItem, SummarizedSection};

/// Largest message the chat provider accepts, less one character of margin
pub const MAX_BLOCK_LEN: usize = 1999;

/// Decorative line opening every block and section
pub const SEPARATOR: &str = "⌐◨-◨ ⌐◨-◨ ⌐◨-◨ ⌐◨-◨ ⌐◨-◨ ⌐◨-◨";

/// Accumulates blocks, opening a new one when a link line would overflow
struct BlockBuilder {
    max_len: usize,
    blocks: Vec<String>,
    current: String,
    current_len: usize,
}

impl BlockBuilder {
    fn new(max_len: usize, opening: String) -> Self {
        let current_len = opening.chars().count();
        Self {
            max_len,
            blocks: Vec::new(),
            current: opening,
            current_len,
        }
    }

    fn push_str(&mut self, text: &str) {
        self.current.push_str(text);
        self.current_len += text.chars().count();
    }

    /// Append one link line on its own line, or restart with the separator
    /// when it would push the block past the limit.
    fn push_link(&mut self, line: &str) {
        let appended = if self.current.ends_with('\n') {
            line.to_string()
        } else {
            format!("\n{}", line)
        };
        let appended_len = appended.chars().count();

        if self.current_len + appended_len > self.max_len {
            let opening = format!("{}\n{}", SEPARATOR, line);
            self.current_len = opening.chars().count();
            self.blocks.push(std::mem::replace(&mut self.current, opening));
        } else {
            self.current.push_str(&appended);
            self.current_len += appended_len;
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.blocks.push(self.current);
        self.blocks
    }
}

/// Renders announcement items into message blocks
#[derive(Debug, Clone, Copy)]
pub struct Formatter {
    max_block_len: usize,
}

impl Default for Formatter {
    fn default() -> Self {
        Self::new(MAX_BLOCK_LEN)
    }
}

impl Formatter {
    pub fn new(max_block_len: usize) -> Self {
        Self { max_block_len }
    }

    /// Header block plus one decorated block per summarised section
    pub fn format_digest(&self, item: &AnnouncementItem, sections: &[SummarizedSection]) -> Vec<String> {
        let header = match item.received.as_deref() {
            Some(date) => format!("**{}**\n**{}**\n\n{}", date.trim(), item.subject, SEPARATOR),
            None => format!("**{}**\n\n{}", item.subject, SEPARATOR),
        };
        let mut builder = BlockBuilder::new(self.max_block_len, header);

        for section in sections {
            builder.push_str("\n\n\n");
            builder.push_str(SEPARATOR);
            builder.push_str("\n\n");
            if let Some(heading) = &section.heading {
                builder.push_str(&format!("📘 **{}**\n", heading));
            }
            builder.push_str(&format!("・{}\n", section.summary));
            for url in &section.links {
                builder.push_link(&format!("🔗URL: {}", url));
            }
            builder.push_str("\n\n");
        }

        builder.finish()
    }

    /// Every fragment in order; paragraphs are expected to hold summaries already
    pub fn format_fragments(&self, subject: &str, fragments: &[Fragment]) -> Vec<String> {
        let mut builder = BlockBuilder::new(self.max_block_len, format!("**{}**\n\n{}", subject, SEPARATOR));

        for fragment in fragments {
            match fragment {
                Fragment::Heading { level, text } if *level <= 2 => {
                    builder.push_str(&format!("\n\n{}", text));
                }
                Fragment::Heading { text, .. } => {
                    builder.push_str(&format!("\n\n📘 **{}**", text));
                }
                Fragment::Paragraph(summary) => builder.push_str(&format!("\n・{}", summary)),
                Fragment::ListItem { text, ordered: false } => builder.push_str(&format!("\n- {}", text)),
                Fragment::ListItem { text, ordered: true } => builder.push_str(&format!("\n1. {}", text)),
                Fragment::Link(url) => builder.push_link(&format!("🔗{}", url)),
            }
        }

        builder.finish()
    }
}
