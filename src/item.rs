//! Announcement items - one unit of content per source message.

use crate::extract::Fragment;
use chrono::{DateTime, FixedOffset};

/// A headed run of body text with the links that appeared under it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    pub heading: Option<String>,
    pub body_text: String,
    pub links: Vec<String>,
}

/// A section after the summariser has run over its body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummarizedSection {
    pub heading: Option<String>,
    pub summary: String,
    pub links: Vec<String>,
}

/// One message to be summarised and announced.
///
/// Lives for a single processing pass; nothing is persisted.
#[derive(Debug, Clone)]
pub struct AnnouncementItem {
    pub subject: String,
    /// The `Date` header exactly as received
    pub received: Option<String>,
    pub fragments: Vec<Fragment>,
}

impl AnnouncementItem {
    pub fn new(subject: impl Into<String>, fragments: Vec<Fragment>) -> Self {
        Self {
            subject: subject.into(),
            received: None,
            fragments,
        }
    }

    pub fn with_received(mut self, received: impl Into<String>) -> Self {
        self.received = Some(received.into());
        self
    }

    /// Parsed form of the `Date` header, when it is RFC 2822 compliant
    pub fn received_at(&self) -> Option<DateTime<FixedOffset>> {
        self.received
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc2822(raw.trim()).ok())
    }

    /// Concatenated body text of every paragraph and list item
    pub fn body_text(&self) -> String {
        self.fragments
            .iter()
            .filter_map(|fragment| match fragment {
                Fragment::Paragraph(text) | Fragment::ListItem { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Every link target, in document order
    pub fn links(&self) -> Vec<&str> {
        self.fragments
            .iter()
            .filter_map(|fragment| match fragment {
                Fragment::Link(url) => Some(url.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_and_links_come_from_fragments() {
        let item = AnnouncementItem::new(
            "Weekly",
            vec![
                Fragment::Heading {
                    level: 2,
                    text: "Title".into(),
                },
                Fragment::Paragraph("One.".into()),
                Fragment::Link("https://a.example".into()),
                Fragment::ListItem {
                    text: "Two".into(),
                    ordered: false,
                },
            ],
        );
        assert_eq!(item.body_text(), "One.\nTwo");
        assert_eq!(item.links(), vec!["https://a.example"]);
    }

    #[test]
    fn received_date_parses_when_well_formed() {
        let item = AnnouncementItem::new("s", Vec::new()).with_received("Tue, 1 Jul 2025 10:52:37 +0200");
        let parsed = item.received_at().unwrap();
        assert_eq!(parsed.format("%Y-%m-%d").to_string(), "2025-07-01");

        let garbled = AnnouncementItem::new("s", Vec::new()).with_received("yesterday");
        assert!(garbled.received_at().is_none());
    }
}
