//! Content extraction from newsletter bodies.
//!
//! Uses scraper for HTML parsing. Produces typed fragments in document order,
//! and can group them into headed sections for per-section summarisation.

use crate::item::Section;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ExtractError {
    #[error("no content found in message body")]
    NoContent,
}

/// One structural unit pulled out of a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Heading { level: u8, text: String },
    Paragraph(String),
    ListItem { text: String, ordered: bool },
    Link(String),
}

/// Which element kinds count as content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagPolicy {
    pub headings: bool,
    pub paragraphs: bool,
    pub list_items: bool,
    pub anchors: bool,
}

impl Default for TagPolicy {
    fn default() -> Self {
        Self {
            headings: true,
            paragraphs: true,
            list_items: true,
            anchors: true,
        }
    }
}

impl TagPolicy {
    /// CSS selector matching every element kind the policy admits
    fn selector(&self) -> Option<Selector> {
        let mut parts: Vec<&str> = Vec::new();
        if self.headings {
            parts.extend(["h1", "h2", "h3", "h4", "h5", "h6"]);
        }
        if self.paragraphs {
            parts.push("p");
        }
        if self.list_items {
            parts.push("li");
        }
        if self.anchors {
            parts.push("a");
        }
        if parts.is_empty() {
            return None;
        }
        Selector::parse(&parts.join(", ")).ok()
    }
}

/// Parse an HTML body and extract its fragments
pub fn extract_from_html(html: &str, policy: &TagPolicy) -> Vec<Fragment> {
    let document = Html::parse_document(html);
    extract_fragments(&document, policy)
}

/// Walk the document in order and emit a fragment for every selected element.
///
/// Anchors without an absolute http(s) target are dropped, as are text
/// elements that are empty once whitespace is collapsed.
pub fn extract_fragments(document: &Html, policy: &TagPolicy) -> Vec<Fragment> {
    let Some(selector) = policy.selector() else {
        return Vec::new();
    };

    let mut fragments = Vec::new();
    for element in document.select(&selector) {
        let name = element.value().name();
        if name == "a" {
            if let Some(url) = element.value().attr("href").and_then(resolvable_url) {
                fragments.push(Fragment::Link(url));
            }
            continue;
        }

        let text = element_text(&element);
        if text.is_empty() {
            continue;
        }

        let fragment = match name {
            "p" => Fragment::Paragraph(text),
            "li" => Fragment::ListItem {
                text,
                ordered: parent_is(&element, "ol"),
            },
            heading => match heading_level(heading) {
                Some(level) => Fragment::Heading { level, text },
                None => continue,
            },
        };
        fragments.push(fragment);
    }

    fragments
}

/// Group fragments into sections, one per heading.
///
/// Paragraphs and list items form the section body; links are kept in order.
/// Sections with no body text are dropped, since there is nothing to summarise.
pub fn group_sections(fragments: &[Fragment]) -> Result<Vec<Section>, ExtractError> {
    let mut sections = Vec::new();
    let mut current = Section::default();

    for fragment in fragments {
        match fragment {
            Fragment::Heading { text, .. } => {
                let finished = std::mem::replace(
                    &mut current,
                    Section {
                        heading: Some(text.clone()),
                        ..Section::default()
                    },
                );
                push_section(&mut sections, finished);
            }
            Fragment::Paragraph(text) | Fragment::ListItem { text, .. } => {
                if !current.body_text.is_empty() {
                    current.body_text.push('\n');
                }
                current.body_text.push_str(text);
            }
            Fragment::Link(url) => current.links.push(url.clone()),
        }
    }
    push_section(&mut sections, current);

    if sections.is_empty() {
        return Err(ExtractError::NoContent);
    }
    Ok(sections)
}

/// Build fragments from a `text/plain` body: blank-line separated paragraphs,
/// followed by any bare http(s) URLs they contain.
pub fn fragments_from_plain_text(text: &str) -> Vec<Fragment> {
    let normalized = text.replace("\r\n", "\n");
    let mut fragments = Vec::new();

    for block in normalized.split("\n\n") {
        let paragraph = collapse_whitespace(block);
        if paragraph.is_empty() {
            continue;
        }

        let links: Vec<String> = paragraph
            .split_whitespace()
            .map(trim_url_token)
            .filter_map(resolvable_url)
            .collect();

        fragments.push(Fragment::Paragraph(paragraph));
        fragments.extend(links.into_iter().map(Fragment::Link));
    }

    fragments
}

/// Strip brackets, quotes and sentence punctuation hugging a bare URL
fn trim_url_token(token: &str) -> &str {
    token
        .trim_start_matches(|c: char| matches!(c, '<' | '(' | '"' | '\''))
        .trim_end_matches(|c: char| {
            matches!(c, '>' | ')' | ',' | '"' | '\'' | '.' | ';' | ':' | '!' | '?')
        })
}

fn push_section(sections: &mut Vec<Section>, section: Section) {
    if !section.body_text.trim().is_empty() {
        sections.push(section);
    }
}

fn element_text(element: &ElementRef) -> String {
    let raw: String = element.text().collect();
    collapse_whitespace(&raw)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parent_is(element: &ElementRef, tag: &str) -> bool {
    element
        .parent()
        .and_then(ElementRef::wrap)
        .is_some_and(|parent| parent.value().name() == tag)
}

fn heading_level(name: &str) -> Option<u8> {
    let level: u8 = name.strip_prefix('h')?.parse().ok()?;
    (1..=6).contains(&level).then_some(level)
}

fn resolvable_url(href: &str) -> Option<String> {
    let href = href.trim();
    let lower = href.to_ascii_lowercase();
    let has_host = ["http://", "https://"]
        .iter()
        .any(|scheme| lower.starts_with(scheme) && href.len() > scheme.len());
    has_host.then(|| href.to_string())
}
