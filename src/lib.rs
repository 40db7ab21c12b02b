//! # Mailcast
//!
//! Relays newsletter mail to a chat webhook as summarised announcements.
//!
//! ## Features
//!
//! - **Inbox polling**: unread messages over IMAP, decoded with mailparse
//! - **Content extraction**: headings, paragraphs, list items and links via scraper
//! - **Summaries**: any OpenAI-compatible chat-completion endpoint
//! - **Reliable delivery**: size-bounded chunks with rate-limit aware retries

pub mod agent;
pub mod config;
pub mod extract;
pub mod format;
pub mod item;
pub mod logging;
pub mod mail;
pub mod pipeline;
pub mod segment;
pub mod webhook;

pub use config::Config;
pub use item::AnnouncementItem;
pub use pipeline::{Pipeline, RunSummary};
pub use webhook::{ChunkedSender, DeliveryReport};
