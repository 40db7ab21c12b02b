//! Inbox access and raw message parsing.
//!
//! `ImapInbox` speaks IMAP over TLS with the blocking `imap` client, run on
//! tokio's blocking pool. Raw RFC 822 bytes are decoded with mailparse into a
//! subject, an optional date and the preferred body part.

use crate::config::MailConfig;
use crate::extract::{extract_from_html, fragments_from_plain_text, TagPolicy};
use crate::item::AnnouncementItem;
use async_trait::async_trait;
use mailparse::{MailHeaderMap, ParsedMail};
use native_tls::TlsStream;
use std::fmt;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum MailError {
    #[error("IMAP error: {0}")]
    Imap(#[from] imap::Error),
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("failed to parse message: {0}")]
    Parse(#[from] mailparse::MailParseError),
    #[error("message {0} has no body")]
    EmptyMessage(MessageId),
    #[error("message has no Subject header")]
    MissingSubject,
    #[error("message has no text/html or text/plain part")]
    NoBody,
    #[error("mailbox task failed: {0}")]
    Task(String),
}

/// Sequence number of a message in the selected mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(pub u32);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of unread messages
#[async_trait]
pub trait MailSource: Send {
    /// Unread messages, oldest first
    async fn unread_ids(&mut self) -> Result<Vec<MessageId>, MailError>;

    /// Raw RFC 822 bytes of one message
    async fn fetch(&mut self, id: MessageId) -> Result<Vec<u8>, MailError>;
}

type ImapSession = imap::Session<TlsStream<TcpStream>>;

/// IMAP mailbox with the configured folder selected
pub struct ImapInbox {
    session: Arc<Mutex<ImapSession>>,
}

impl ImapInbox {
    /// Connect, log in and select the mailbox
    pub async fn connect(config: &MailConfig) -> Result<Self, MailError> {
        let host = config.host.clone();
        let port = config.port;
        let mailbox = config.mailbox.clone();
        let username = config.username.clone().unwrap_or_default();
        let password = config.password.clone().unwrap_or_default();

        let session = tokio::task::spawn_blocking(move || -> Result<ImapSession, MailError> {
            let tls = native_tls::TlsConnector::builder().build()?;
            let client = imap::connect((host.as_str(), port), host.as_str(), &tls)?;
            let mut session = client.login(username, password).map_err(|(e, _client)| e)?;
            session.select(&mailbox)?;
            Ok(session)
        })
        .await
        .map_err(|e| MailError::Task(e.to_string()))??;

        info!(host = %config.host, mailbox = %config.mailbox, "connected to mailbox");
        Ok(Self {
            session: Arc::new(Mutex::new(session)),
        })
    }

    async fn with_session<F, R>(&self, op: F) -> Result<R, MailError>
    where
        F: FnOnce(&mut ImapSession) -> Result<R, MailError> + Send + 'static,
        R: Send + 'static,
    {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            let mut guard = session
                .lock()
                .map_err(|_| MailError::Task("session lock poisoned".to_string()))?;
            op(&mut guard)
        })
        .await
        .map_err(|e| MailError::Task(e.to_string()))?
    }

    pub async fn logout(self) -> Result<(), MailError> {
        self.with_session(|session| Ok(session.logout()?)).await
    }
}

#[async_trait]
impl MailSource for ImapInbox {
    async fn unread_ids(&mut self) -> Result<Vec<MessageId>, MailError> {
        let mut ids: Vec<MessageId> = self
            .with_session(|session| Ok(session.search("UNSEEN")?))
            .await?
            .into_iter()
            .map(MessageId)
            .collect();
        ids.sort();
        debug!(count = ids.len(), "unread messages");
        Ok(ids)
    }

    async fn fetch(&mut self, id: MessageId) -> Result<Vec<u8>, MailError> {
        self.with_session(move |session| {
            let messages = session.fetch(id.to_string(), "RFC822")?;
            messages
                .iter()
                .next()
                .and_then(|message| message.body())
                .map(<[u8]>::to_vec)
                .ok_or(MailError::EmptyMessage(id))
        })
        .await
    }
}

/// The part of a message the extractor reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailBody {
    Html(String),
    Plain(String),
}

/// A decoded message
#[derive(Debug, Clone)]
pub struct MailMessage {
    pub subject: String,
    pub date: Option<String>,
    pub body: MailBody,
}

/// Decode subject, date and body from raw RFC 822 bytes.
///
/// The first `text/html` part wins; `text/plain` is the fallback.
pub fn parse_message(raw: &[u8]) -> Result<MailMessage, MailError> {
    let parsed = mailparse::parse_mail(raw)?;
    let subject = parsed
        .headers
        .get_first_value("Subject")
        .ok_or(MailError::MissingSubject)?;
    let date = parsed.headers.get_first_value("Date");

    let body = match find_part(&parsed, "text/html") {
        Some(part) => MailBody::Html(part.get_body()?),
        None => match find_part(&parsed, "text/plain") {
            Some(part) => MailBody::Plain(part.get_body()?),
            None => return Err(MailError::NoBody),
        },
    };

    Ok(MailMessage {
        subject: subject.trim().to_string(),
        date,
        body,
    })
}

/// Depth-first search for the first part of the given type
fn find_part<'a, 'b>(part: &'b ParsedMail<'a>, mimetype: &str) -> Option<&'b ParsedMail<'a>> {
    if part.subparts.is_empty() {
        return part
            .ctype
            .mimetype
            .eq_ignore_ascii_case(mimetype)
            .then_some(part);
    }
    part.subparts
        .iter()
        .find_map(|sub| find_part(sub, mimetype))
}

impl MailMessage {
    /// Extract the body into fragments and wrap it up as an announcement
    pub fn into_item(self, policy: &TagPolicy) -> AnnouncementItem {
        let fragments = match &self.body {
            MailBody::Html(html) => extract_from_html(html, policy),
            MailBody::Plain(text) => fragments_from_plain_text(text),
        };
        let item = AnnouncementItem::new(self.subject, fragments);
        match self.date {
            Some(date) => item.with_received(date),
            None => item,
        }
    }
}
