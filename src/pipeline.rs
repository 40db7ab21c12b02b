//! One pass over the inbox: fetch, extract, summarise, format, deliver.
//!
//! Everything runs sequentially so summaries reach the destination in the
//! order the messages arrived. A failing item is logged and counted; it does
//! not stop the run.

use crate::agent::{AgentError, Summarizer};
use crate::config::Layout;
use crate::extract::{group_sections, ExtractError, Fragment, TagPolicy};
use crate::format::Formatter;
use crate::item::{AnnouncementItem, SummarizedSection};
use crate::mail::{parse_message, MailError, MailSource, MessageId};
use crate::segment::{chunk_text, PeriodSegmenter};
use crate::webhook::{ChunkedSender, DeliveryReport, Transport};
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that abort the whole run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("mailbox error: {0}")]
    Mail(#[from] MailError),
}

/// Errors that abandon a single item
#[derive(Error, Debug)]
pub enum ItemError {
    #[error(transparent)]
    Mail(#[from] MailError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("summarisation failed: {0}")]
    Agent(#[from] AgentError),
}

/// Where formatted output ends up
#[async_trait]
pub trait Sink: Send + Sync {
    async fn deliver(&self, text: &str) -> DeliveryReport;
}

/// Posts to the configured webhook through the chunked sender
pub struct WebhookSink<T: Transport> {
    sender: ChunkedSender<T>,
    endpoint: String,
}

impl<T: Transport> WebhookSink<T> {
    pub fn new(sender: ChunkedSender<T>, endpoint: impl Into<String>) -> Self {
        Self {
            sender,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl<T: Transport> Sink for WebhookSink<T> {
    async fn deliver(&self, text: &str) -> DeliveryReport {
        self.sender.send(&self.endpoint, text).await
    }
}

/// Prints the chunks that would be sent
pub struct StdoutSink {
    max_chunk_len: usize,
}

impl StdoutSink {
    pub fn new(max_chunk_len: usize) -> Self {
        Self { max_chunk_len }
    }
}

#[async_trait]
impl Sink for StdoutSink {
    async fn deliver(&self, text: &str) -> DeliveryReport {
        let chunks = chunk_text(text, &PeriodSegmenter, self.max_chunk_len);
        for (i, chunk) in chunks.iter().enumerate() {
            println!("--- chunk {} ({} chars) ---", i + 1, chunk.chars().count());
            println!("{}", chunk);
        }
        DeliveryReport::Delivered { chunks: chunks.len() }
    }
}

/// Tally of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub delivered: usize,
    pub partial: usize,
    pub failed: usize,
}

impl RunSummary {
    /// Whether the run should be reported as unsuccessful
    pub fn has_failures(&self, strict: bool) -> bool {
        self.failed > 0 || (strict && self.partial > 0)
    }

    fn record(&mut self, report: &DeliveryReport) {
        match report {
            DeliveryReport::Delivered { .. } => self.delivered += 1,
            DeliveryReport::PartiallyDelivered { .. } => self.partial += 1,
            DeliveryReport::Failed { .. } => self.failed += 1,
        }
    }
}

pub struct Pipeline {
    summarizer: Box<dyn Summarizer>,
    sink: Box<dyn Sink>,
    formatter: Formatter,
    layout: Layout,
    policy: TagPolicy,
}

impl Pipeline {
    pub fn new(summarizer: Box<dyn Summarizer>, sink: Box<dyn Sink>) -> Self {
        Self {
            summarizer,
            sink,
            formatter: Formatter::default(),
            layout: Layout::default(),
            policy: TagPolicy::default(),
        }
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_formatter(mut self, formatter: Formatter) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn with_policy(mut self, policy: TagPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Process every unread message in order
    pub async fn run(&self, source: &mut dyn MailSource) -> Result<RunSummary, PipelineError> {
        let ids = source.unread_ids().await?;
        let mut summary = RunSummary::default();

        if ids.is_empty() {
            info!("No unread mails found, nothing to send");
            return Ok(summary);
        }
        info!(count = ids.len(), "processing unread mails");

        for id in ids {
            summary.processed += 1;
            match self.process(source, id).await {
                Ok(report) => {
                    match &report {
                        DeliveryReport::Delivered { chunks } => {
                            info!(mail_id = %id, chunks, "announcement delivered")
                        }
                        DeliveryReport::PartiallyDelivered { failed_chunks, total } => {
                            warn!(mail_id = %id, ?failed_chunks, total, "announcement partially delivered")
                        }
                        DeliveryReport::Failed { reason } => {
                            warn!(mail_id = %id, %reason, "announcement delivery failed")
                        }
                    }
                    summary.record(&report);
                }
                Err(e) => {
                    warn!(mail_id = %id, error = %e, "skipping message");
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    async fn process(&self, source: &mut dyn MailSource, id: MessageId) -> Result<DeliveryReport, ItemError> {
        let raw = source.fetch(id).await?;
        let item = parse_message(&raw)?.into_item(&self.policy);
        debug!(
            mail_id = %id,
            subject = %item.subject,
            received = ?item.received_at(),
            body_chars = item.body_text().chars().count(),
            links = item.links().len(),
            "parsed message"
        );
        self.announce(&item).await
    }

    /// Render one item and hand it to the sink
    pub async fn announce(&self, item: &AnnouncementItem) -> Result<DeliveryReport, ItemError> {
        let text = self.render(item).await?;
        Ok(self.sink.deliver(&text).await)
    }

    /// Summarise and format one item into the full text to deliver
    pub async fn render(&self, item: &AnnouncementItem) -> Result<String, ItemError> {
        let blocks = match self.layout {
            Layout::Sections => {
                let sections = group_sections(&item.fragments)?;
                let mut summarized = Vec::with_capacity(sections.len());
                for section in sections {
                    let summary = self.summarizer.summarize(&section.body_text).await?;
                    summarized.push(SummarizedSection {
                        heading: section.heading,
                        summary,
                        links: section.links,
                    });
                }
                self.formatter.format_digest(item, &summarized)
            }
            Layout::Fragments => {
                if item.fragments.is_empty() {
                    return Err(ExtractError::NoContent.into());
                }
                let mut fragments = Vec::with_capacity(item.fragments.len());
                for fragment in &item.fragments {
                    let rendered = match fragment {
                        Fragment::Paragraph(text) => Fragment::Paragraph(self.summarizer.summarize(text).await?),
                        other => other.clone(),
                    };
                    fragments.push(rendered);
                }
                self.formatter.format_fragments(&item.subject, &fragments)
            }
        };

        Ok(blocks.join("\n"))
    }
}
