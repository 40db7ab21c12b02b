//! Chunked, retrying delivery to a chat webhook.
//!
//! A message is split into provider-sized chunks and each chunk is POSTed as
//! `{"content": chunk}`, strictly in order. Success is exactly HTTP 204.
//! HTTP 429 sleeps for the server's `Retry-After` and consumes one retry;
//! any other status (or a transport error) consumes one retry and waits the
//! fixed retry delay while budget remains. A chunk that exhausts its budget
//! is abandoned and delivery moves on to the next one.

use crate::config::WebhookConfig;
use crate::format::MAX_BLOCK_LEN;
use crate::segment::{chunk_text, PeriodSegmenter, Segmenter};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Transport-level failures: the request never produced a status
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("failed to reach webhook: {0}")]
    Http(#[from] reqwest::Error),
    #[error("transport error: {0}")]
    Transport(String),
}

/// JSON body accepted by the webhook
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookPayload {
    pub content: String,
}

/// What the endpoint answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostOutcome {
    pub status: u16,
    /// `Retry-After` in whole seconds, when present and numeric
    pub retry_after: Option<u64>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, endpoint: &str, payload: &WebhookPayload) -> Result<PostOutcome, DeliveryError>;
}

/// reqwest-backed transport
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, endpoint: &str, payload: &WebhookPayload) -> Result<PostOutcome, DeliveryError> {
        let response = self.client.post(endpoint).json(payload).send().await?;
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok());
        Ok(PostOutcome {
            status: response.status().as_u16(),
            retry_after,
        })
    }
}

/// Retry and pacing knobs for the sender
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderConfig {
    /// Retry budget per chunk, shared by rate limits and failures
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Pause after each delivered chunk that has a successor
    pub pacing: Duration,
    pub max_chunk_len: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            pacing: Duration::from_secs(1),
            max_chunk_len: MAX_BLOCK_LEN,
        }
    }
}

impl From<&WebhookConfig> for SenderConfig {
    fn from(config: &WebhookConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            pacing: config.pacing(),
            max_chunk_len: config.max_chunk_len,
        }
    }
}

/// Last thing the endpoint (or the network) said about a chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptStatus {
    Http(u16),
    TransportError(String),
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptStatus::Http(code) => write!(f, "HTTP {}", code),
            AttemptStatus::TransportError(e) => write!(f, "{}", e),
        }
    }
}

/// Record of one chunk's delivery, kept for the duration of a send call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAttempt {
    pub index: usize,
    /// Attempts made, including the first
    pub attempts: u32,
    pub retries_used: u32,
    pub last_status: Option<AttemptStatus>,
    pub delivered: bool,
}

/// Outcome of sending one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryReport {
    Delivered { chunks: usize },
    PartiallyDelivered { failed_chunks: Vec<usize>, total: usize },
    Failed { reason: String },
}

impl DeliveryReport {
    fn from_attempts(attempts: &[DeliveryAttempt]) -> Self {
        let failed_chunks: Vec<usize> = attempts
            .iter()
            .filter(|attempt| !attempt.delivered)
            .map(|attempt| attempt.index)
            .collect();

        if failed_chunks.is_empty() {
            return DeliveryReport::Delivered {
                chunks: attempts.len(),
            };
        }
        if failed_chunks.len() == attempts.len() {
            let reason = attempts
                .last()
                .and_then(|attempt| attempt.last_status.as_ref())
                .map(|status| format!("all {} chunk(s) failed, last status {}", attempts.len(), status))
                .unwrap_or_else(|| "all chunks failed".to_string());
            return DeliveryReport::Failed { reason };
        }
        DeliveryReport::PartiallyDelivered {
            failed_chunks,
            total: attempts.len(),
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryReport::Delivered { .. })
    }
}

/// Splits long text into chunks and delivers them in order
pub struct ChunkedSender<T: Transport> {
    transport: T,
    segmenter: Box<dyn Segmenter>,
    config: SenderConfig,
}

impl<T: Transport> ChunkedSender<T> {
    pub fn new(transport: T, config: SenderConfig) -> Self {
        Self {
            transport,
            segmenter: Box::new(PeriodSegmenter),
            config,
        }
    }

    pub fn with_segmenter(mut self, segmenter: Box<dyn Segmenter>) -> Self {
        self.segmenter = segmenter;
        self
    }

    /// The chunks `send` would deliver for `text`
    pub fn chunks(&self, text: &str) -> Vec<String> {
        chunk_text(text, self.segmenter.as_ref(), self.config.max_chunk_len)
    }

    pub async fn send(&self, endpoint: &str, text: &str) -> DeliveryReport {
        let attempts = self.send_detailed(endpoint, text).await;
        DeliveryReport::from_attempts(&attempts)
    }

    /// Deliver every chunk in order and return one record per chunk
    pub async fn send_detailed(&self, endpoint: &str, text: &str) -> Vec<DeliveryAttempt> {
        let chunks = self.chunks(text);
        let total = chunks.len();
        let mut records = Vec::with_capacity(total);

        for (index, chunk) in chunks.into_iter().enumerate() {
            let record = self.deliver_chunk(endpoint, index, chunk).await;
            let delivered = record.delivered;
            records.push(record);

            if delivered && index + 1 < total && !self.config.pacing.is_zero() {
                tokio::time::sleep(self.config.pacing).await;
            }
        }

        records
    }

    async fn deliver_chunk(&self, endpoint: &str, index: usize, content: String) -> DeliveryAttempt {
        let max_retries = self.config.max_retries;
        let payload = WebhookPayload { content };
        let mut record = DeliveryAttempt {
            index,
            attempts: 0,
            retries_used: 0,
            last_status: None,
            delivered: false,
        };

        while record.retries_used <= max_retries {
            record.attempts += 1;
            match self.transport.post(endpoint, &payload).await {
                Ok(PostOutcome { status: 204, .. }) => {
                    record.last_status = Some(AttemptStatus::Http(204));
                    record.delivered = true;
                    debug!(chunk = index, attempts = record.attempts, "chunk delivered");
                    break;
                }
                Ok(PostOutcome {
                    status: 429,
                    retry_after,
                }) => {
                    record.last_status = Some(AttemptStatus::Http(429));
                    let delay = retry_after
                        .map(Duration::from_secs)
                        .unwrap_or(self.config.retry_delay);
                    info!(chunk = index, delay_secs = delay.as_secs(), "rate limited, waiting");
                    tokio::time::sleep(delay).await;
                    record.retries_used += 1;
                }
                outcome => {
                    let status = match outcome {
                        Ok(PostOutcome { status, .. }) => AttemptStatus::Http(status),
                        Err(e) => AttemptStatus::TransportError(e.to_string()),
                    };
                    warn!(chunk = index, status = %status, retries = record.retries_used + 1, "chunk delivery failed");
                    record.last_status = Some(status);
                    record.retries_used += 1;
                    if record.retries_used < max_retries {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        if !record.delivered {
            warn!(chunk = index, attempts = record.attempts, "giving up on chunk");
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::Instant;

    /// Answers from a script, repeating the last entry once it runs dry
    #[derive(Clone)]
    struct Scripted {
        responses: Arc<Mutex<VecDeque<PostOutcome>>>,
        sent: Arc<Mutex<Vec<(Instant, String)>>>,
    }

    impl Scripted {
        fn new(responses: &[PostOutcome]) -> Self {
            Self {
                responses: Arc::new(Mutex::new(responses.iter().copied().collect())),
                sent: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn sent(&self) -> Vec<(Instant, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn post(&self, _endpoint: &str, payload: &WebhookPayload) -> Result<PostOutcome, DeliveryError> {
            self.sent.lock().unwrap().push((Instant::now(), payload.content.clone()));
            let mut responses = self.responses.lock().unwrap();
            let next = if responses.len() > 1 {
                responses.pop_front()
            } else {
                responses.front().copied()
            };
            Ok(next.unwrap_or(status(204)))
        }
    }

    struct Unreachable;

    #[async_trait]
    impl Transport for Unreachable {
        async fn post(&self, _endpoint: &str, _payload: &WebhookPayload) -> Result<PostOutcome, DeliveryError> {
            Err(DeliveryError::Transport("connection refused".into()))
        }
    }

    fn status(code: u16) -> PostOutcome {
        PostOutcome {
            status: code,
            retry_after: None,
        }
    }

    fn rate_limited(secs: u64) -> PostOutcome {
        PostOutcome {
            status: 429,
            retry_after: Some(secs),
        }
    }

    fn config(max_retries: u32) -> SenderConfig {
        SenderConfig {
            max_retries,
            ..SenderConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_then_failure_then_success() {
        let transport = Scripted::new(&[rate_limited(2), status(500), status(204)]);
        let sender = ChunkedSender::new(transport.clone(), config(3));

        let start = Instant::now();
        let records = sender.send_detailed("https://hook", "hello").await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[1].0 - start, Duration::from_secs(2));
        assert_eq!(sent[2].0 - start, Duration::from_secs(7));
        assert_eq!(records.len(), 1);
        assert!(records[0].delivered);
        assert_eq!(records[0].retries_used, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failure_attempts_initial_plus_retries() {
        let transport = Scripted::new(&[status(500)]);
        let sender = ChunkedSender::new(transport.clone(), config(2));

        let start = Instant::now();
        let report = sender.send("https://hook", "hello").await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 3);
        // Delay only while budget remains: after the first failure, not the second
        assert_eq!(sent[1].0 - start, Duration::from_secs(5));
        assert_eq!(sent[2].0 - start, Duration::from_secs(5));
        assert!(matches!(report, DeliveryReport::Failed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_consume_the_retry_budget() {
        let transport = Scripted::new(&[rate_limited(1)]);
        let sender = ChunkedSender::new(transport.clone(), config(3));

        let records = sender.send_detailed("https://hook", "hello").await;
        assert_eq!(transport.sent().len(), 4);
        assert_eq!(records[0].retries_used, 4);
        assert!(!records[0].delivered);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_retry_after_uses_retry_delay() {
        let transport = Scripted::new(&[status(429), status(204)]);
        let sender = ChunkedSender::new(transport.clone(), config(3));

        let start = Instant::now();
        sender.send("https://hook", "hello").await;
        assert_eq!(transport.sent()[1].0 - start, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_chunk_does_not_stop_later_chunks() {
        let transport = Scripted::new(&[status(500), status(500), status(500), status(204)]);
        let sender = ChunkedSender::new(
            transport.clone(),
            SenderConfig {
                max_retries: 2,
                max_chunk_len: 10,
                ..SenderConfig::default()
            },
        );

        let report = sender.send("https://hook", "aaaaaaaa.bbbbbbbb").await;
        let sent = transport.sent();
        let contents: Vec<&str> = sent.iter().map(|(_, c)| c.as_str()).collect();
        assert_eq!(contents, vec!["aaaaaaaa", "aaaaaaaa", "aaaaaaaa", "bbbbbbbb"]);
        assert_eq!(
            report,
            DeliveryReport::PartiallyDelivered {
                failed_chunks: vec![0],
                total: 2
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_are_paced_and_ordered() {
        let transport = Scripted::new(&[status(204)]);
        let sender = ChunkedSender::new(
            transport.clone(),
            SenderConfig {
                max_chunk_len: 5,
                ..SenderConfig::default()
            },
        );

        let start = Instant::now();
        let report = sender.send("https://hook", "one.two.three").await;
        let sent = transport.sent();

        let contents: Vec<&str> = sent.iter().map(|(_, c)| c.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
        assert_eq!(sent[1].0 - start, Duration::from_secs(1));
        assert_eq!(sent[2].0 - start, Duration::from_secs(2));
        assert_eq!(report, DeliveryReport::Delivered { chunks: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn single_chunk_at_limit_is_sent_unmodified() {
        let transport = Scripted::new(&[status(204)]);
        let sender = ChunkedSender::new(transport.clone(), SenderConfig::default());
        let text = "z".repeat(MAX_BLOCK_LEN);

        let report = sender.send("https://hook", &text).await;
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(transport.sent()[0].1, text);
        assert!(report.is_delivered());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_text_sends_nothing() {
        let transport = Scripted::new(&[status(204)]);
        let sender = ChunkedSender::new(transport.clone(), SenderConfig::default());

        let report = sender.send("https://hook", "").await;
        assert!(transport.sent().is_empty());
        assert_eq!(report, DeliveryReport::Delivered { chunks: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_count_as_failures() {
        let sender = ChunkedSender::new(Unreachable, config(1));
        let records = sender.send_detailed("https://hook", "hello").await;

        assert_eq!(records[0].attempts, 2);
        assert_eq!(
            records[0].last_status,
            Some(AttemptStatus::TransportError("transport error: connection refused".into()))
        );
    }

    struct LineSegmenter;

    impl Segmenter for LineSegmenter {
        fn delimiter(&self) -> &str {
            "\n"
        }

        fn segments<'a>(&self, text: &'a str) -> Vec<&'a str> {
            text.split('\n').collect()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sender_chunks_with_the_configured_segmenter() {
        let transport = Scripted::new(&[status(204)]);
        let sender = ChunkedSender::new(
            transport.clone(),
            SenderConfig {
                max_chunk_len: 7,
                ..SenderConfig::default()
            },
        )
        .with_segmenter(Box::new(LineSegmenter));

        let report = sender.send("https://hook", "a.b\nc.d\ne").await;
        let contents: Vec<String> = transport.sent().into_iter().map(|(_, c)| c).collect();
        assert_eq!(contents, vec!["a.b\nc.d".to_string(), "e".to_string()]);
        assert_eq!(report, DeliveryReport::Delivered { chunks: 2 });
    }

    fn headers_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(end) = text.find("\r\n\r\n") else {
            return false;
        };
        let body_len = text[..end]
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        request.len() >= end + 4 + body_len
    }

    /// Answer a single request on a local port with a canned response
    async fn serve_once(response: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !headers_complete(&request) {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{}/hook", addr)
    }

    async fn post_to(response: &str) -> PostOutcome {
        let endpoint = serve_once(response.to_string()).await;
        let transport = HttpTransport::new(Client::builder().no_proxy().build().unwrap());
        let payload = WebhookPayload {
            content: "hello".into(),
        };
        transport.post(&endpoint, &payload).await.unwrap()
    }

    #[tokio::test]
    async fn http_transport_reads_retry_after() {
        let outcome = post_to(
            "HTTP/1.1 429 Too Many Requests\r\nRetry-After: 2\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert_eq!(
            outcome,
            PostOutcome {
                status: 429,
                retry_after: Some(2)
            }
        );
    }

    #[tokio::test]
    async fn http_transport_ignores_non_numeric_retry_after() {
        let outcome = post_to(
            "HTTP/1.1 429 Too Many Requests\r\nRetry-After: Wed, 21 Oct 2026 07:28:00 GMT\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert_eq!(outcome, status(429));
    }

    #[tokio::test]
    async fn http_transport_without_retry_after() {
        let outcome =
            post_to("HTTP/1.1 429 Too Many Requests\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
        assert_eq!(outcome, status(429));

        let delivered = post_to("HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n").await;
        assert_eq!(delivered, status(204));
    }

    #[test]
    fn payload_serialises_as_content_object() {
        let payload = WebhookPayload {
            content: "hi".into(),
        };
        assert_eq!(serde_json::to_string(&payload).unwrap(), r#"{"content":"hi"}"#);
    }
}
