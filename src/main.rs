//! Mailcast CLI - newsletter mail to chat webhook
//!
//! The application logic is contained in lib.rs, and this file is responsible
//! for parsing arguments and handling top-level errors.

use anyhow::Context;
use clap::{Parser, Subcommand};
use mailcast::agent::ChatCompletionAgent;
use mailcast::format::Formatter;
use mailcast::logging;
use mailcast::mail::ImapInbox;
use mailcast::pipeline::{Sink, StdoutSink, WebhookSink};
use mailcast::webhook::{HttpTransport, SenderConfig};
use mailcast::{ChunkedSender, Config, Pipeline};
use std::io::Read;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "mailcast")]
#[command(author, version, about = "Relay newsletter mail as summarised chat webhook posts", long_about = None)]
struct Cli {
    /// Path to a mailcast.toml (defaults to ./mailcast.toml or ~/.config/mailcast/)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarise unread mail and post it to the webhook
    Run {
        /// Print the messages instead of posting them
        #[arg(long)]
        dry_run: bool,
        /// Treat partially delivered messages as failures
        #[arg(long)]
        strict: bool,
    },
    /// Post text (or stdin with "-") through the chunked sender
    Send {
        text: String,
    },
    /// Show how text (or stdin with "-") would be chunked
    Chunks {
        text: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load()?,
    };

    match cli.command.unwrap_or(Commands::Run {
        dry_run: false,
        strict: false,
    }) {
        Commands::Run { dry_run, strict } => run(&config, dry_run, strict).await,
        Commands::Send { text } => {
            let text = read_text(&text)?;
            let endpoint = config.webhook_url()?;
            let sender = ChunkedSender::new(HttpTransport::default(), SenderConfig::from(&config.webhook));

            let records = sender.send_detailed(endpoint, &text).await;
            for record in &records {
                let status = record
                    .last_status
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "chunk {}: {} after {} attempt(s), last status {}",
                    record.index + 1,
                    if record.delivered { "delivered" } else { "failed" },
                    record.attempts,
                    status
                );
            }
            if records.iter().any(|record| !record.delivered) {
                anyhow::bail!("some chunks were not delivered");
            }
            Ok(())
        }
        Commands::Chunks { text } => {
            let text = read_text(&text)?;
            let sink = StdoutSink::new(config.webhook.max_chunk_len);
            sink.deliver(&text).await;
            Ok(())
        }
    }
}

async fn run(config: &Config, dry_run: bool, strict: bool) -> anyhow::Result<()> {
    if dry_run {
        config.validate_sources()?;
    } else {
        config.validate()?;
    }

    let summarizer = ChatCompletionAgent::from_config(config)?;
    let sink: Box<dyn Sink> = if dry_run {
        Box::new(StdoutSink::new(config.webhook.max_chunk_len))
    } else {
        let sender = ChunkedSender::new(HttpTransport::default(), SenderConfig::from(&config.webhook));
        Box::new(WebhookSink::new(sender, config.webhook_url()?))
    };
    let pipeline = Pipeline::new(Box::new(summarizer), sink)
        .with_layout(config.digest.layout)
        .with_policy(config.digest.tags)
        .with_formatter(Formatter::new(config.webhook.max_chunk_len));

    let mut inbox = ImapInbox::connect(&config.mail)
        .await
        .context("connecting to mailbox")?;
    let result = pipeline.run(&mut inbox).await;
    if let Err(e) = inbox.logout().await {
        warn!(error = %e, "logout failed");
    }
    let summary = result?;

    info!(
        processed = summary.processed,
        delivered = summary.delivered,
        partial = summary.partial,
        failed = summary.failed,
        "run finished"
    );
    if summary.has_failures(strict) {
        anyhow::bail!(
            "{} of {} message(s) were not fully delivered",
            summary.failed + if strict { summary.partial } else { 0 },
            summary.processed
        );
    }
    Ok(())
}

/// Literal text, or all of stdin for "-"
fn read_text(arg: &str) -> anyhow::Result<String> {
    if arg != "-" {
        return Ok(arg.to_string());
    }
    let mut text = String::new();
    std::io::stdin().read_to_string(&mut text)?;
    Ok(text)
}
