//! Send one message through an exchange, optionally resuming a session file.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable. Logs go
//! to stderr and are filtered by `RUST_LOG` (default `warn`).
//!
//! # Examples
//!
//! ```sh
//! exchange "What is the capital of France?"
//!
//! # Continue a saved conversation under a summarizing moderator
//! exchange --session ~/.exchange/sessions/geo.jsonl \
//!     --moderator summarizer --max-context-tokens 20000 "And of Spain?"
//! ```

use std::path::PathBuf;

use clap::Parser;
use exchange_rs::config::DEFAULT_MAX_CONTEXT_TOKENS;
use exchange_rs::prelude::*;
use exchange_rs::providers::provider_by_name;
use exchange_rs::session::{read_session, write_session};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Checkpointed LLM conversations from the command line.
#[derive(Parser)]
#[command(name = "exchange")]
struct Cli {
    /// User message to send.
    message: String,

    /// JSONL session file to resume from and save to.
    #[arg(long)]
    session: Option<PathBuf>,

    // ── Model ──────────────────────────────────────────────────
    /// Provider registry key.
    #[arg(long, default_value = "openrouter")]
    provider: String,

    /// Model to use for completions.
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// System prompt.
    #[arg(long, default_value = "You are a helpful assistant.")]
    system: String,

    /// Sampling temperature.
    #[arg(long)]
    temperature: Option<f32>,

    /// Maximum tokens per response.
    #[arg(long)]
    max_tokens: Option<u32>,

    // ── Context management ─────────────────────────────────────
    /// Moderator: passive, truncate or summarizer.
    #[arg(long, default_value = "truncate")]
    moderator: String,

    /// Token budget before the moderator starts evicting.
    #[arg(long, default_value_t = DEFAULT_MAX_CONTEXT_TOKENS)]
    max_context_tokens: i64,

    /// Model for system prompt probes and summaries.
    #[arg(long)]
    moderator_model: Option<String>,

    /// Maximum model calls per reply while tools are requested.
    #[arg(long, default_value_t = DEFAULT_MAX_TOOL_USE)]
    max_tool_use: usize,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let factory = provider_by_name(&cli.provider)?;
    let provider = factory()?;

    let mut generation = GenerationArgs::default();
    if let Some(temperature) = cli.temperature {
        generation = generation.with_temperature(temperature);
    }
    if let Some(max_tokens) = cli.max_tokens {
        generation = generation.with_max_tokens(max_tokens);
    }
    let config = ExchangeConfig::new(cli.model, cli.system)
        .with_max_tool_use(cli.max_tool_use)
        .with_generation(generation)
        .with_moderator(ModeratorConfig {
            name: cli.moderator,
            max_tokens: cli.max_context_tokens,
            model: cli.moderator_model,
        });
    let mut exchange = config.build(provider, ToolSet::new())?;

    if let Some(path) = &cli.session
        && path.exists()
    {
        let messages = read_session(path).map_err(anyhow::Error::msg)?;
        info!("Resuming {} message(s) from {}", messages.len(), path.display());
        exchange = exchange.replace().with_messages(messages).build();
        if exchange.is_allowed_to_call_llm() {
            warn!("Session ended on an unanswered user message; discarding it");
            exchange.rewind()?;
        }
    }

    exchange.add(Message::user(cli.message))?;
    let result = exchange.reply(config.max_tool_use).await;
    if result.is_err() {
        exchange.rewind()?;
    }

    if let Some(path) = &cli.session {
        write_session(path, exchange.messages())
            .map_err(|e| anyhow::anyhow!("saving session to {}: {e}", path.display()))?;
    }

    let reply = result?;
    println!("{}", reply.text());
    eprintln!("{}", total_cost_message(&exchange.token_usage()));
    Ok(())
}
