//! # docbot CLI
//!
//! Ingest a directory of `.docx` files and answer questions grounded in them.
//!
//! ## Usage
//!
//! ```bash
//! docbot --config ./config/docbot.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docbot ingest [--dir DIR]` | Extract, chunk, embed, and index documents |
//! | `docbot ask "<question>"` | Answer one question |
//! | `docbot chat` | Interactive session (`sair` or `exit` to quit) |
//! | `docbot clear` | Delete every indexed record |
//! | `docbot status` | Show backend and readiness |
//! | `docbot serve` | Start the HTTP server |
//!
//! Logs go to stderr; answers go to stdout.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use docbot::bot::ChatBot;
use docbot::config::{self, Config};
use docbot::error::RagError;
use docbot::models::{ChatRequest, ChatResponse, Hints};
use docbot::server;

const EXIT_WORDS: [&str; 2] = ["sair", "exit"];

/// docbot: answers questions from your documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docbot.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docbot",
    about = "Document-grounded question answering over .docx files",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docbot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest documents into the configured index.
    Ingest {
        /// Directory to scan. Defaults to `docs.dir`.
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Answer a single question.
    Ask {
        question: String,

        /// Company name folded into the instruction.
        #[arg(long)]
        company_name: Option<String>,

        /// Company segment folded into the instruction.
        #[arg(long)]
        company_type: Option<String>,

        /// Request the structured (JSON) answer contract.
        #[arg(long)]
        structured: bool,
    },

    /// Interactive question loop.
    Chat,

    /// Delete every indexed record.
    Clear,

    /// Show the index backend and whether documents are loaded.
    Status,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg);

    match cli.command {
        Commands::Ingest { dir } => {
            let bot = ChatBot::from_config(&cfg).await?;
            let dir = dir.unwrap_or_else(|| cfg.docs.dir.clone());
            let result = bot.ingest(&dir).await?;
            if result.success {
                println!(
                    "Ingested {} document(s) into {} record(s); {} skipped.",
                    result.documents, result.records, result.skipped
                );
            } else {
                anyhow::bail!("ingestion failed: {}", result.reason);
            }
        }
        Commands::Ask {
            question,
            company_name,
            company_type,
            structured,
        } => {
            let bot = ChatBot::from_config(&cfg).await?;
            let request = ChatRequest {
                message: question,
                hints: Hints {
                    company_name,
                    company_type,
                },
                structured: structured.then_some(true),
            };
            let response = bot.answer(&request).await.map_err(explain)?;
            print_response(&response)?;
        }
        Commands::Chat => {
            let bot = ChatBot::from_config(&cfg).await?;
            run_chat(&bot).await?;
        }
        Commands::Clear => {
            let bot = ChatBot::from_config(&cfg).await?;
            if !bot.clear().await {
                anyhow::bail!("failed to clear the index");
            }
            println!("Index cleared.");
        }
        Commands::Status => {
            let bot = ChatBot::from_config(&cfg).await?;
            println!("backend: {}", bot.index().name());
            println!("ready:   {}", bot.is_ready().await);
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

fn init_tracing(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.logging.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cfg.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn explain(err: RagError) -> anyhow::Error {
    match err {
        RagError::NotReady => anyhow::anyhow!(
            "documents have not been processed yet; run `docbot ingest` first"
        ),
        other => other.into(),
    }
}

fn print_response(response: &ChatResponse) -> anyhow::Result<()> {
    match response {
        ChatResponse::Text(text) => println!("{}", text),
        ChatResponse::Structured(answer) => {
            println!("{}", serde_json::to_string_pretty(answer)?)
        }
    }
    Ok(())
}

async fn run_chat(bot: &ChatBot) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Bem-vindo ao docbot! Digite 'sair' para encerrar.");
    loop {
        print!("Você: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await.context("reading stdin")? else {
            break;
        };
        let input = line.trim();
        if EXIT_WORDS.iter().any(|w| input.eq_ignore_ascii_case(w)) {
            break;
        }
        if input.is_empty() {
            continue;
        }

        match bot.answer(&ChatRequest::new(input)).await {
            Ok(ChatResponse::Text(text)) => println!("Bot: {}", text),
            Ok(ChatResponse::Structured(answer)) => {
                println!("Bot: {}", serde_json::to_string_pretty(&answer)?)
            }
            Err(e) => println!("Bot: {}", explain(e)),
        }
    }
    println!("Até mais!");
    Ok(())
}
