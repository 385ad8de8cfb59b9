//! Hermes CLI - embed texts and run chat completions from the command line

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hermes_core::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "hermes")]
#[command(about = "Hermes embedding and chat completion CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file; defaults to hermes.toml plus HERMES_* variables
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed a single text and print the vector as JSON
    Embed {
        /// Text to embed
        text: String,
    },
    /// Embed every line of a file ("-" reads stdin)
    Batch {
        /// Input file, one text per line
        input: PathBuf,

        /// Print embeddings as well as the summary
        #[arg(long)]
        with_vectors: bool,
    },
    /// Send a single-turn chat completion
    Chat {
        /// User prompt
        prompt: String,

        /// Optional system prompt
        #[arg(short, long)]
        system: Option<String>,

        /// Override the configured model, e.g. "groq:llama-3.3-70b-versatile"
        #[arg(short, long)]
        model: Option<String>,
    },
    /// List known providers and their capabilities
    Providers,
    /// Version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("hermes {}", env!("CARGO_PKG_VERSION"));
            println!("hermes-core {}", hermes_core::VERSION);
        }
        Commands::Providers => {
            let catalog = ProviderCatalog::seeded();
            for name in catalog.list() {
                let Some(spec) = catalog.get(&name) else {
                    continue;
                };
                println!(
                    "{:<12} embeddings={:<5} dimensions={:<5} {}",
                    spec.name, spec.supports_embeddings, spec.supports_dimensions, spec.base_url
                );
            }
        }
        Commands::Embed { text } => {
            let service = build_service(cli.config)?;
            let vector = service.create_embedding(&text).await?;
            println!("{}", serde_json::to_string(&vector)?);
        }
        Commands::Batch {
            input,
            with_vectors,
        } => {
            let service = build_service(cli.config)?;
            let texts = read_lines(&input)?;

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling remaining batches");
                    on_interrupt.cancel();
                }
            });

            let options = RunOptions::default()
                .with_cancel(cancel)
                .with_progress(Arc::new(|progress: &BatchProgress| {
                    info!(percent = progress.percent(), "{}", progress);
                }));

            let mut result = service.create_embeddings_batch_with(texts, options).await?;
            if !with_vectors {
                result.embeddings.clear();
            }
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Chat {
            prompt,
            system,
            model,
        } => {
            let service = build_service(cli.config)?;
            let mut messages = Vec::new();
            if let Some(system) = system {
                messages.push(Message::system(system));
            }
            messages.push(Message::user(prompt));

            let response = service.chat_completion(messages, model.as_deref()).await?;
            println!("{}", response.content);
            if let Some(usage) = response.usage {
                info!(
                    model = %response.model,
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "Completion usage"
                );
            }
        }
    }

    Ok(())
}

fn build_service(path: Option<PathBuf>) -> Result<HermesService> {
    let config = match path {
        Some(path) => HermesConfig::from_file(&path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => HermesConfig::load().context("Failed to load configuration")?,
    };
    Ok(HermesService::builder(config).build()?)
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let content = if path.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin()).context("Failed to read stdin")?
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?
    };
    Ok(content.lines().map(str::to_string).collect())
}
