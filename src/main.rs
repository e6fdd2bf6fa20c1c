//! webrag: answer questions from freshly scraped web pages.
//!
//! Commands:
//! - ask: search, scrape, index and answer with sources
//! - index: rebuild the index for a query without answering
//! - retrieve: show the passages the persisted index yields for a query
//! - config: print the effective configuration with secrets redacted
//! - doctor: check that the chat and embedding endpoints respond

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use webrag::core::config::AppPaths;
use webrag::{logging, Answer, AppState, RagError};

#[derive(Parser)]
#[command(name = "webrag")]
#[command(about = "Answer questions from web search results with cited sources", long_about = None)]
#[command(version)]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the web for the query and answer it
    Ask {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Print {"answer", "sources"} as JSON
        #[arg(long)]
        json: bool,

        /// Print the answer as it is generated
        #[arg(long)]
        stream: bool,
    },

    /// Rebuild the index from a web search without answering
    Index {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },

    /// Show the passages retrieved from the persisted index
    Retrieve {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration (secrets redacted)
    Config,

    /// Check that the chat and embedding endpoints are reachable
    Doctor,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::from(exit_status(&err))
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let paths = Arc::new(AppPaths::new());
    logging::init(&paths, cli.verbose);
    let state = AppState::initialize_with(paths)?;
    let pipeline = &state.pipeline;

    match cli.command {
        Commands::Ask { query, json, stream } => {
            let query = query.join(" ");
            let answer = if stream && !json {
                stream_to_stdout(&state, &query).await?
            } else if stream {
                pipeline.stream_answer(&query).await?.collect().await?
            } else {
                pipeline.answer(&query).await?
            };

            if json {
                print_json(&json!({ "answer": answer.answer, "sources": answer.sources }))?;
            } else {
                if !stream {
                    println!("{}", answer.answer);
                }
                print_sources(&answer);
            }
        }
        Commands::Index { query } => {
            let index = pipeline.build_index(&query.join(" ")).await?;
            println!(
                "Indexed {} chunks ({}-dim, {}) into {} at {}",
                index.len(),
                index.dimension(),
                index.embedding_model(),
                pipeline.index_path().display(),
                index.built_at().to_rfc3339()
            );
        }
        Commands::Retrieve { query, json } => {
            let query = query.join(" ");
            let index = pipeline
                .load_index()
                .context("Run `webrag index <query>` first")?;
            tracing::debug!("Using index built at {}", index.built_at());
            let context = pipeline.retrieve(&query, &index).await?;
            if json {
                print_json(&serde_json::to_value(&context)?)?;
            } else if context.is_empty() {
                println!("No passages matched.");
            } else {
                println!("{}", context.format_context());
            }
        }
        Commands::Config => {
            let config = state.config.load_config()?;
            print_json(&state.config.redact_sensitive_values(&config))?;
        }
        Commands::Doctor => {
            let health = pipeline.check_providers().await;
            let status = |ok: bool| if ok { "ok" } else { "unreachable" };
            println!("chat ({}): {}", state.settings.llm.base_url, status(health.chat));
            println!(
                "embeddings ({}): {}",
                state.settings.embedding.base_url,
                status(health.embeddings)
            );
            if !(health.chat && health.embeddings) {
                bail!("Some model endpoints are unreachable");
            }
        }
    }

    Ok(())
}

async fn stream_to_stdout(state: &AppState, query: &str) -> Result<Answer> {
    let mut stream = state.pipeline.stream_answer(query).await?;
    let mut stdout = std::io::stdout();

    while let Some(text) = stream.next_text().await {
        print!("{}", text?);
        stdout.flush()?;
    }
    println!();

    Ok(stream.finish())
}

/// Exit status 2 when the request itself was at fault, 1 otherwise.
fn exit_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<RagError>() {
        Some(rag) if rag.is_client_error() => 2,
        _ => 1,
    }
}

fn print_sources(answer: &Answer) {
    if answer.sources.is_empty() {
        println!("\nNo sources available.");
        return;
    }
    println!("\nSources:");
    for source in &answer.sources {
        println!("- {}", source);
    }
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_exit_with_status_two() {
        let err = anyhow::Error::new(RagError::BadRequest("Query is required".into()));
        assert_eq!(exit_status(&err), 2);

        let err = anyhow::Error::new(RagError::NotFound("no index".into())).context("Run `webrag index` first");
        assert_eq!(exit_status(&err), 2);

        let err = anyhow::Error::new(RagError::Upstream("down".into()));
        assert_eq!(exit_status(&err), 1);
        assert_eq!(exit_status(&anyhow::anyhow!("plain")), 1);
    }
}
