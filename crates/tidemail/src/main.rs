//! `tidemail` - offline front end for the tidemail mail cache.
//!
//! Reads the summary caches, the content-addressed mail store and the
//! search index written by `tidemail-core` without touching the network.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tidemail_core::{Config, SearchIndex, Summary, validate_config};
use tidemail_mime::{Message, PartPath, Renderer};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "tidemail", version, about = "Read the tidemail cache offline")]
struct Cli {
    /// Configuration file.
    #[arg(long, global = true, default_value_os_t = Config::default_path())]
    config: PathBuf,

    /// More log output; repeat for trace level.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration.
    Check,
    /// Render a message file as text.
    Render {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = RenderMode::Full)]
        mode: RenderMode,
    },
    /// Extract one part of a message file.
    Part {
        file: PathBuf,
        /// Dotted part path as shown in rendered tags, e.g. `2.1`.
        path: PartPath,
        /// Output file; standard output when omitted.
        out: Option<PathBuf>,
    },
    /// Print the cached summary of a mailbox.
    Summary {
        #[arg(default_value = "INBOX")]
        mailbox: String,
    },
    /// Search the index.
    Search {
        #[arg(required = true)]
        query: Vec<String>,
        #[arg(long, default_value_t = 1)]
        page: usize,
    },
    /// List the thread of an indexed message.
    Thread { cache_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RenderMode {
    /// Headers, part tags and bodies.
    Full,
    /// Configured header fields only.
    Header,
    /// Body quoted for a reply.
    Quote,
}

fn read_message(file: &Path) -> anyhow::Result<Message> {
    let raw = std::fs::read(file).with_context(|| format!("cannot read {}", file.display()))?;
    Ok(Message::parse(raw))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(&cli.config)
        .with_context(|| format!("cannot load {}", cli.config.display()))?;
    debug!("Using data directory {}", config.data_dir.display());

    match cli.command {
        Command::Check => match validate_config(&config) {
            Ok(()) => println!("{}: ok", cli.config.display()),
            Err(errors) => {
                for error in &errors {
                    eprintln!("{}", error.message());
                }
                bail!("{} problem(s) in {}", errors.len(), cli.config.display());
            }
        },
        Command::Render { file, mode } => {
            let message = read_message(&file)?;
            let renderer = Renderer::new(&config.display_header_fields);
            let text = match mode {
                RenderMode::Full => renderer.render(&message),
                RenderMode::Header => renderer.render_header(&message),
                RenderMode::Quote => renderer.quote_reply(&message),
            };
            print!("{text}");
        }
        Command::Part { file, path, out } => {
            let message = read_message(&file)?;
            let renderer = Renderer::new(&config.display_header_fields);
            let body = renderer.dig_part(&message, &path)?.decode_body()?;
            match out {
                Some(out) => {
                    std::fs::write(&out, &body)
                        .with_context(|| format!("cannot write {}", out.display()))?;
                    info!("Wrote part {path} to {}", out.display());
                }
                None => {
                    use std::io::Write;
                    std::io::stdout().write_all(&body)?;
                }
            }
        }
        Command::Summary { mailbox } => {
            let path = config.summary_path(&mailbox);
            let summary = Summary::load(&path)
                .with_context(|| format!("no usable summary for {mailbox}"))?;
            print!("{}", summary.to_text());
        }
        Command::Search { query, page } => {
            let index = SearchIndex::new(&config.index_path()).await?;
            let results = index
                .search(&query.join(" "), page, config.search_page_size)
                .await?;
            for record in &results.records {
                println!("{} {}", record.cache_id, record.summary_line());
            }
            println!(
                "-- page {}/{} ({} matches)",
                results.current_page, results.n_pages, results.total
            );
        }
        Command::Thread { cache_id } => {
            let index = SearchIndex::new(&config.index_path()).await?;
            let record = index
                .get(&cache_id)
                .await?
                .with_context(|| format!("{cache_id} is not indexed"))?;
            for record in index.thread(&record.thread_id).await? {
                println!("{} {}", record.cache_id, record.summary_line());
            }
        }
    }
    Ok(())
}

const fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "tidemail=info,tidemail_core=info",
        1 => "tidemail=debug,tidemail_core=debug",
        _ => "tidemail=trace,tidemail_core=trace,tidemail_mime=trace",
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(cli.verbose).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    run(cli).await
}
