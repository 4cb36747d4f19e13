//! CLI command definitions for wiki_forge.
//!
//! The `generate` command runs one generation job end to end: it builds the
//! credential pool and dispatcher, starts the job, attaches a subscriber and
//! prints replayed and live events until completion.

use clap::Parser;
use std::sync::Arc;
use tracing::info;

use crate::config::{self, CoreConfig, DEFAULT_MODEL, DEFAULT_PROVIDER};
use crate::jobs::{runner, JobEvent, JobRegistry, JobStatus};
use crate::llm::{Dispatcher, OpenAiProvider};
use crate::wiki::{job_key, JobKind, WikiGenerator};

/// Repository wiki generator.
#[derive(Parser)]
#[command(name = "wiki_forge")]
#[command(about = "Generate wiki documentation for source repositories with an LLM")]
#[command(version)]
#[command(
    long_about = "wiki_forge generates wiki-style documentation for a repository through a \
remote LLM provider, rotating across a pool of API keys when rate limited.\n\nExample usage:\n  \
wiki_forge generate --repo acme/widgets\n  wiki_forge generate --repo acme/widgets --question \
\"How does the config layer work?\""
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Generate a repository wiki, or answer a single question about it.
    #[command(alias = "gen")]
    Generate(GenerateArgs),

    /// List the configured credentials for a provider (secrets masked).
    Keys(KeysArgs),
}

/// Arguments for `wiki_forge generate`.
#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// Repository in owner/name form.
    #[arg(long)]
    pub repo: String,

    /// Ask a single question instead of generating the full wiki.
    #[arg(long)]
    pub question: Option<String>,

    /// Model identifier to request from the provider.
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Provider name; credentials are read from <PROVIDER>_API_KEYS.
    #[arg(long, default_value = DEFAULT_PROVIDER)]
    pub provider: String,

    /// Override the provider API base URL.
    #[arg(long, env = "WIKI_FORGE_BASE_URL")]
    pub base_url: Option<String>,
}

/// Arguments for `wiki_forge keys`.
#[derive(Parser, Debug)]
pub struct KeysArgs {
    /// Provider whose pool should be listed.
    #[arg(long, default_value = DEFAULT_PROVIDER)]
    pub provider: String,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the selected command with pre-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Generate(args) => generate(args).await,
        Commands::Keys(args) => keys(args),
    }
}

fn split_repo(repo: &str) -> anyhow::Result<(&str, &str)> {
    match repo.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() => Ok((owner, name)),
        _ => anyhow::bail!("expected repository in owner/name form, got '{repo}'"),
    }
}

async fn generate(args: GenerateArgs) -> anyhow::Result<()> {
    let (owner, name) = split_repo(&args.repo)?;

    let mut core = CoreConfig::new()
        .with_provider(&args.provider)
        .with_model(&args.model);
    if let Some(base_url) = &args.base_url {
        core = core.with_base_url(base_url);
    }

    let pool = Arc::new(config::pool_from_env(&core.provider)?);
    info!(
        provider = core.provider,
        credentials = pool.len(),
        model = core.model,
        "loaded credential pool"
    );

    let dispatcher = Dispatcher::with_cooldown(pool, core.cooldown);
    let api = match &core.base_url {
        Some(base_url) => OpenAiProvider::with_base_url(base_url),
        None => OpenAiProvider::new(),
    };
    let generator = WikiGenerator::new(Arc::new(api), dispatcher, &core.model);

    let registry = JobRegistry::with_event_capacity(core.event_capacity);
    let key = match &args.question {
        Some(_) => job_key(JobKind::Ask, owner, name),
        None => job_key(JobKind::Wiki, owner, name),
    };

    let outcome = match &args.question {
        Some(question) => runner::start(&registry, &key, || {
            generator.answer_stream(owner, name, question)
        }),
        None => runner::start(&registry, &key, || generator.wiki_stream(owner, name)),
    };
    info!(job = key, is_new = outcome.is_new, "generation job started");

    let mut stream = registry
        .attach_stream(&key)
        .ok_or_else(|| anyhow::anyhow!("job '{key}' disappeared before attach"))?;

    while let Some(event) = stream.next_event().await {
        match event {
            JobEvent::Status { message } => eprintln!("==> {message}"),
            JobEvent::Outline { pages } => {
                eprintln!("==> planned pages:");
                for page in pages {
                    eprintln!("      {} ({})", page.title, page.id);
                }
            }
            JobEvent::Chunk { content } => println!("{content}\n"),
            JobEvent::Done => {}
            JobEvent::Error { message } => eprintln!("==> generation failed: {message}"),
        }
    }

    match stream.handle.done().await {
        JobStatus::Error => anyhow::bail!(
            "generation failed: {}",
            registry
                .job_error(&key)
                .unwrap_or_else(|| "unknown error".to_string())
        ),
        status => {
            info!(job = key, %status, "generation finished");
            Ok(())
        }
    }
}

fn keys(args: KeysArgs) -> anyhow::Result<()> {
    let pool = config::pool_from_env(&args.provider)?;
    println!("{} credentials for provider '{}':", pool.len(), args.provider);
    for entry in pool.entries() {
        println!("  {:12} {}", entry.label(), entry.masked());
    }
    Ok(())
}
