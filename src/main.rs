//! any-llm CLI - rate-limited batch dispatch of chat requests to LLM providers.

use anyhow::{Context, Result};
use any_llm::{
    BatchDispatcher, Config, CredentialSource, EnvCredentials, ParsingMode, PendingLedger, Provider,
    RecordDefaults, profile_for,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "any-llm")]
#[command(version)]
#[command(about = "Dispatch batches of chat requests to LLM providers under their rate limits")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch every request in a pending JSONL file
    Dispatch {
        /// Path to pending requests JSONL file
        #[arg(short, long)]
        input: PathBuf,

        /// Path to outcome JSONL file (appended to)
        #[arg(short, long)]
        output: PathBuf,

        /// Provider for records that do not name one
        #[arg(short, long)]
        provider: String,

        /// Model for records that do not name one
        #[arg(short, long)]
        model: String,

        /// Attempts per record (defaults to dispatch.max_attempts)
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Records in flight at once (defaults to dispatch.concurrency)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Parsing mode override (tools, json, md_json, ...)
        #[arg(long)]
        mode: Option<ParsingMode>,

        /// Skip records that already have an outcome in the output file
        #[arg(long)]
        resume: bool,
    },

    /// List known providers and their effective settings
    Providers,

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    Config::load(path.map(PathBuf::as_path))
        .with_context(|| format!("Failed to load config from {path:?}"))
}

fn print_example_config() {
    let example = r#"# any-llm configuration file
# Every key is optional; the values below are the defaults.

[dispatch]
concurrency = 16
max_attempts = 3
request_timeout_secs = 120
# Tokens charged to the limiter when a record has no content to estimate from
default_token_estimate = 1000
show_progress = true

[retry]
# Backoff doubles per attempt: base, 2*base, 4*base, ... capped at max
base_delay_ms = 500
max_delay_ms = 30000

# Per-provider overrides of the built-in registry
[providers.openai]
# base_url = "https://api.openai.com/v1"
# api_key_env = "OPENAI_API_KEY"
requests_per_minute = 500
tokens_per_minute = 90000

[providers.anthropic]
# Point at a proxy; ${VAR} is expanded from the environment
# base_url = "${ANTHROPIC_PROXY}/v1"
requests_per_minute = 50
"#;
    println!("{example}");
}

fn print_providers(config: &Config) {
    println!(
        "{:<10} {:<16} {:<20} {:>6} {:>9}  {:<5} {}",
        "PROVIDER", "DEFAULT MODE", "API KEY ENV", "RPM", "TPM", "KEY", "BASE URL"
    );
    for provider in Provider::ALL {
        let (Ok(profile), Ok(settings)) = (profile_for(provider), config.provider_settings(provider)) else {
            println!("{:<10} (not registered)", provider.as_str());
            continue;
        };
        let mode = if profile.chat_capable {
            profile.default_mode.to_string()
        } else {
            "(no chat)".to_string()
        };
        let has_key = EnvCredentials.lookup(&settings.api_key_env).is_some();
        println!(
            "{:<10} {:<16} {:<20} {:>6} {:>9}  {:<5} {}",
            provider.as_str(),
            mode,
            settings.api_key_env,
            settings.requests_per_minute,
            settings.tokens_per_minute,
            if has_key { "yes" } else { "no" },
            settings.base_url
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Example => {
            print_example_config();
            return Ok(());
        }

        Commands::Providers => {
            let config = load_config(cli.config.as_ref())?;
            print_providers(&config);
            return Ok(());
        }

        Commands::Validate => {
            let config = load_config(cli.config.as_ref())?;

            info!("Configuration is valid");
            info!(
                "  Dispatch: concurrency {}, {} attempts, {}s timeout",
                config.dispatch.concurrency,
                config.dispatch.max_attempts,
                config.dispatch.request_timeout_secs
            );
            info!(
                "  Backoff: {}ms doubling, capped at {}ms",
                config.retry.base_delay_ms, config.retry.max_delay_ms
            );
            for provider in Provider::ALL {
                let Ok(settings) = config.provider_settings(provider) else {
                    continue;
                };
                if EnvCredentials.lookup(&settings.api_key_env).is_some() {
                    info!("  {provider}: credential found in {}", settings.api_key_env);
                } else {
                    warn!("  {provider}: {} is not set", settings.api_key_env);
                }
            }
            return Ok(());
        }

        Commands::Dispatch {
            input,
            output,
            provider,
            model,
            max_attempts,
            concurrency,
            mode,
            resume,
        } => {
            let mut config = load_config(cli.config.as_ref())?;
            if let Some(concurrency) = concurrency {
                config.dispatch.concurrency = concurrency;
            }
            if let Some(max_attempts) = max_attempts {
                config.dispatch.max_attempts = max_attempts;
            }

            let provider: Provider = provider.parse()?;
            let dispatcher =
                BatchDispatcher::for_invocation(&config, Arc::new(EnvCredentials), provider, &model)
                    .with_context(|| format!("Cannot dispatch to {provider}"))?
                    .with_resume(resume)
                    .with_parsing_mode(mode);

            let token = dispatcher.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, letting in-flight requests finish");
                    token.cancel();
                }
            });

            let pending = PendingLedger::new(
                &input,
                RecordDefaults {
                    provider,
                    model: model.clone(),
                    max_attempts: config.dispatch.max_attempts,
                    default_token_estimate: config.dispatch.default_token_estimate,
                },
            );
            let stats = dispatcher.run(&pending, &output).await?;
            let limiter = dispatcher.limiter().stats();

            println!("\n=== Dispatch Complete ===");
            println!("Run:         {}", dispatcher.run_id());
            println!("Records:     {}", stats.total_records);
            println!("Succeeded:   {}", stats.succeeded);
            println!("Failed:      {}", stats.failed);
            println!("Malformed:   {}", stats.malformed.len());
            println!("Skipped:     {}", stats.skipped);
            println!("Interrupted: {}", stats.interrupted);
            println!("Attempts:    {}", stats.total_attempts);
            println!("Throughput:  {:.0}/hr", stats.throughput_per_hour);
            println!("Rate waits:  {} ({:.1}s)", limiter.total_waits, limiter.total_wait_secs);
            println!("Runtime:     {:.1}s", stats.runtime_secs);
            println!("Output:      {output:?}");
            for bad in &stats.malformed {
                println!("  line {}: {}", bad.line, bad.message);
            }
        }
    }

    Ok(())
}
