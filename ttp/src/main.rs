//! Command-line mapper from informal activity text to ATT&CK and NICE ids.
//!
//! ```bash
//! cargo run -p ttp -- map "sent a fake login page to finance"
//! cargo run -p ttp -- interactive --focus ksa
//! cargo run -p ttp -- simplify mitre data/enterprise-attack.json data/mitre_simple.json
//! ```

mod interactive;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use ttp_core::{simplify, ConfigError, Focus, MapperConfig, Orchestrator, Report};

#[derive(Parser)]
#[command(name = "ttp")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Grounded mapping of activity descriptions to MITRE ATT&CK and NICE", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Directory holding mitre_simple.json and nice_simple.json
    #[arg(long, global = true, env = "TTP_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Gemini model to use
    #[arg(long, global = true, env = "TTP_MODEL")]
    model: Option<String>,

    /// Draft/verify attempts per run
    #[arg(long, global = true, env = "TTP_MAX_ATTEMPTS")]
    max_attempts: Option<usize>,

    /// Ground generation with Google Search
    #[arg(long, global = true)]
    search: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Map one activity description and print the report
    Map {
        /// Activity text (read from --file when omitted)
        text: Option<String>,

        /// Read the activity text from a file
        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,

        /// mitre, ksa or both
        #[arg(long, default_value = "both", value_parser = parse_focus)]
        focus: Focus,
    },

    /// Map descriptions line by line from stdin
    Interactive {
        /// mitre, ksa or both
        #[arg(long, default_value = "both", value_parser = parse_focus)]
        focus: Focus,
    },

    /// Convert a published corpus into a knowledge base snapshot
    Simplify {
        corpus: Corpus,
        /// Published corpus file
        input: PathBuf,
        /// Snapshot to write
        output: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Corpus {
    /// ATT&CK STIX bundle (enterprise-attack.json)
    Mitre,
    /// NICE framework components export
    Nice,
}

fn parse_focus(s: &str) -> Result<Focus, String> {
    s.parse()
}

fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_env("TTP_LOG").unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    // Logs go to stderr so stdout only carries reports.
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

/// Attach a setup hint to a missing API key; other config errors speak for themselves.
fn config_error(err: ConfigError) -> anyhow::Error {
    match err {
        ConfigError::MissingApiKey => anyhow::Error::new(err).context(
            "set GEMINI_API_KEY in a .env file or with: export GEMINI_API_KEY=your_key_here",
        ),
        other => anyhow::Error::new(other).context("invalid configuration"),
    }
}

impl Cli {
    /// Environment config with command-line overrides applied.
    fn config(&self) -> Result<MapperConfig> {
        let mut config = MapperConfig::from_env().map_err(config_error)?;

        if let Some(ref dir) = self.data_dir {
            config = config.with_data_dir(dir);
        }
        if let Some(ref model) = self.model {
            config = config.with_model(model);
        }
        if let Some(attempts) = self.max_attempts {
            config = config.with_max_attempts(attempts);
        }
        if self.search {
            config = config.with_search_grounding(true);
        }

        Ok(config)
    }
}

async fn load_orchestrator(cli: &Cli) -> Result<Orchestrator> {
    let config = cli.config()?;
    tracing::info!(
        model = %config.model,
        max_attempts = config.max_attempts,
        data_dir = %config.data_dir.display(),
        "starting mapper"
    );
    Ok(Orchestrator::from_config(&config).await)
}

async fn cmd_map(cli: &Cli, text: Option<&str>, file: Option<&Path>, focus: Focus) -> Result<()> {
    let input = match (text, file) {
        (Some(text), _) => text.to_string(),
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => bail!("provide the activity text or --file <PATH>"),
    };
    let input = input.trim();
    if input.is_empty() {
        bail!("activity text is empty");
    }

    let orchestrator = load_orchestrator(cli).await?;
    let outcome = orchestrator.run(input, focus).await;
    print!("{}", Report::new(input, &outcome));
    Ok(())
}

async fn cmd_simplify(corpus: Corpus, input: &Path, output: &Path) -> Result<()> {
    let count = match corpus {
        Corpus::Mitre => simplify::simplify_attack_file(input, output).await,
        Corpus::Nice => simplify::simplify_nice_file(input, output).await,
    }
    .with_context(|| format!("failed to simplify {}", input.display()))?;

    println!("Saved {count} records to {}", output.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    match &cli.command {
        Commands::Map { text, file, focus } => {
            cmd_map(&cli, text.as_deref(), file.as_deref(), *focus).await
        }
        Commands::Interactive { focus } => {
            let orchestrator = load_orchestrator(&cli).await?;
            interactive::run_interactive(&orchestrator, *focus).await
        }
        Commands::Simplify {
            corpus,
            input,
            output,
        } => cmd_simplify(*corpus, input, output).await,
    }
}
