use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use remedy::collect::ProducerOutput;
use remedy::config::{Config, CONFIG_FILE};
use remedy::defect::ProducerKind;
use remedy::fix::FixGenerator;
use remedy::pipeline::{CancelFlag, Pipeline};
use remedy::reasoning::{OpenRouterBackend, OpenRouterSettings, ReasoningBackend, UnavailableBackend};
use remedy::verify::{CommandSuite, Verifier};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "remedy",
    about = "Collect defects, fix them one at a time, keep only what passes the regression suite",
    version
)]
struct Cli {
    /// Path to the repository (defaults to current directory)
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    /// Debug logging (overridden by REMEDY_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the diagnostic producers and merge their defects
    Collect {
        /// Read saved producer output from a file instead of running producers
        #[arg(long, requires = "kind")]
        from: Option<PathBuf>,

        /// Producer kind of the saved output: type_check, static_analysis or test_failure
        #[arg(long)]
        kind: Option<String>,
    },
    /// Attempt the next batch of open defects
    Fix {
        /// Defects to attempt in this run
        #[arg(short, long)]
        batch: Option<usize>,
    },
    /// Collect, then fix
    Run {
        #[arg(short, long)]
        batch: Option<usize>,
    },
    /// Show defect and fix-history statistics
    Report {
        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },
    /// Return blocked defects to the queue
    Unblock {
        /// Defect id
        #[arg(required_unless_present = "all")]
        id: Option<String>,

        #[arg(long, conflicts_with = "id")]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    remedy::logging::init(cli.verbose);

    let repo = cli
        .repo
        .canonicalize()
        .with_context(|| format!("Repository not found: {}", cli.repo.display()))?;
    let mut config = Config::load(&repo);

    match cli.command {
        Command::Collect { from, kind } => {
            let mut pipeline = Pipeline::open(&repo, config)?;
            let summary = match from {
                Some(file) => {
                    let kind = parse_kind(kind.as_deref())?;
                    let text = fs::read_to_string(&file)
                        .with_context(|| format!("Failed to read {}", file.display()))?;
                    let name = file.display().to_string();
                    pipeline.ingest(vec![ProducerOutput::from_saved(&name, kind, text)])?
                }
                None => pipeline.collect()?,
            };
            print!("{}", summary.display());
        }
        Command::Fix { batch } => {
            if let Some(batch) = batch {
                config.batch_size = batch.max(1);
            }
            let verifier = build_verifier(&repo, &config)?;
            let generator = build_generator(&config);
            let mut pipeline = Pipeline::open(&repo, config)?;
            fix(&mut pipeline, &generator, &verifier).await?;
        }
        Command::Run { batch } => {
            if let Some(batch) = batch {
                config.batch_size = batch.max(1);
            }
            let verifier = build_verifier(&repo, &config)?;
            let generator = build_generator(&config);
            let mut pipeline = Pipeline::open(&repo, config)?;
            let summary = pipeline.collect()?;
            print!("{}", summary.display());
            println!();
            fix(&mut pipeline, &generator, &verifier).await?;
        }
        Command::Report { json } => {
            let pipeline = Pipeline::open(&repo, config)?;
            let report = pipeline.report();
            if json {
                println!("{}", report.to_json()?);
            } else {
                print!("{}", report.render());
            }
        }
        Command::Unblock { id, all } => {
            let mut pipeline = Pipeline::open(&repo, config)?;
            if all {
                let count = pipeline.unblock_all()?;
                println!("Unblocked {} defects", count);
            } else if let Some(id) = id {
                if !pipeline.unblock(&id)? {
                    bail!("{} is not a blocked defect", id);
                }
                println!("Unblocked {}", id);
            }
        }
    }

    Ok(())
}

async fn fix(pipeline: &mut Pipeline, generator: &FixGenerator, verifier: &dyn Verifier) -> Result<()> {
    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing the current defect");
            on_signal.cancel();
        }
    });

    let summary = pipeline.fix_batch(generator, verifier, &cancel).await?;
    print!("{}", summary.display());
    Ok(())
}

fn parse_kind(kind: Option<&str>) -> Result<ProducerKind> {
    let Some(kind) = kind else {
        bail!("--kind is required with --from");
    };
    ProducerKind::parse(kind).with_context(|| {
        format!(
            "Unknown producer kind '{}' (expected type_check, static_analysis or test_failure)",
            kind
        )
    })
}

fn build_verifier(repo: &Path, config: &Config) -> Result<CommandSuite> {
    let suite = if config.verification.is_empty() {
        CommandSuite::detect(repo)
    } else {
        CommandSuite::new(
            config
                .verification
                .iter()
                .filter_map(|command| command.to_spec(repo))
                .collect(),
        )
    };
    if suite.is_empty() {
        bail!(
            "No verification commands: add [[verification]] entries to {} (project type not detected)",
            CONFIG_FILE
        );
    }
    info!(checks = %suite.describe(), "verification suite");
    Ok(suite)
}

fn build_generator(config: &Config) -> FixGenerator {
    let reasoning = &config.reasoning;
    let backend: Arc<dyn ReasoningBackend> = match reasoning.api_key() {
        Some(api_key) => {
            let settings = OpenRouterSettings {
                api_key,
                model: reasoning.model.clone(),
                base_url: reasoning.base_url.clone(),
                request_timeout: Duration::from_secs(reasoning.timeout_secs),
            };
            match OpenRouterBackend::new(settings) {
                Ok(backend) => Arc::new(backend),
                Err(err) => {
                    warn!(error = %err, "reasoning backend unavailable, defects will be skipped");
                    Arc::new(UnavailableBackend::new(err.to_string()))
                }
            }
        }
        None => {
            warn!(
                env = %reasoning.api_key_env,
                "no API key set, defects will be skipped"
            );
            Arc::new(UnavailableBackend::new(format!(
                "{} is not set",
                reasoning.api_key_env
            )))
        }
    };

    FixGenerator::new(backend)
        .with_strategies(config.strategies.clone())
        .with_context_radius(config.context_radius)
        .with_call_timeout(Duration::from_secs(reasoning.timeout_secs))
        .with_max_tokens(reasoning.max_tokens)
        .with_policy(config.consensus)
}
