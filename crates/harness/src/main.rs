//! QA harness entry point
//!
//! Runs one component or the whole suite against a running service and
//! exits 0 when everything passed, 1 on verification failures and 2 on
//! environment or harness errors.

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use qa_harness::load::LoadProfile;
use qa_harness::playwright::Browser;
use qa_harness::{
    run_case, CaseResult, FunctionalRun, FuzzRun, HarnessConfig, HarnessError, HarnessResult, LoadRun,
    SuiteReport, UiRun, VisualRun,
};

#[derive(Parser, Debug)]
#[command(name = "qa-harness")]
#[command(author, version, about = "QA harness for the demo login/contact API", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Configuration file
    #[arg(long, env = "QA_CONFIG", default_value = "qa-harness.toml", global = true)]
    config: PathBuf,

    /// API base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Frontend base URL
    #[arg(long, global = true)]
    frontend_url: Option<String>,

    /// Output directory for results
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    /// Write missing baselines and replace mismatching ones
    #[arg(long, global = true)]
    update_baselines: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Direct request checks of every scenario row
    Functional,

    /// Drive the scenario rows through the real pages
    Ui {
        /// Browser to use (chromium, firefox, webkit)
        #[arg(long)]
        browser: Option<Browser>,
    },

    /// Compare page screenshots against baselines
    Visual {
        /// Allowed differing pixels (percentage)
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Run concurrent virtual users
    Load {
        #[arg(long)]
        users: Option<usize>,

        #[arg(long)]
        duration_secs: Option<u64>,

        /// Staged profile (baseline, spike, stress, soak)
        #[arg(long)]
        profile: Option<LoadProfile>,
    },

    /// Fuzz every operation of the published contract
    Fuzz {
        /// Examples per operation
        #[arg(long)]
        max_examples: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Run every component in turn
    All {
        /// Skip the UI and visual components
        #[arg(long)]
        skip_browser: bool,
    },

    /// Print the effective configuration
    Config,
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.global.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with_target(false)
        .init();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(e.exit_code());
        }
    };

    if let Commands::Config = cli.command {
        match toml::to_string_pretty(&config) {
            Ok(text) => {
                print!("{}", text);
                std::process::exit(0);
            }
            Err(e) => {
                error!("Cannot render configuration: {}", e);
                std::process::exit(2);
            }
        }
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            std::process::exit(2);
        }
    };

    let code = rt.block_on(async_main(cli.command, config));
    std::process::exit(code);
}

/// File, then environment, then flags.
fn load_config(cli: &Cli) -> HarnessResult<HarnessConfig> {
    let mut config = HarnessConfig::load(&cli.global.config)?;
    config.apply_env()?;

    let global = &cli.global;
    if let Some(url) = &global.base_url {
        config.target.base_url = url.clone();
    }
    if let Some(url) = &global.frontend_url {
        config.playwright.base_url = url.clone();
    }
    if let Some(dir) = &global.output_dir {
        config.output_dir = dir.clone();
    }
    if global.update_baselines {
        config.visual.update_baselines = true;
    }

    match &cli.command {
        Commands::Ui { browser: Some(browser) } => config.playwright.browser = *browser,
        Commands::Visual { threshold: Some(t) } => config.visual.threshold = *t,
        Commands::Load {
            users,
            duration_secs,
            profile,
        } => {
            if let Some(users) = users {
                config.load.users = *users;
            }
            if let Some(secs) = duration_secs {
                config.load.duration_secs = *secs;
            }
            if profile.is_some() {
                config.load.profile = *profile;
            }
        }
        Commands::Fuzz { max_examples, seed } => {
            if let Some(n) = max_examples {
                config.fuzz.max_examples = *n;
            }
            if seed.is_some() {
                config.fuzz.seed = *seed;
            }
        }
        _ => {}
    }

    config.validate()?;
    Ok(config)
}

async fn async_main(command: Commands, config: HarnessConfig) -> i32 {
    let started_at = Utc::now();
    let cancel = CancellationToken::new();

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping");
            ctrl_c.cancel();
        }
    });

    let cases = match command {
        Commands::Functional => vec![run_case(&FunctionalRun { config: config.clone() }).await],
        Commands::Ui { .. } => vec![run_case(&UiRun { config: config.clone() }).await],
        Commands::Visual { .. } => vec![run_case(&VisualRun { config: config.clone() }).await],
        Commands::Load { .. } => vec![
            run_case(&LoadRun {
                config: config.clone(),
                cancel,
            })
            .await,
        ],
        Commands::Fuzz { .. } => vec![run_case(&FuzzRun { config: config.clone() }).await],
        Commands::All { skip_browser } => run_all(&config, skip_browser, cancel).await,
        Commands::Config => Vec::new(),
    };

    let report = SuiteReport::new(started_at, cases);
    report.log_summary();
    if let Err(e) = report.write_results(&config.output_dir()) {
        error!("Cannot write results: {}", e);
        return HarnessError::exit_code(&e).max(report.exit_code());
    }
    report.exit_code()
}

async fn run_all(config: &HarnessConfig, skip_browser: bool, cancel: CancellationToken) -> Vec<CaseResult> {
    let mut cases = vec![
        run_case(&FunctionalRun { config: config.clone() }).await,
        run_case(&FuzzRun { config: config.clone() }).await,
    ];

    if skip_browser {
        info!("Skipping UI and visual components");
    } else {
        cases.push(run_case(&UiRun { config: config.clone() }).await);
        cases.push(run_case(&VisualRun { config: config.clone() }).await);
    }

    if !cancel.is_cancelled() {
        cases.push(
            run_case(&LoadRun {
                config: config.clone(),
                cancel,
            })
            .await,
        );
    }
    cases
}
