//! Converge CLI entrypoint.
//!
//! This is the main entrypoint for the converge command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use converge::cli::{Cli, Commands, LogFormat, OutputFormatter};
use converge::config::{find_config_file, ClusterSpec, ConfigParser, ConfigValidator};
use converge::error::Result;
use converge::reconciler::Reconciler;
use converge::render::Target;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_format);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` takes precedence over the verbosity flag.
fn init_logging(verbose: bool, format: LogFormat) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force).map(|()| ExitCode::SUCCESS),
        Commands::Validate { warnings } => cmd_validate(cli.config.as_ref(), warnings, &formatter),
        Commands::Plan => cmd_plan(cli.config.as_ref(), &formatter).await,
        Commands::Apply { target, out, yes } => {
            cmd_apply(cli.config.as_ref(), target, &out, yes, &formatter).await
        }
    }
}

/// Initialize a new cluster spec.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing cluster spec in: {}", path.display());

    let config_path = path.join("cluster.yaml");
    let env_path = path.join(".env.example");

    if !force && config_path.exists() {
        eprintln!("Cluster spec already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/cluster.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    eprintln!("\nNext steps:");
    eprintln!("  1. Edit cluster.yaml to describe your network and instances");
    eprintln!("  2. Run 'converge validate' to check the spec");
    eprintln!("  3. Run 'converge plan' to see what would change");
    eprintln!("  4. Run 'converge apply' to reconcile, or 'converge apply --target terraform' to render");

    Ok(())
}

/// Validate the cluster spec.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating cluster spec: {}", config_file.display());

    let parser = parser_for(&config_file);
    parser.load_dotenv()?;
    let spec = parser.load_with_env(&config_file)?;

    let result = ConfigValidator::new().check(&spec);
    println!("{}", formatter.format_validation(&spec, &result, show_warnings));

    Ok(if result.is_valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Show the changes a live apply would make.
async fn cmd_plan(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<ExitCode> {
    let reconciler = load_reconciler(config_path)?;
    let cancel = cancel_on_ctrl_c();

    let report = reconciler.plan(&cancel).await?;
    println!("{}", formatter.format_report(&report));

    Ok(exit_code(report.success()))
}

/// Reconcile or render the cluster.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    target: Target,
    out: &Path,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let reconciler = load_reconciler(config_path)?;
    let cancel = cancel_on_ctrl_c();

    if target.is_live() && !auto_approve {
        let preview = reconciler.plan(&cancel).await?;
        println!("{}", formatter.format_report(&preview));

        if !preview.success() {
            eprintln!("Plan has failures; nothing applied.");
            return Ok(ExitCode::FAILURE);
        }
        if !preview.has_changes() {
            eprintln!("No changes to apply.");
            return Ok(ExitCode::SUCCESS);
        }
        if !confirm("Do you want to apply these changes? [y/N]: ")? {
            eprintln!("Apply cancelled.");
            return Ok(ExitCode::SUCCESS);
        }
    }

    let report = reconciler.run(target, &cancel).await?;
    println!("{}", formatter.format_report(&report));

    if let Some(path) = Reconciler::write_artifact(&report, out).await? {
        eprintln!("Wrote {}", path.display());
    } else if target.artifact_format().is_some() {
        warn!("No artifact written for the {target} target because some tasks failed");
    }

    Ok(exit_code(report.success()))
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the cluster spec path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Creates a parser resolving paths next to the spec file.
fn parser_for(config_file: &Path) -> ConfigParser {
    ConfigParser::new().with_base_path(config_file.parent().unwrap_or_else(|| Path::new(".")))
}

/// Loads and validates the spec, then builds a reconciler for it.
fn load_reconciler(config_path: Option<&PathBuf>) -> Result<Reconciler> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading cluster spec from: {}", config_file.display());

    let parser = parser_for(&config_file);
    parser.load_dotenv()?;
    let spec: ClusterSpec = parser.load_with_env(&config_file)?;

    let result = ConfigValidator::new().validate(&spec)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }

    Reconciler::from_spec(spec)
}

/// Returns a token cancelled on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling outstanding tasks");
            token.cancel();
        }
    });
    cancel
}

/// Asks a yes/no question on stderr.
fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

const fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
