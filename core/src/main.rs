use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use nullbytes_wipe::executor::ProgressEvent;
use nullbytes_wipe::host::detect_host;
use nullbytes_wipe::safety::SafetyVerdict;
use nullbytes_wipe::ui::display;
use nullbytes_wipe::ui::WipeProgressBar;
use nullbytes_wipe::verification::VerificationResult;
use nullbytes_wipe::*;
use std::io;
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "nullbytes")]
#[command(about = "Auditable secure erasure of block devices")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (TOML); defaults to the per-user config directory
    #[arg(long, global = true, env = "NULLBYTES_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Run destructive commands without root (image files, test rigs)
    #[arg(long, global = true)]
    allow_non_root: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List erasable devices
    List {
        #[arg(long)]
        json: bool,
    },

    /// Show the safety verdict and plan for a device without touching it
    Check {
        /// Device path (e.g., /dev/sdb)
        device: String,

        /// clear, purge or destroy
        #[arg(short, long)]
        method: Option<String>,
    },

    /// Wipe a device and write a compliance record
    Wipe {
        /// Device path (e.g., /dev/sdb)
        device: String,

        /// clear, purge or destroy
        #[arg(short, long)]
        method: String,

        /// Record output path (defaults to records_dir)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Operator name for the record
        #[arg(long)]
        operator: Option<String>,

        /// Unmount the device's file systems first
        #[arg(long)]
        unmount: bool,

        /// Skip the typed confirmation
        #[arg(short, long)]
        yes: bool,

        /// Progress as JSON lines, outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Sample the start of a device and report whether it reads as zeros
    Verify {
        device: String,
    },

    /// Show the available wipe methods for this host
    Methods,
}

fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

fn init_logging(cli: &Cli) -> Result<Option<WorkerGuard>> {
    let default_level = if cli.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let console = if cli.log_json {
        fmt::layer().json().with_writer(io::stderr).boxed()
    } else {
        fmt::layer().with_target(false).with_writer(io::stderr).boxed()
    };

    let (file_layer, guard) = match &cli.log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let name = path
                .file_name()
                .context("--log-file must name a file")?;
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = fmt::layer().with_ansi(false).with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

/// SIGINT/SIGTERM flip the cancel token; the executor does the rest
fn setup_signal_handlers(cancel: CancelToken) -> Result<()> {
    use signal_hook::{
        consts::{SIGINT, SIGTERM},
        iterator::Signals,
    };

    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    std::thread::spawn(move || {
        for sig in signals.forever() {
            eprintln!(
                "\n{} signal {} received, stopping the wipe...",
                "Cancelling:".yellow().bold(),
                sig
            );
            tracing::warn!(signal = sig, "Cancellation requested");
            cancel.cancel();
        }
    });

    Ok(())
}

fn require_root(cli: &Cli) {
    if !cli.allow_non_root && !is_root() {
        eprintln!("Error: This command requires root privileges.");
        eprintln!("Run with sudo, or pass --allow-non-root for image files.");
        std::process::exit(2);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_guard = init_logging(&cli)?;

    let settings = WipeSettings::load(cli.config.as_deref())?;
    let host = detect_host(&settings);
    let orchestrator = WipeOrchestrator::new(host, settings);

    let code = match &cli.command {
        Commands::List { json } => list_devices(&orchestrator, *json)?,
        Commands::Check { device, method } => check_device(&orchestrator, device, method.as_deref())?,
        Commands::Wipe {
            device,
            method,
            output,
            operator,
            unmount,
            yes,
            json,
        } => {
            require_root(&cli);
            let request = WipeRequest {
                device_path: device.clone(),
                method: method.clone(),
                operator: operator.clone(),
                auto_unmount: *unmount,
                record_path: output.clone(),
            };
            wipe_device(orchestrator, request, *yes, *json).await?
        }
        Commands::Verify { device } => {
            require_root(&cli);
            verify_device(&orchestrator, device).await
        }
        Commands::Methods => {
            print_methods(&orchestrator);
            0
        }
    };

    // Flush the non-blocking log writer; exit() skips destructors
    drop(log_guard);
    std::process::exit(code);
}

fn list_devices(orchestrator: &WipeOrchestrator, json: bool) -> Result<i32> {
    let report = orchestrator.catalog().enumerate_with_diagnostics();

    if json {
        println!("{}", serde_json::to_string_pretty(&report.devices)?);
    } else if report.devices.is_empty() {
        println!("No devices detected.");
    } else {
        print!("{}", display::device_table(&report.devices));
    }

    for diagnostic in &report.diagnostics {
        eprintln!("{} {}", "note:".yellow(), diagnostic);
    }
    Ok(0)
}

fn check_device(orchestrator: &WipeOrchestrator, device: &str, method: Option<&str>) -> Result<i32> {
    match orchestrator.check(device, method) {
        Ok(report) => {
            print!("{}", display::check_summary(&report));
            Ok(if report.verdict.is_proceed() { 0 } else { 2 })
        }
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            Ok(2)
        }
    }
}

fn confirm(orchestrator: &WipeOrchestrator, request: &WipeRequest) -> Result<bool> {
    // Refusals are reported by the orchestrator itself; only prompt for a wipe that can start
    let report = match orchestrator.check(&request.device_path, Some(&request.method)) {
        Ok(report) if !matches!(report.verdict, SafetyVerdict::Blocked(_)) => report,
        _ => return Ok(true),
    };

    Ok(display::confirm_destruction(
        &mut io::stderr().lock(),
        &mut io::stdin().lock(),
        &request.device_path,
        &display::check_summary(&report),
    )?)
}

async fn wipe_device(
    orchestrator: WipeOrchestrator,
    request: WipeRequest,
    yes: bool,
    json: bool,
) -> Result<i32> {
    if !yes && !confirm(&orchestrator, &request)? {
        eprintln!("Operation cancelled.");
        return Ok(3);
    }

    let cancel = CancelToken::new();
    setup_signal_handlers(cancel.clone())?;

    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let device_label = request.device_path.clone();
    let renderer = tokio::spawn(async move {
        let mut bar = (!json).then(|| WipeProgressBar::new(&device_label));
        while let Some(event) = rx.recv().await {
            match bar.as_mut() {
                Some(bar) => bar.apply(&event),
                None => match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::warn!(error = %e, "Unserializable progress event"),
                },
            }
        }
        if let Some(mut bar) = bar {
            bar.abandon();
        }
    });

    let started = Instant::now();
    let outcome = orchestrator.wipe(request, cancel, Some(tx)).await;
    if let Err(e) = renderer.await {
        tracing::warn!(error = %e, "Progress renderer stopped early");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print!("\n{}", display::outcome_summary(&outcome));
        if outcome.record().is_some() {
            println!(
                "Wall clock:   {}",
                humantime::format_duration(std::time::Duration::from_secs(started.elapsed().as_secs()))
            );
        }
    }

    Ok(outcome.exit_code())
}

async fn verify_device(orchestrator: &WipeOrchestrator, device: &str) -> i32 {
    let result = orchestrator.verify_device(device).await;
    println!("{}: {}", device, result.note());
    match result {
        VerificationResult::VerifiedClean { clean: true, .. } => 0,
        VerificationResult::VerifiedClean { clean: false, .. } => 1,
        VerificationResult::Unavailable(_) => 4,
    }
}

fn print_methods(orchestrator: &WipeOrchestrator) {
    let registry = orchestrator.method_registry();

    println!("Available methods on {}:\n", orchestrator.platform());
    for method in WipeMethod::ALL {
        let plan = registry.resolve(method);
        println!("  {:<8} {}", method.as_str().bold(), display::plan_summary(&plan));
        for step in &plan.steps {
            println!("           {} {}", step.program, step.args.join(" "));
        }
    }
}
