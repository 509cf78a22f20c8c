//! tablesaver - table to CSV exporter
//!
//! Streams the rows of a table into a single ordered CSV file, fetching
//! snapshots concurrently within a bounded window.
//!
//! # Usage
//!
//! ```bash
//! # Export the first 1000 rows of the demo table
//! tablesaver export --first 1000 -o ./downloads
//!
//! # Show the effective configuration
//! tablesaver config --show
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{Level, info};

use tablesaver::cli::{BarListener, CliInterface, Commands, ExportArgs};
use tablesaver::error::{ExportError, Result};
use tablesaver::export::{CancelReason, ExportController, ExportRequest, JobOutcome, SystemClock};
use tablesaver::formatter::PlainFormatter;
use tablesaver::selection::default_file_name;
use tablesaver::sink::DirectorySaver;
use tablesaver::source::SyntheticTable;
use tablesaver::transport::FileTransport;

/// Application entry point
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Main application logic
///
/// 1. Parse command-line arguments
/// 2. Load configuration
/// 3. Initialize logging
/// 4. Run the requested subcommand
async fn run() -> Result<()> {
    let cli = CliInterface::new()?;
    initialize_logging(&cli);

    match &cli.args().command {
        Commands::Export(args) => run_export(&cli, args).await,
        Commands::Config { show, validate } => cli.handle_config_command(*show, *validate),
    }
}

/// Export the demo table and wait for the download to complete
///
/// Ctrl+C cancels the running export.
async fn run_export(cli: &CliInterface, args: &ExportArgs) -> Result<()> {
    let mut table = SyntheticTable::demo(args.table_rows);
    if let Some(ms) = args.latency_ms {
        table = table.with_latency(Duration::from_millis(ms));
    }

    let columns = args.select_columns(table.columns())?;
    let ranges = args.selection().to_ranges(table.row_count());
    let file_name = args
        .file_name
        .clone()
        .unwrap_or_else(|| default_file_name(table.name()));

    let directory = cli.config().output.directory.clone();
    let transport = Arc::new(FileTransport::new(&directory));
    let listener = Arc::new(BarListener::new(&file_name, !cli.args().quiet));
    let controller = ExportController::new(
        Arc::new(table),
        transport.clone(),
        Arc::new(DirectorySaver::new(&directory)),
        Arc::new(PlainFormatter::new()),
        Arc::new(SystemClock),
        listener,
    );

    info!("Exporting to {}", directory.display());
    let request = ExportRequest::new(file_name, ranges, columns)
        .with_options(cli.config().export_options());
    controller.start_export(request)?;

    let outcome = tokio::select! {
        outcome = controller.wait() => outcome,
        _ = tokio::signal::ctrl_c() => {
            controller.cancel_export();
            controller.wait().await
        }
    };
    transport.wait_idle().await;

    match outcome {
        Some(JobOutcome::Finished) | Some(JobOutcome::Canceled(CancelReason::UserCanceled)) => {
            Ok(())
        }
        Some(JobOutcome::Canceled(reason)) => {
            Err(ExportError::Canceled(reason.to_string()).into())
        }
        None => Ok(()),
    }
}

/// Initialize logging system based on verbosity level
///
/// # Arguments
/// * `cli` - CLI interface with verbosity settings
fn initialize_logging(cli: &CliInterface) {
    let level = if cli.args().very_verbose {
        Level::TRACE
    } else if cli.args().verbose {
        Level::DEBUG
    } else {
        cli.config().logging.level.to_tracing_level()
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);

    if cli.config().logging.timestamps {
        subscriber.init();
    } else {
        subscriber.without_time().init();
    }
}
