//! Command-line interface for tablesaver
//!
//! This module handles:
//! - Command-line argument parsing using clap
//! - Configuration loading and validation
//! - Translating export flags into a row selection, columns and options

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{Config, LogLevel};
use crate::error::{ConfigError, Result};
use crate::selection::{RowSelection, parse_row_range};
use crate::sink::SinkPreference;
use crate::source::{Column, RowRange};

pub mod progress;

pub use progress::BarListener;

/// Streams large tables into ordered CSV downloads
#[derive(Parser, Debug)]
#[command(
    name = "tablesaver",
    version,
    about = "Export very large tables to CSV",
    long_about = "Streams row ranges of a table to a single ordered CSV download, fetching
snapshots concurrently within a bounded window."
)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    pub config_file: Option<PathBuf>,

    /// Quiet mode (no progress bar)
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Verbose mode (detailed logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Very verbose mode (trace logging)
    #[arg(long = "vv", global = true)]
    pub very_verbose: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands for tablesaver
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export rows of the demo table to a CSV file
    Export(ExportArgs),

    /// Show configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Validate configuration file
        #[arg(long)]
        validate: bool,
    },
}

/// Options of the export subcommand
#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Number of rows in the demo table
    #[arg(long, value_name = "N", default_value_t = 100_000)]
    pub table_rows: u64,

    /// Simulated snapshot latency in milliseconds
    #[arg(long, value_name = "MS")]
    pub latency_ms: Option<u64>,

    /// Export every row (default)
    #[arg(long, conflicts_with_all = ["rows", "first", "last"])]
    pub all: bool,

    /// Export an inclusive row range; may be repeated
    #[arg(long = "rows", value_name = "A-B", value_parser = parse_range_arg)]
    pub rows: Vec<RowRange>,

    /// Export the first N rows
    #[arg(long, value_name = "N", conflicts_with_all = ["rows", "last"])]
    pub first: Option<u64>,

    /// Export the last N rows
    #[arg(long, value_name = "N", conflicts_with_all = ["rows", "first"])]
    pub last: Option<u64>,

    /// Columns to export, comma separated (default: all)
    #[arg(long, value_name = "NAMES", value_delimiter = ',')]
    pub columns: Vec<String>,

    /// Download file name
    #[arg(long, value_name = "NAME")]
    pub file_name: Option<String>,

    /// Download directory
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Do not write the column names as the first line
    #[arg(long)]
    pub no_headers: bool,

    /// Write raw values instead of formatted ones
    #[arg(long)]
    pub unformatted: bool,

    /// Buffer the whole file in memory instead of streaming it
    #[arg(long)]
    pub buffered: bool,

    /// Number of snapshots in flight
    #[arg(long, value_name = "N")]
    pub window: Option<usize>,

    /// Target number of cells per snapshot
    #[arg(long, value_name = "N")]
    pub chunk_cells: Option<usize>,
}

fn parse_range_arg(text: &str) -> std::result::Result<RowRange, String> {
    parse_row_range(text).ok_or_else(|| format!("invalid row range '{}', expected A-B", text))
}

impl ExportArgs {
    /// Row selection requested by the flags
    pub fn selection(&self) -> RowSelection {
        if let Some(n) = self.first {
            RowSelection::First(n)
        } else if let Some(n) = self.last {
            RowSelection::Last(n)
        } else if !self.rows.is_empty() {
            RowSelection::Selected(self.rows.clone())
        } else {
            RowSelection::All
        }
    }

    /// Resolve `--columns` against the table's columns
    ///
    /// # Errors
    /// * `ConfigError::InvalidValue` - A requested column does not exist
    pub fn select_columns(&self, available: &[Column]) -> Result<Vec<Column>> {
        if self.columns.is_empty() {
            return Ok(available.to_vec());
        }

        self.columns
            .iter()
            .map(|name| {
                available
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(name.trim()))
                    .cloned()
                    .ok_or_else(|| {
                        ConfigError::InvalidValue {
                            field: "columns".to_string(),
                            value: name.clone(),
                        }
                        .into()
                    })
            })
            .collect()
    }
}

/// CLI interface handler
pub struct CliInterface {
    /// Parsed command-line arguments
    args: CliArgs,

    /// Loaded configuration
    config: Config,
}

impl CliInterface {
    /// Create a new CLI interface
    ///
    /// # Returns
    /// * `Result<Self>` - New CLI interface or error
    pub fn new() -> Result<Self> {
        let args = CliArgs::parse();
        Self::from_args(args)
    }

    /// Create a CLI interface from already parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let config = Self::load_config(&args)?;
        Ok(Self { args, config })
    }

    /// Load configuration from file and merge with arguments
    ///
    /// # Arguments
    /// * `args` - Command-line arguments
    ///
    /// # Returns
    /// * `Result<Config>` - Loaded configuration or error
    fn load_config(args: &CliArgs) -> Result<Config> {
        let config_path = args.config_file.as_deref();
        let mut config = Config::load_from_file(config_path)?;

        if let Err(e) = config.validate() {
            eprintln!("Warning: Configuration validation failed: {}", e);
            eprintln!("Using default configuration instead.");
            config = Config::default();
        }

        Self::apply_args_to_config(&mut config, args);
        Ok(config)
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the CLI arguments
    pub fn args(&self) -> &CliArgs {
        &self.args
    }

    /// Apply CLI arguments to configuration
    ///
    /// Overrides configuration values with CLI arguments where provided
    fn apply_args_to_config(config: &mut Config, args: &CliArgs) {
        Self::apply_logging_args(config, args);
        if let Commands::Export(export) = &args.command {
            Self::apply_export_args(config, export);
        }
    }

    /// Apply logging-related CLI arguments to configuration
    fn apply_logging_args(config: &mut Config, args: &CliArgs) {
        config.logging.level = if args.very_verbose {
            LogLevel::Trace
        } else if args.verbose {
            LogLevel::Debug
        } else if args.quiet {
            LogLevel::Error
        } else {
            config.logging.level
        };
    }

    /// Apply export-related CLI arguments to configuration
    fn apply_export_args(config: &mut Config, args: &ExportArgs) {
        if let Some(window) = args.window {
            config.export.window_size = window;
        }
        if let Some(chunk_cells) = args.chunk_cells {
            config.export.chunk_cells = chunk_cells;
        }
        if args.no_headers {
            config.export.include_column_headers = false;
        }
        if args.unformatted {
            config.export.use_unformatted_values = true;
        }
        if args.buffered {
            config.export.sink = SinkPreference::Buffered;
        }
        if let Some(output) = &args.output {
            config.output.directory = output.clone();
        }
    }

    /// Handle config subcommand
    ///
    /// # Arguments
    /// * `show` - Whether to show configuration
    /// * `validate` - Whether to validate configuration
    pub fn handle_config_command(&self, show: bool, validate: bool) -> Result<()> {
        if validate {
            self.validate_config_file()?;
        }

        if show || !validate {
            self.show_config()?;
        }

        Ok(())
    }

    /// Validate configuration file
    fn validate_config_file(&self) -> Result<()> {
        let path = self.get_config_path();
        println!("Validating configuration file: {}", path.display());

        if !path.exists() {
            println!("Configuration file does not exist");
            return Ok(());
        }

        match Config::from_file(&path) {
            Ok(config) => match config.validate() {
                Ok(_) => println!("Configuration is valid"),
                Err(e) => println!("Configuration validation failed: {}", e),
            },
            Err(e) => println!("Failed to load configuration: {}", e),
        }

        Ok(())
    }

    /// Show effective configuration
    fn show_config(&self) -> Result<()> {
        let path = self.get_config_path();
        println!("Configuration file: {}", path.display());
        println!();
        println!("=== Effective Configuration ===");
        println!();
        println!("{}", self.config.to_toml()?);
        Ok(())
    }

    /// Get configuration file path (from args or default)
    fn get_config_path(&self) -> PathBuf {
        self.args
            .config_file
            .clone()
            .unwrap_or_else(Config::default_config_path)
    }
}
