//! CLI Tooling
//!
//! Command-line interface for build directory tracking. Every command works on one
//! workspace root and returns its output as a string for the binary to print.

use crate::config::{BuildTrackConfig, ConfigLoader, WorkspaceLayout};
use crate::context::TracingContext;
use crate::error::{ApiError, StorageError};
use crate::gc::{DiskUsage, MarkReport, SweepReport};
use crate::logging::{resolve_log_file_path, LoggingConfig};
use crate::tracking::{
    ConfigCodec, DefinitionIdentity, ListedRecord, RepositoryHints, TrackingManager,
    TrackingRecord, TrackingRecordBase,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SECONDS_PER_DAY: u64 = 86_400;

/// buildtrack - build directory tracking and garbage collection
#[derive(Parser, Debug)]
#[command(name = "buildtrack")]
#[command(about = "Track build directories of a build agent and collect unused ones")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root holding the numbered build directories
    #[arg(long, default_value = ".")]
    pub work_dir: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, both)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Get the build directory for a definition, creating it if needed
    Prepare {
        #[arg(long)]
        collection_id: String,
        #[arg(long)]
        definition_id: String,
        #[arg(long)]
        definition_name: Option<String>,
        #[arg(long)]
        collection_url: Option<String>,
        #[arg(long)]
        repository_url: Option<String>,
        /// Repository type recorded on newly created directories
        #[arg(long)]
        repository_type: Option<String>,
        /// Sources folder name inside the build directory
        #[arg(long)]
        sources_directory: Option<String>,
        /// Use the configured agent id as the directory number
        #[arg(long)]
        force_directory: bool,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show the tracking file for a hash key
    Show {
        #[arg(long)]
        hash_key: String,
    },
    /// List all tracked build directories
    List {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Record maintenance of a build directory
    Maintenance {
        #[command(subcommand)]
        command: MaintenanceCommands,
    },
    /// Garbage collection of unused build directories
    Gc {
        #[command(subcommand)]
        command: GcCommands,
    },
    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum MaintenanceCommands {
    /// Stamp the maintenance start time
    Start {
        #[arg(long)]
        hash_key: String,
    },
    /// Stamp the maintenance completion time
    Complete {
        #[arg(long)]
        hash_key: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum GcCommands {
    /// Move expired tracking records to the garbage directory
    Mark {
        /// Expiration window in days (default: gc.expiration_days)
        #[arg(long)]
        expiration_days: Option<u64>,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Delete build directories queued in the garbage directory
    Sweep {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Mark then sweep
    Run {
        /// Expiration window in days (default: gc.expiration_days)
        #[arg(long)]
        expiration_days: Option<u64>,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
}

impl Cli {
    /// Logging settings: the `[logging]` section with command-line flags applied on top.
    pub fn logging_config(
        &self,
        base: &LoggingConfig,
        work_root: &Path,
    ) -> Result<LoggingConfig, ApiError> {
        let mut config = base.clone();
        if self.verbose {
            config.level = "debug".to_string();
        }
        if let Some(level) = &self.log_level {
            config.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.format = format.clone();
        }
        if let Some(output) = &self.log_output {
            config.output = output.clone();
        }
        if config.output.contains("file") {
            config.file = Some(resolve_log_file_path(
                self.log_file.clone(),
                config.file.clone(),
                Some(work_root),
            )?);
        }
        Ok(config)
    }
}

/// CLI context for one workspace root
pub struct CliContext {
    config: BuildTrackConfig,
    manager: TrackingManager,
    context: TracingContext,
}

impl CliContext {
    /// Load configuration for `work_dir` and open its layout, creating the root if needed.
    pub fn new(work_dir: PathBuf, config_path: Option<PathBuf>) -> Result<Self, ApiError> {
        let config = match &config_path {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(&work_dir)?,
        };
        let layout = WorkspaceLayout::resolve(&work_dir, &config.layout)?;
        tracing::debug!("Workspace root resolved to {}", layout.root().display());
        let manager = TrackingManager::from_config(layout, &config);
        Ok(Self {
            config,
            manager,
            context: TracingContext::new(),
        })
    }

    /// Cancel long-running commands through `token`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.context = TracingContext::with_cancellation(token);
        self
    }

    pub fn config(&self) -> &BuildTrackConfig {
        &self.config
    }

    pub fn manager(&self) -> &TrackingManager {
        &self.manager
    }

    /// Execute a CLI command
    pub fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Prepare {
                collection_id,
                definition_id,
                definition_name,
                collection_url,
                repository_url,
                repository_type,
                sources_directory,
                force_directory,
                format,
            } => {
                let mut identity = DefinitionIdentity::new(collection_id, definition_id);
                if let Some(name) = definition_name {
                    identity = identity.with_definition_name(name);
                }
                if let Some(url) = collection_url {
                    identity = identity.with_collection_url(url);
                }
                if let Some(url) = repository_url {
                    identity = identity.with_repository_url(url);
                }
                let mut hints = RepositoryHints::default();
                if let Some(kind) = repository_type {
                    hints.repository_type = kind.clone();
                }
                if let Some(dir) = sources_directory {
                    hints.sources_directory = dir.clone();
                }

                let prepared = self.manager.prepare_directory(
                    &self.context,
                    &identity,
                    &hints,
                    *force_directory,
                )?;
                match parse_format(format)? {
                    OutputFormat::Json => to_json(&json!({
                        "hash_key": prepared.record.hash_key,
                        "build_directory_number": prepared.record.build_directory_number,
                        "build_directory": prepared.build_directory,
                        "tracking_file": prepared.tracking_file,
                        "created": prepared.created,
                    })),
                    OutputFormat::Text => Ok(format!(
                        "{} build directory {}\nTracking file: {}",
                        if prepared.created { "Created" } else { "Reusing" },
                        prepared.build_directory.display(),
                        prepared.tracking_file.display()
                    )),
                }
            }
            Commands::Show { hash_key } => {
                let path = self.manager.tracking_file_path(hash_key)?;
                let record = self
                    .manager
                    .load_if_exists(&self.context, &path)?
                    .ok_or_else(|| not_tracked(hash_key))?;
                let bytes = ConfigCodec::encode_base(&record)?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            Commands::List { format } => {
                let listed = self.manager.list_records(&self.context)?;
                match parse_format(format)? {
                    OutputFormat::Json => {
                        let rows: Vec<_> = listed.iter().map(listed_json).collect();
                        to_json(&rows)
                    }
                    OutputFormat::Text => Ok(format_records_table(self.manager.layout(), &listed)),
                }
            }
            Commands::Maintenance { command } => match command {
                MaintenanceCommands::Start { hash_key } => {
                    let (mut record, path) = self.load_current(hash_key)?;
                    self.manager.record_maintenance_started(&mut record, &path)?;
                    Ok(format!(
                        "Maintenance started on build directory {}",
                        record.build_directory_number
                    ))
                }
                MaintenanceCommands::Complete { hash_key } => {
                    let (mut record, path) = self.load_current(hash_key)?;
                    self.manager
                        .record_maintenance_completed(&mut record, &path)?;
                    Ok(format!(
                        "Maintenance completed on build directory {}",
                        record.build_directory_number
                    ))
                }
            },
            Commands::Gc { command } => match command {
                GcCommands::Mark {
                    expiration_days,
                    format,
                } => {
                    let format = parse_format(format)?;
                    let report = self
                        .manager
                        .mark_expired(&self.context, self.expiration(*expiration_days))?;
                    render(format, &report, || format_mark_report(&report))
                }
                GcCommands::Sweep { format } => {
                    let format = parse_format(format)?;
                    let report = self.manager.sweep(&self.context)?;
                    render(format, &report, || format_sweep_report(&report))
                }
                GcCommands::Run {
                    expiration_days,
                    format,
                } => {
                    let format = parse_format(format)?;
                    let report = self
                        .manager
                        .run_maintenance(&self.context, self.expiration(*expiration_days))?;
                    render(format, &report, || {
                        let mut sections = Vec::new();
                        if let Some(mark) = &report.mark {
                            sections.push(format_mark_report(mark));
                        }
                        if let Some(sweep) = &report.sweep {
                            sections.push(format_sweep_report(sweep));
                        }
                        sections.join("\n")
                    })
                }
            },
            Commands::Config { command } => match command {
                ConfigCommands::Show => toml::to_string_pretty(&self.config)
                    .map_err(|e| ApiError::ConfigError(format!("Failed to render config: {}", e))),
            },
        }
    }

    fn expiration(&self, days: Option<u64>) -> Duration {
        match days {
            Some(days) => Duration::from_secs(days.saturating_mul(SECONDS_PER_DAY)),
            None => self.config.gc.expiration(),
        }
    }

    fn load_current(&self, hash_key: &str) -> Result<(TrackingRecord, PathBuf), ApiError> {
        let path = self.manager.tracking_file_path(hash_key)?;
        match self.manager.load_if_exists(&self.context, &path)? {
            Some(TrackingRecordBase::Current(record)) => Ok((record, path)),
            Some(TrackingRecordBase::Legacy(_)) => Err(ApiError::LegacyUpgrade(format!(
                "tracking file {} is in the legacy format; prepare the directory first",
                path.display()
            ))),
            None => Err(not_tracked(hash_key)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

fn parse_format(format: &str) -> Result<OutputFormat, ApiError> {
    match format {
        "text" => Ok(OutputFormat::Text),
        "json" => Ok(OutputFormat::Json),
        other => Err(ApiError::ConfigError(format!(
            "Invalid format: {} (must be 'text' or 'json')",
            other
        ))),
    }
}

fn render<T: Serialize>(
    format: OutputFormat,
    value: &T,
    text: impl FnOnce() -> String,
) -> Result<String, ApiError> {
    match format {
        OutputFormat::Json => to_json(value),
        OutputFormat::Text => Ok(text()),
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, ApiError> {
    Ok(serde_json::to_string_pretty(value).map_err(StorageError::from)?)
}

fn not_tracked(hash_key: &str) -> ApiError {
    ApiError::InvalidHashKey(format!("no build directory is tracked for {}", hash_key))
}

fn listed_json(listed: &ListedRecord) -> serde_json::Value {
    match &listed.record {
        TrackingRecordBase::Current(record) => json!({
            "tracking_file": listed.tracking_file,
            "legacy": false,
            "record": record,
        }),
        TrackingRecordBase::Legacy(legacy) => json!({
            "tracking_file": listed.tracking_file,
            "legacy": true,
            "record": legacy,
        }),
    }
}

/// Format tracked records as a table
fn format_records_table(layout: &WorkspaceLayout, listed: &[ListedRecord]) -> String {
    if listed.is_empty() {
        return "No build directories are tracked.".to_string();
    }
    use comfy_table::Table;
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Directory", "Hash Key", "Definition", "Last Run", "Format"]);
    for item in listed {
        let key = item
            .tracking_file
            .parent()
            .and_then(|p| p.strip_prefix(layout.mapping_root()).ok())
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let directory = item
            .record
            .build_directory_number()
            .map(|n| n.to_string())
            .unwrap_or_else(|_| "?".to_string());
        let (definition, last_run, format) = match &item.record {
            TrackingRecordBase::Current(record) => (
                if record.definition_name.is_empty() {
                    record.definition_id.clone()
                } else {
                    record.definition_name.clone()
                },
                record
                    .last_run_on
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string()),
                "current",
            ),
            TrackingRecordBase::Legacy(legacy) => {
                (legacy.definition_id.clone(), "-".to_string(), "legacy")
            }
        };
        table.add_row(vec![directory, key, definition, last_run, format.to_string()]);
    }
    table.to_string()
}

fn format_mark_report(report: &MarkReport) -> String {
    let mut output = format!(
        "Marked {} build directories for deletion, {} still in use",
        report.marked_count(),
        report.retained_count()
    );
    for failure in &report.failures {
        output.push_str(&format!(
            "\n  failed: {}: {}",
            failure.path.display(),
            failure.message
        ));
    }
    output
}

fn format_sweep_report(report: &SweepReport) -> String {
    let mut output = format!(
        "Deleted {} of {} pending build directories",
        report.deleted.len(),
        report.pending
    );
    if report.cancelled {
        output.push_str(&format!(" (cancelled, {} left pending)", report.skipped));
    }
    if let (Some(before), Some(after)) = (&report.usage_before, &report.usage_after) {
        output.push_str(&format!("\n{}", format_freed(before, after)));
    }
    for failure in &report.failures {
        output.push_str(&format!(
            "\n  failed: {}: {}",
            failure.path.display(),
            failure.message
        ));
    }
    output
}

fn format_freed(before: &DiskUsage, after: &DiskUsage) -> String {
    let freed = after.available_bytes.saturating_sub(before.available_bytes);
    format!(
        "Available disk space: {} -> {} bytes ({} bytes freed)",
        before.available_bytes, after.available_bytes, freed
    )
}
