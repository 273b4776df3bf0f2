//! Pulse CLI - Command-line interface for Workpulse
//!
//! Commands:
//! - analyze: Run the analytics pipeline over raw observations
//! - validate: Validate raw observation schema and normalization
//! - doctor: Diagnose configuration and environment
//! - schema: Print the input schema

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use workpulse::config::NarrativeProvider;
use workpulse::normalizer::EventNormalizer;
use workpulse::schema::{
    ObservationAdapter, RawObservation, MAX_DURATION_SECS, SCHEMA_VERSION,
};
use workpulse::{
    logging, AnalysisPeriod, MemoryStore, PeriodAnalyzer, PeriodReport, PulseConfig,
    PRODUCER_NAME, WORKPULSE_VERSION,
};

/// Pulse - Behavioral analytics for desktop activity
#[derive(Parser)]
#[command(name = "pulse")]
#[command(version = WORKPULSE_VERSION)]
#[command(about = "Turn activity observations into focus metrics and insights", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze raw observations, one period per local day
    Analyze {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Start of an explicit analysis period (RFC 3339)
        #[arg(long, requires = "period_end")]
        period_start: Option<DateTime<Utc>>,

        /// End of an explicit analysis period (RFC 3339)
        #[arg(long, requires = "period_start")]
        period_end: Option<DateTime<Utc>>,

        /// Configuration file (defaults to the user config path)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Validate raw observation schema
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Configuration file to check
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the input schema
    Schema {
        /// Output as JSON schema
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one observation per line)
    Ndjson,
    /// JSON array of observations
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one period report per line)
    Ndjson,
    /// JSON array of period reports
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), PulseCliError> {
    match cli.command {
        Commands::Analyze {
            input,
            input_format,
            period_start,
            period_end,
            config,
            output_format,
        } => {
            let explicit = match (period_start, period_end) {
                (Some(start), Some(end)) => Some(AnalysisPeriod::new(start, end)?),
                _ => None,
            };
            cmd_analyze(
                &input,
                input_format,
                explicit,
                config.as_deref(),
                output_format,
            )
        }

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),

        Commands::Schema { json_schema } => {
            cmd_schema(json_schema);
            Ok(())
        }
    }
}

fn cmd_analyze(
    input: &Path,
    input_format: InputFormat,
    explicit: Option<AnalysisPeriod>,
    config_path: Option<&Path>,
    output_format: OutputFormat,
) -> Result<(), PulseCliError> {
    let config = load_config(config_path)?;
    logging::init(&config.logging);

    let observations = read_observations(input, input_format)?;
    if observations.is_empty() {
        return Err(PulseCliError::NoObservations);
    }

    let periods = match explicit {
        Some(period) => vec![period],
        None => daily_periods(&observations, &config)?,
    };
    if periods.is_empty() {
        return Err(PulseCliError::NoObservations);
    }

    let analyzer = PeriodAnalyzer::from_config(&config)?;
    let store = MemoryStore::new();

    let runtime = tokio::runtime::Runtime::new()?;
    let reports = runtime.block_on(async {
        let ingested = store.ingest(observations).await;
        tracing::info!(ingested, periods = periods.len(), "Observations ingested");

        // In order, so each day can compare against the one before it
        let mut reports = Vec::with_capacity(periods.len());
        for period in periods {
            reports.push(analyzer.run_period(&store, &store, period).await?);
        }
        Ok::<_, workpulse::ComputeError>(reports)
    })?;

    print!("{}", format_output(&reports, &output_format)?);
    Ok(())
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), PulseCliError> {
    let observations = read_observations(input, input_format)?;

    let results = ObservationAdapter::validate_observations(&observations);
    let normalization = EventNormalizer::default().normalize(&observations).report;

    let report = ValidationReport {
        total_observations: observations.len(),
        valid_observations: observations.len() - results.len(),
        invalid_observations: results.len(),
        errors: results
            .iter()
            .map(|r| ValidationErrorDetail {
                index: r.index,
                observation_id: r.observation_id.clone(),
                error: r.error.to_string(),
            })
            .collect(),
        drop_rate: normalization.drop_rate,
        drop_alert: normalization.drop_alert,
        collapsed_idle: normalization.collapsed_idle,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total observations:   {}", report.total_observations);
        println!("Valid observations:   {}", report.valid_observations);
        println!("Invalid observations: {}", report.invalid_observations);
        println!("Drop rate:            {:.1}%", report.drop_rate * 100.0);
        println!("Idle fragments folded: {}", report.collapsed_idle);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - Observation {} (index {}): {}",
                    err.observation_id.as_deref().unwrap_or("unknown"),
                    err.index,
                    err.error
                );
            }
        }
    }

    if report.invalid_observations > 0 {
        Err(PulseCliError::ValidationFailed(report.invalid_observations))
    } else {
        Ok(())
    }
}

fn cmd_doctor(config_path: Option<&Path>, json: bool) -> Result<(), PulseCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "workpulse_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Workpulse version {}", WORKPULSE_VERSION),
    });

    checks.push(DoctorCheck {
        name: "schema_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Input schema: {}", SCHEMA_VERSION),
    });

    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(PulseConfig::config_path);
    let config = if config_path.is_none() && !path.exists() {
        checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Warning,
            message: format!("No config file at {}, using defaults", path.display()),
        });
        Some(PulseConfig::default())
    } else {
        match PulseConfig::load_from(&path) {
            Ok(config) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("Config file valid ({})", path.display()),
                });
                Some(config)
            }
            Err(e) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Invalid config: {}", e),
                });
                None
            }
        }
    };

    if let Some(config) = config {
        let narrative = &config.narrative;
        let check = match narrative.provider {
            NarrativeProvider::Template => DoctorCheck {
                name: "narrative".to_string(),
                status: CheckStatus::Ok,
                message: "Template narratives (no external calls)".to_string(),
            },
            NarrativeProvider::Remote => match &narrative.endpoint {
                Some(endpoint) => DoctorCheck {
                    name: "narrative".to_string(),
                    status: if narrative.api_key.is_some() {
                        CheckStatus::Ok
                    } else {
                        CheckStatus::Warning
                    },
                    message: format!(
                        "Remote narratives via {} ({} retries, {} ms timeout{})",
                        endpoint,
                        narrative.max_retries,
                        narrative.timeout_ms,
                        if narrative.api_key.is_some() {
                            ""
                        } else {
                            ", no API key"
                        }
                    ),
                },
                None => DoctorCheck {
                    name: "narrative".to_string(),
                    status: CheckStatus::Error,
                    message: "Remote provider selected but no endpoint configured".to_string(),
                },
            },
        };
        checks.push(check);
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (ready for --input -)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: WORKPULSE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Pulse Doctor Report");
        println!("===================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(PulseCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_schema(json_schema: bool) {
    if json_schema {
        println!("{}", get_input_json_schema());
        return;
    }

    println!("Input Schema: {}", SCHEMA_VERSION);
    println!();
    println!("One record per observed foreground interval:");
    println!();
    println!("- schema_version: \"{}\" (optional)", SCHEMA_VERSION);
    println!("- observation_id: unique id (optional)");
    println!("- app_id: application identifier");
    println!("- window_title: window label");
    println!("- timestamp: interval start, RFC 3339");
    println!("- duration_secs: interval length in seconds, 0 to 604800");
    println!("- pid: process id (optional)");
    println!("- is_idle: true for idle intervals (optional, default false)");
    println!();
    println!("Idle intervals may use app_id \"system.idle\" and omit window_title.");
}

// Helper functions

fn load_config(path: Option<&Path>) -> Result<PulseConfig, PulseCliError> {
    let config = match path {
        Some(path) => PulseConfig::load_from(path)?,
        None => PulseConfig::load()?,
    };
    Ok(config)
}

fn read_observations(
    input: &Path,
    input_format: InputFormat,
) -> Result<Vec<RawObservation>, PulseCliError> {
    let input_data = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let observations = match input_format {
        InputFormat::Ndjson => ObservationAdapter::parse_ndjson(&input_data)?,
        InputFormat::Json => ObservationAdapter::parse_array(&input_data)?,
    };
    Ok(observations)
}

/// One period per local day touched by a dated observation
fn daily_periods(
    observations: &[RawObservation],
    config: &PulseConfig,
) -> Result<Vec<AnalysisPeriod>, PulseCliError> {
    let offset = config.metrics.offset()?;
    let dates: BTreeSet<NaiveDate> = observations
        .iter()
        .filter_map(|o| o.timestamp)
        .map(|ts| ts.with_timezone(&offset).date_naive())
        .collect();

    let mut periods = Vec::with_capacity(dates.len());
    for date in dates {
        periods.push(AnalysisPeriod::day(date, offset)?);
    }
    Ok(periods)
}

fn format_output(reports: &[PeriodReport], format: &OutputFormat) -> Result<String, PulseCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for report in reports {
                lines.push(serde_json::to_string(report)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(reports)? + "\n"),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(reports)? + "\n"),
    }
}

fn get_input_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": SCHEMA_VERSION,
        "description": "Workpulse raw activity observation",
        "type": "object",
        "required": ["app_id", "timestamp", "duration_secs"],
        "properties": {
            "schema_version": {
                "type": "string",
                "const": SCHEMA_VERSION
            },
            "observation_id": { "type": "string" },
            "app_id": { "type": "string", "minLength": 1 },
            "window_title": { "type": "string" },
            "timestamp": { "type": "string", "format": "date-time" },
            "pid": { "type": "integer", "minimum": 0 },
            "duration_secs": { "type": "number", "minimum": 0, "maximum": MAX_DURATION_SECS },
            "is_idle": { "type": "boolean", "default": false }
        }
    })
    .to_string()
}

// Error types

#[derive(Debug)]
enum PulseCliError {
    Io(io::Error),
    Compute(workpulse::ComputeError),
    Json(serde_json::Error),
    NoObservations,
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for PulseCliError {
    fn from(e: io::Error) -> Self {
        PulseCliError::Io(e)
    }
}

impl From<workpulse::ComputeError> for PulseCliError {
    fn from(e: workpulse::ComputeError) -> Self {
        PulseCliError::Compute(e)
    }
}

impl From<serde_json::Error> for PulseCliError {
    fn from(e: serde_json::Error) -> Self {
        PulseCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<PulseCliError> for CliError {
    fn from(e: PulseCliError) -> Self {
        match e {
            PulseCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            PulseCliError::Compute(e) => {
                let (code, hint) = match &e {
                    workpulse::ComputeError::ConfigError(_)
                    | workpulse::ComputeError::TomlError(_) => {
                        ("CONFIG_ERROR", "Run 'pulse doctor' to check the configuration")
                    }
                    workpulse::ComputeError::InvalidPeriod(_) => {
                        ("INVALID_PERIOD", "--period-end must be after --period-start")
                    }
                    workpulse::ComputeError::ParseError(_)
                    | workpulse::ComputeError::JsonError(_) => (
                        "PARSE_ERROR",
                        "Ensure input matches activity.raw_observation.v1 schema",
                    ),
                    _ => ("COMPUTE_ERROR", "Re-run with RUST_LOG=debug for details"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            PulseCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            PulseCliError::NoObservations => CliError {
                code: "NO_OBSERVATIONS".to_string(),
                message: "No dated observations found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            PulseCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} observations failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            PulseCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_observations: usize,
    valid_observations: usize,
    invalid_observations: usize,
    errors: Vec<ValidationErrorDetail>,
    drop_rate: f64,
    drop_alert: bool,
    collapsed_idle: usize,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    observation_id: Option<String>,
    error: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
