//! Growth CLI - Command-line interface for Growth Flux
//!
//! Commands:
//! - replay: Replay raw teacher logs into per-tag filter states
//! - report: Replay logs and write a growth report for one student
//! - validate: Check that raw logs can be signed against a tag catalog
//! - doctor: Diagnose profile, states file and environment

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use growth_flux::catalog::{RawObservationAdapter, TagCatalog};
use growth_flux::config::ConfigProfile;
use growth_flux::pipeline::GrowthProcessor;
use growth_flux::store::StateStore;
use growth_flux::types::{RawObservation, StudentId, TagFilterState, TagKey};
use growth_flux::{ScoreError, GROWTH_VERSION, PRODUCER_NAME};

/// Growth - Kalman growth scoring for student behavioral tags
#[derive(Parser)]
#[command(name = "growth")]
#[command(version = GROWTH_VERSION)]
#[command(about = "Turn teacher tag logs into level and trend estimates", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay raw observations and write the resulting tag states
    Replay {
        #[command(flatten)]
        source: SourceArgs,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Load previously saved states before replaying
        #[arg(long)]
        load_states: Option<PathBuf>,

        /// Save states to file after replaying
        #[arg(long)]
        save_states: Option<PathBuf>,
    },

    /// Replay raw observations and write a growth report for one student
    Report {
        #[command(flatten)]
        source: SourceArgs,

        /// Student to report on
        #[arg(long)]
        student: String,

        /// Prediction horizon in days
        #[arg(long, default_value = "7")]
        horizon: f64,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Pretty-print the report
        #[arg(long)]
        pretty: bool,
    },

    /// Validate raw observations against a tag catalog
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Tag catalog (JSON array of tag metadata)
        #[arg(long)]
        tags: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose profile, states file and environment
    Doctor {
        /// Check a config profile file
        #[arg(long)]
        profile: Option<PathBuf>,

        /// Check a saved states file
        #[arg(long)]
        states: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Inputs shared by commands that replay observations
#[derive(clap::Args)]
struct SourceArgs {
    /// Input file path (use - for stdin)
    #[arg(short, long)]
    input: PathBuf,

    /// Input format
    #[arg(long, default_value = "ndjson")]
    input_format: InputFormat,

    /// Tag catalog (JSON array of tag metadata)
    #[arg(long)]
    tags: PathBuf,

    /// Config profile (JSON); defaults are used when omitted
    #[arg(long)]
    profile: Option<PathBuf>,
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
    /// Newline-delimited JSON (one state per line)
    Ndjson,
    /// JSON array of states
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("growth_flux=warn")),
        1 => EnvFilter::new("growth_flux=debug,growth=debug"),
        _ => EnvFilter::new("growth_flux=trace,growth=trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), GrowthCliError> {
    match cli.command {
        Commands::Replay {
            source,
            output,
            output_format,
            load_states,
            save_states,
        } => cmd_replay(
            &source,
            &output,
            output_format,
            load_states.as_deref(),
            save_states.as_deref(),
        ),

        Commands::Report {
            source,
            student,
            horizon,
            output,
            pretty,
        } => cmd_report(&source, &StudentId(student), horizon, &output, pretty),

        Commands::Validate {
            input,
            input_format,
            tags,
            json,
        } => cmd_validate(&input, input_format, &tags, json),

        Commands::Doctor {
            profile,
            states,
            json,
        } => cmd_doctor(profile.as_deref(), states.as_deref(), json),
    }
}

fn cmd_replay(
    source: &SourceArgs,
    output: &Path,
    output_format: OutputFormat,
    load_states: Option<&Path>,
    save_states: Option<&Path>,
) -> Result<(), GrowthCliError> {
    let mut processor = build_processor(source)?;

    if let Some(states_path) = load_states {
        processor.load_states(&fs::read_to_string(states_path)?)?;
        debug!(states = processor.state_count(), "loaded saved states");
    }

    let raws = read_observations(&source.input, &source.input_format)?;
    let recorded = processor.record_all(&raws)?;
    info!(recorded, tags = processor.state_count(), "replay finished");

    if let Some(states_path) = save_states {
        fs::write(states_path, processor.save_states()?)?;
    }

    let states: Vec<&TagFilterState> = processor.states().collect();
    write_output(output, &format_output(&states, &output_format)?)
}

fn cmd_report(
    source: &SourceArgs,
    student_id: &StudentId,
    horizon_days: f64,
    output: &Path,
    pretty: bool,
) -> Result<(), GrowthCliError> {
    let mut processor = build_processor(source)?;
    let raws = read_observations(&source.input, &source.input_format)?;
    processor.record_all(&raws)?;

    let report = processor.report(student_id, horizon_days)?;
    let mut data = if pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    data.push('\n');

    write_output(output, &data)
}

fn cmd_validate(
    input: &Path,
    input_format: InputFormat,
    tags: &Path,
    json: bool,
) -> Result<(), GrowthCliError> {
    let catalog = TagCatalog::from_json(&fs::read_to_string(tags)?)?;
    let raws = read_observations(input, &input_format)?;

    let results = RawObservationAdapter::validate(&catalog, &raws);
    let report = ValidationReport {
        total_observations: raws.len(),
        valid_observations: raws.len() - results.len(),
        invalid_observations: results.len(),
        late_arrivals: count_late_arrivals(&raws),
        errors: results
            .iter()
            .map(|r| ValidationErrorDetail {
                index: r.index,
                student_id: r.student_id.clone(),
                tag_id: r.tag_id.clone(),
                code: r.error.code().to_string(),
                error: r.error.to_string(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total observations:   {}", report.total_observations);
        println!("Valid observations:   {}", report.valid_observations);
        println!("Invalid observations: {}", report.invalid_observations);
        println!("Late arrivals:        {}", report.late_arrivals);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - {}/{} (index {}): {}",
                    err.student_id, err.tag_id, err.index, err.error
                );
            }
        }
    }

    if report.invalid_observations > 0 {
        Err(GrowthCliError::ValidationFailed(report.invalid_observations))
    } else {
        Ok(())
    }
}

fn cmd_doctor(profile: Option<&Path>, states: Option<&Path>, json: bool) -> Result<(), GrowthCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "growth_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Growth Flux version {}", GROWTH_VERSION),
    });

    match profile {
        Some(profile_path) => checks.push(check_file(profile_path, "profile", |content| {
            ConfigProfile::from_json(content).map(|p| {
                format!(
                    "Profile v{} valid (q={}, P0={}, min_obs={})",
                    p.version, p.process_noise, p.initial_uncertainty, p.min_observations
                )
            })
        })),
        None => checks.push(DoctorCheck {
            name: "profile".to_string(),
            status: CheckStatus::Ok,
            message: "No profile given, defaults will be used".to_string(),
        }),
    }

    if let Some(states_path) = states {
        checks.push(check_file(states_path, "states", |content| {
            let store = StateStore::from_json(content)?;
            let reliable = store.iter().filter(|s| s.is_reliable).count();
            Ok(format!(
                "States file valid ({} tags, {} reliable)",
                store.len(),
                reliable
            ))
        }));
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass --input <file>)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (--input - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: GROWTH_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Growth Doctor Report");
        println!("====================");
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

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(GrowthCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn check_file<F>(path: &Path, name: &str, inspect: F) -> DoctorCheck
where
    F: FnOnce(&str) -> Result<String, ScoreError>,
{
    if !path.exists() {
        return DoctorCheck {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: format!("{} does not exist", path.display()),
        };
    }

    let (status, message) = match fs::read_to_string(path) {
        Ok(content) => match inspect(&content) {
            Ok(message) => (CheckStatus::Ok, message),
            Err(e) => (CheckStatus::Error, e.to_string()),
        },
        Err(e) => (CheckStatus::Error, format!("Cannot read file: {}", e)),
    };

    DoctorCheck {
        name: name.to_string(),
        status,
        message,
    }
}

fn build_processor(source: &SourceArgs) -> Result<GrowthProcessor, GrowthCliError> {
    let profile = match &source.profile {
        Some(path) => ConfigProfile::from_json(&fs::read_to_string(path)?)?,
        None => ConfigProfile::default(),
    };
    let catalog = TagCatalog::from_json(&fs::read_to_string(&source.tags)?)?;
    debug!(tags = catalog.len(), profile_version = profile.version, "building processor");

    Ok(GrowthProcessor::new(profile, catalog)?)
}

fn read_observations(input: &Path, format: &InputFormat) -> Result<Vec<RawObservation>, GrowthCliError> {
    let input_data = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let raws = match format {
        InputFormat::Ndjson => RawObservationAdapter::parse_ndjson(&input_data)?,
        InputFormat::Json => RawObservationAdapter::parse_array(&input_data)?,
    };

    if raws.is_empty() {
        return Err(GrowthCliError::NoObservations);
    }
    Ok(raws)
}

/// Entries stamped earlier than one already seen for the same key
fn count_late_arrivals(raws: &[RawObservation]) -> usize {
    let mut latest: HashMap<TagKey, chrono::DateTime<chrono::Utc>> = HashMap::new();
    let mut late = 0;
    for raw in raws {
        let key = TagKey::new(raw.student_id.clone(), raw.tag_id.clone());
        match latest.get(&key) {
            Some(&seen) if raw.timestamp < seen => late += 1,
            _ => {
                latest.insert(key, raw.timestamp);
            }
        }
    }
    late
}

fn format_output(states: &[&TagFilterState], format: &OutputFormat) -> Result<String, GrowthCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for state in states {
                lines.push(serde_json::to_string(state)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(states)? + "\n"),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(states)? + "\n"),
    }
}

fn write_output(output: &Path, data: &str) -> Result<(), GrowthCliError> {
    if output.to_string_lossy() == "-" {
        print!("{}", data);
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

// Error types

#[derive(Debug)]
enum GrowthCliError {
    Io(io::Error),
    Score(ScoreError),
    Json(serde_json::Error),
    NoObservations,
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for GrowthCliError {
    fn from(e: io::Error) -> Self {
        GrowthCliError::Io(e)
    }
}

impl From<ScoreError> for GrowthCliError {
    fn from(e: ScoreError) -> Self {
        GrowthCliError::Score(e)
    }
}

impl From<serde_json::Error> for GrowthCliError {
    fn from(e: serde_json::Error) -> Self {
        GrowthCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<GrowthCliError> for CliError {
    fn from(e: GrowthCliError) -> Self {
        match e {
            GrowthCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            GrowthCliError::Score(e) => {
                let hint = match &e {
                    ScoreError::InvalidConfig(_) => "Run 'growth doctor --profile <file>' for details",
                    ScoreError::UnknownTag(_) | ScoreError::InvalidWeight(_) => {
                        "Run 'growth validate' for details"
                    }
                    ScoreError::OutOfOrderObservation { .. } => {
                        "Replay from the full log instead of loaded states"
                    }
                    ScoreError::ParseError(_) | ScoreError::JsonError(_) => "Check input format",
                    _ => "Review the input data",
                };
                CliError {
                    code: e.code().to_uppercase(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            GrowthCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            GrowthCliError::NoObservations => CliError {
                code: "NO_OBSERVATIONS".to_string(),
                message: "No observations found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            GrowthCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} observations failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            GrowthCliError::DoctorFailed => CliError {
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
    late_arrivals: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    student_id: String,
    tag_id: String,
    code: String,
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
