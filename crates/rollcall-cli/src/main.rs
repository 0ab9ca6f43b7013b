use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{AttendanceRecord, Identity};
use rollcall_service::{
    AttendanceSystem, BatchError, CommandEmbeddingProvider, Config, ConfigError, EnrollmentError,
    FileOutcome, FileReport, OpenError, RecognitionError,
};
use rollcall_store::StoreError;
use tracing_subscriber::EnvFilter;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance from the command line")]
struct Cli {
    /// TOML configuration file (default: $ROLLCALL_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll (or re-enroll) an identity from a face photo
    Enroll {
        /// Stable identity id, e.g. a student number
        id: String,
        /// Photo containing the person's face
        image: PathBuf,
        /// Display name (defaults to the id)
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Recognize the face in a photo and mark attendance
    Recognize {
        image: PathBuf,
        /// Where the photo came from (defaults to `default_source`)
        #[arg(short, long)]
        source: Option<String>,
    },
    /// Enroll every photo in a directory, using each file name as the id
    EnrollDir { dir: PathBuf },
    /// Mark attendance for every photo in a directory
    RecognizeDir {
        dir: PathBuf,
        /// Where the photos came from (defaults to `default_source`)
        #[arg(short, long)]
        source: Option<String>,
    },
    /// Print the attendance ledger
    Attendance {
        #[arg(long)]
        json: bool,
    },
    /// List enrolled identities
    Identities {
        #[arg(long)]
        json: bool,
    },
    /// Remove an enrolled identity
    Remove { id: String },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Enroll { id, image, name } => {
            let system = open(&config).await?;
            let bytes = read_image(&image).await?;
            let name = name.unwrap_or_else(|| id.clone());
            let identity = system.enroll(&id, &name, &bytes).await?;
            println!("Enrolled {} ({})", identity.id, identity.display_name);
        }
        Commands::Recognize { image, source } => {
            let system = open(&config).await?;
            let bytes = read_image(&image).await?;
            let source = source.unwrap_or_else(|| system.config().default_source.clone());
            let record = system.recognize(&bytes, &source).await?;
            println!(
                "Attendance marked for {} ({}) at {}",
                record.display_name,
                record.identity_id,
                record.timestamp.format(TIMESTAMP_FORMAT)
            );
        }
        Commands::EnrollDir { dir } => {
            let system = open(&config).await?;
            let report = system.enroll_dir(&dir).await?;
            finish_batch(report, "enrolled", |i| format!("{} ({})", i.id, i.display_name), |e| {
                e.is_per_image()
            })?;
        }
        Commands::RecognizeDir { dir, source } => {
            let system = open(&config).await?;
            let source = source.unwrap_or_else(|| system.config().default_source.clone());
            let report = system.recognize_dir(&dir, &source).await?;
            finish_batch(
                report,
                "present",
                |r| format!("{} ({}) at {}", r.display_name, r.identity_id, r.timestamp.format(TIMESTAMP_FORMAT)),
                |e| e.is_per_image(),
            )?;
        }
        Commands::Attendance { json } => {
            let system = open(&config).await?;
            let records = system.list_attendance().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print_attendance(&records);
            }
        }
        Commands::Identities { json } => {
            let system = open(&config).await?;
            let identities = system.list_identities().await?;
            if json {
                let summary: Vec<_> = identities.iter().map(identity_json).collect();
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_identities(&identities);
            }
        }
        Commands::Remove { id } => {
            let system = open(&config).await?;
            if system.remove_identity(&id).await? {
                println!("Removed {id}");
            } else {
                anyhow::bail!(StoreError::NotFound(id));
            }
        }
    }

    Ok(())
}

async fn open(config: &Config) -> Result<AttendanceSystem<CommandEmbeddingProvider>> {
    let provider = CommandEmbeddingProvider::from_config(config)?;
    Ok(AttendanceSystem::open(config, provider).await?)
}

async fn read_image(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read image {}", path.display()))
}

/// Print one line per file and a summary. Per-photo failures are reported
/// and skipped; the first failure of the system itself becomes the error.
fn finish_batch<T, E>(
    report: Vec<FileReport<T, E>>,
    verb: &str,
    describe: impl Fn(&T) -> String,
    per_image: impl Fn(&E) -> bool,
) -> Result<()>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let total = report.len();
    let done = report.iter().filter(|r| r.is_done()).count();
    let mut fatal = None;

    for FileReport { file, outcome } in report {
        let name = file.display();
        match outcome {
            FileOutcome::Done(value) => println!("{verb:<9} {name}: {}", describe(&value)),
            FileOutcome::Unreadable(err) => println!("{:<9} {name}: {err}", "unreadable"),
            FileOutcome::Failed(err) => {
                println!("{:<9} {name}: {err}", "skipped");
                if fatal.is_none() && !per_image(&err) {
                    fatal = Some(err);
                }
            }
        }
    }
    println!("{done} of {total} photos {verb}");

    match fatal {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn print_attendance(records: &[AttendanceRecord]) {
    if records.is_empty() {
        println!("No attendance recorded");
        return;
    }
    for r in records {
        println!(
            "{}  {:<16} {:<24} {:<12} {}",
            r.timestamp.format(TIMESTAMP_FORMAT),
            r.identity_id,
            r.display_name,
            r.source,
            r.evidence
        );
    }
}

fn print_identities(identities: &[Identity]) {
    if identities.is_empty() {
        println!("No identities enrolled");
        return;
    }
    for i in identities {
        println!(
            "{:<16} {:<24} enrolled {}  updated {}",
            i.id,
            i.display_name,
            i.enrolled_at.format(TIMESTAMP_FORMAT),
            i.updated_at.format(TIMESTAMP_FORMAT)
        );
    }
}

fn identity_json(identity: &Identity) -> serde_json::Value {
    serde_json::json!({
        "id": identity.id,
        "display_name": identity.display_name,
        "dimension": identity.embedding.dimension(),
        "enrolled_at": identity.enrolled_at,
        "updated_at": identity.updated_at,
    })
}

/// Map a failure to the exit status scripts can branch on.
fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(e) = err.downcast_ref::<EnrollmentError>() {
        return e.exit_code();
    }
    if let Some(e) = err.downcast_ref::<RecognitionError>() {
        return e.exit_code();
    }
    if err.downcast_ref::<ConfigError>().is_some() {
        return 78;
    }
    if err.downcast_ref::<BatchError>().is_some() {
        return 66;
    }
    match err.downcast_ref::<OpenError>() {
        Some(OpenError::Config(_)) => return 78,
        Some(OpenError::Storage(_)) => return 74,
        None => {}
    }
    match err.downcast_ref::<StoreError>() {
        Some(StoreError::NotFound(_)) => 1,
        Some(_) => 74,
        None => 1,
    }
}
