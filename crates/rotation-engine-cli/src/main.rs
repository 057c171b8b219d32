mod settings;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use rotation_engine::timezone::parse_rfc3339;
use rotation_engine::{
    compute_final_schedule, export_rotation, AllUsersKnown, CancellationFlag, LayerFailure,
    RotationDefinition, RotationRecord, ScheduleWindow, UserDirectory,
};

use crate::settings::{load_settings, Settings};

#[derive(Parser)]
#[command(name = "oncall-schedule", version, about = "Compute on-call schedules from rotation definitions")]
struct Cli {
    /// TOML settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the final schedule and print it as JSON
    Compose {
        /// JSON array of rotation records
        #[arg(long)]
        rotations: PathBuf,
        /// Window start (RFC 3339); defaults to today 00:00 UTC
        #[arg(long)]
        start: Option<String>,
        /// Window end (RFC 3339); defaults to start + window_days
        #[arg(long)]
        end: Option<String>,
        /// JSON array of known user ids; others are reported as missing
        #[arg(long)]
        users: Option<PathBuf>,
        /// Compact output instead of pretty-printed
        #[arg(long)]
        compact: bool,
    },
    /// Print each rotation's iCalendar DTSTART/RRULE lines
    Rrule {
        /// JSON array of rotation records
        #[arg(long)]
        rotations: PathBuf,
    },
}

/// One entry of the `rrule` output.
#[derive(Serialize)]
struct ExportedRule {
    id: String,
    ical: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;
    init_tracing(&settings.log_filter);

    match cli.command {
        Commands::Compose {
            rotations,
            start,
            end,
            users,
            compact,
        } => {
            let (definitions, mut invalid) = read_rotations(&rotations, &settings)?;
            let window = resolve_window(start.as_deref(), end.as_deref(), &settings)?;
            let known = users.as_deref().map(read_users).transpose()?;
            let directory: &dyn UserDirectory = match &known {
                Some(known) => known,
                None => &AllUsersKnown,
            };

            let mut schedule =
                compute_final_schedule(&definitions, window, directory, &CancellationFlag::new())?;
            invalid.extend(schedule.failures);
            schedule.failures = invalid;

            let output = if compact {
                serde_json::to_string(&schedule)?
            } else {
                serde_json::to_string_pretty(&schedule)?
            };
            println!("{output}");
        }
        Commands::Rrule { rotations } => {
            let (definitions, invalid) = read_rotations(&rotations, &settings)?;
            if let Some(failure) = invalid.first() {
                anyhow::bail!("rotation {}: {}", failure.rotation_id, failure.reason);
            }
            let rules = definitions
                .iter()
                .map(|rotation| {
                    export_rotation(rotation)
                        .map(|ical| ExportedRule {
                            id: rotation.id.clone(),
                            ical,
                        })
                        .with_context(|| format!("Failed to export rotation {}", rotation.id))
                })
                .collect::<Result<Vec<_>>>()?;
            println!("{}", serde_json::to_string_pretty(&rules)?);
        }
    }

    Ok(())
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Valid rotations, plus a failure entry for each record that does not
/// validate.
fn read_rotations(
    path: &Path,
    settings: &Settings,
) -> Result<(Vec<RotationDefinition>, Vec<LayerFailure>)> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read rotations from {}", path.display()))?;
    let records: Vec<RotationRecord> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse rotations in {}", path.display()))?;

    let mut definitions = Vec::with_capacity(records.len());
    let mut invalid = Vec::new();
    for mut record in records {
        let id = record.id.clone();
        record
            .payload
            .time_zone
            .get_or_insert_with(|| settings.default_time_zone.clone());
        match record.into_definition() {
            Ok(definition) => definitions.push(definition),
            Err(err) => {
                tracing::warn!(rotation_id = %id, error = %err, "skipping invalid rotation");
                invalid.push(LayerFailure {
                    rotation_id: id,
                    reason: err.to_string(),
                });
            }
        }
    }
    tracing::info!(rotations = definitions.len(), invalid = invalid.len(), "loaded rotations");
    Ok((definitions, invalid))
}

fn read_users(path: &Path) -> Result<BTreeSet<String>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read users from {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse users in {}", path.display()))
}

fn resolve_window(start: Option<&str>, end: Option<&str>, settings: &Settings) -> Result<ScheduleWindow> {
    let start: DateTime<Utc> = match start {
        Some(start) => parse_rfc3339(start)?,
        None => Utc::now().date_naive().and_time(NaiveTime::MIN).and_utc(),
    };
    let window = match end {
        Some(end) => ScheduleWindow::new(start, parse_rfc3339(end)?)?,
        None => ScheduleWindow::days(start, settings.window_days)?,
    };
    Ok(window)
}
