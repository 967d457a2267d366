use std::{error::Error, path::Path, path::PathBuf};

use clap::Parser;
use log::{error, info};
use sky_sync::{
    config::SyncConfig,
    db::{
        globe_at_night::reading::Reading,
        lib_download::http_client,
        lib_postgrest::RestTable,
    },
    error::SyncError,
    job::{run, run_with_file},
};
use tabled::{builder::Builder, settings::Style};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,

    /// Read the CSV from this file instead of downloading it
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Normalize only, print the first rows and don't upload anything
    #[arg(long)]
    dry_run: bool,
}

/// Make an ASCII table with the first rows
fn ascii_table(data: &[Reading], n: usize) -> tabled::Table {
    let mut builder = Builder::new();
    builder.push_record(vec![
        "Timestamp",
        "Latitude",
        "Longitude",
        "SQM",
        "Limiting Mag",
        "Device",
        "Notes",
    ]);
    for r in data.iter().take(n) {
        builder.push_record(vec![
            r.timestamp_utc.clone(),
            r.latitude.to_string(),
            r.longitude.to_string(),
            r.sky_brightness_mag_arcsec2
                .map(|e| e.to_string())
                .unwrap_or_default(),
            r.limiting_magnitude
                .map(|e| e.to_string())
                .unwrap_or_default(),
            r.device_type.clone(),
            r.notes.clone().unwrap_or_default(),
        ]);
    }
    let mut table = builder.build();
    table.with(Style::empty());
    table
}

/// A dry run doesn't need the storage credentials.
fn load_config(dry_run: bool) -> Result<SyncConfig, SyncError> {
    match SyncConfig::from_env() {
        Err(SyncError::MissingEnv(name)) if dry_run => {
            info!("{} is not set, fine for a dry run", name);
            SyncConfig::dry_run_from_env()
        }
        res => res,
    }
}

/// Run this job on the first of the month at 6AM UTC
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    // In CI the secrets come in as environment variables, no file needed
    let env_file = format!(".env/{}.env", args.env);
    if Path::new(&env_file).exists() {
        dotenvy::from_path(Path::new(&env_file))?;
    }

    let config = load_config(args.dry_run)?;
    let mut table = RestTable::new(http_client(config.fetch_timeout)?, config.storage.clone());
    let res = match &args.file {
        Some(path) => run_with_file(path, &config, &mut table, args.dry_run),
        None => run(&config, &mut table, args.dry_run),
    };

    let report = match res {
        Ok(report) => report,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };
    if args.dry_run {
        println!("{}", ascii_table(&report.preview, 20));
    }
    info!("{} rows were upserted", report.upserted);

    Ok(())
}
