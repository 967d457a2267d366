use std::{env, str::FromStr, time::Duration};

use crate::error::{Result, SyncError};

/// The Globe at Night 2024 export.  Each year is published under a new
/// document id, so the URL can't be derived from the year.
pub const GAN_CSV_URL: &str = "https://globeatnight.org/documents/926/GaN2024.csv";

pub const DEFAULT_TABLE: &str = "sqm_readings";
pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(180);

/// Inclusive range of plausible values for a measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Bounds {
        Bounds { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Where the observation time comes from in the source file.
#[derive(Debug, Clone, PartialEq)]
pub enum TimestampSource {
    /// Separate UTC date and time columns, e.g. `UTDate` and `UTTime`.
    Split {
        date_column: String,
        time_column: String,
    },
    /// One column holding the full date-time.
    Combined { column: String },
}

impl TimestampSource {
    pub fn columns(&self) -> Vec<&str> {
        match self {
            TimestampSource::Split {
                date_column,
                time_column,
            } => vec![date_column.as_str(), time_column.as_str()],
            TimestampSource::Combined { column } => vec![column.as_str()],
        }
    }
}

impl Default for TimestampSource {
    fn default() -> Self {
        TimestampSource::Split {
            date_column: "UTDate".to_string(),
            time_column: "UTTime".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NormalizeConfig {
    pub timestamp: TimestampSource,
    pub latitude_column: String,
    pub longitude_column: String,
    pub brightness_column: String,
    pub limiting_mag_column: String,
    /// Sky brightness in mag/arcsec², anything outside is a bad reading
    pub brightness_bounds: Bounds,
    pub limiting_mag_bounds: Bounds,
    /// Auxiliary columns copied into `notes`, in this order.
    pub note_fields: Vec<String>,
    /// If set, the device type is read from this column when non-blank.
    pub device_column: Option<String>,
    pub default_device_type: String,
    pub source_tag: String,
    pub upload_method: String,
}

impl NormalizeConfig {
    /// Columns that must be in the header or the whole file is rejected.
    pub fn required_columns(&self) -> Vec<&str> {
        let mut columns = self.timestamp.columns();
        columns.push(self.latitude_column.as_str());
        columns.push(self.longitude_column.as_str());
        columns
    }
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        NormalizeConfig {
            timestamp: TimestampSource::default(),
            latitude_column: "Latitude".to_string(),
            longitude_column: "Longitude".to_string(),
            brightness_column: "SQMReading".to_string(),
            limiting_mag_column: "LimitingMag".to_string(),
            brightness_bounds: Bounds::new(8.0, 25.0),
            limiting_mag_bounds: Bounds::new(0.0, 9.9),
            note_fields: [
                "ObsType",
                "LimitingMag",
                "SQMSerial",
                "CloudCover",
                "Constellation",
                "Elevation(m)",
                "Country",
                "SkyComment",
                "LocationComment",
            ]
            .iter()
            .map(|e| e.to_string())
            .collect(),
            device_column: None,
            default_device_type: "unknown".to_string(),
            source_tag: "globe_at_night".to_string(),
            upload_method: "gan_csv_import".to_string(),
        }
    }
}

/// Connection details for the REST table the readings go to.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub base_url: String,
    pub api_key: String,
    pub table: String,
}

impl StorageConfig {
    pub fn new(base_url: &str, api_key: &str) -> StorageConfig {
        StorageConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            table: DEFAULT_TABLE.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub source_url: String,
    pub storage: StorageConfig,
    pub fetch_timeout: Duration,
    pub batch_size: usize,
    pub normalize: NormalizeConfig,
}

impl SyncConfig {
    pub fn new(source_url: &str, storage: StorageConfig) -> SyncConfig {
        SyncConfig {
            source_url: source_url.to_string(),
            storage,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            batch_size: DEFAULT_BATCH_SIZE,
            normalize: NormalizeConfig::default(),
        }
    }

    /// Read the configuration from the process environment.  Load a
    /// `.env` file with `dotenvy` first if needed.
    pub fn from_env() -> Result<SyncConfig> {
        SyncConfig::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<SyncConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| -> Result<String> {
            match lookup(name) {
                Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
                _ => Err(SyncError::MissingEnv(name.to_string())),
            }
        };
        let base_url = required("SUPABASE_URL")?;
        let api_key = required("SUPABASE_SERVICE_ROLE")?;

        let mut storage = StorageConfig::new(&base_url, &api_key);
        if let Some(table) = lookup("SQM_TABLE").filter(|e| !e.trim().is_empty()) {
            storage.table = table.trim().to_string();
        }

        let source_url = lookup("GAN_CSV_URL")
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| GAN_CSV_URL.to_string());
        let mut config = SyncConfig::new(source_url.trim(), storage);

        if let Some(n) = parse_positive::<usize, _>(&lookup, "GAN_BATCH_SIZE")? {
            config.batch_size = n;
        }
        if let Some(secs) = parse_positive::<u64, _>(&lookup, "GAN_FETCH_TIMEOUT_SECS")? {
            config.fetch_timeout = Duration::from_secs(secs);
        }
        config.validate()?;
        Ok(config)
    }

    /// Like [SyncConfig::from_env] but the storage credentials may be
    /// missing, for runs that never upload.
    pub fn dry_run_from_env() -> Result<SyncConfig> {
        SyncConfig::dry_run_from_lookup(|name| env::var(name).ok())
    }

    pub fn dry_run_from_lookup<F>(lookup: F) -> Result<SyncConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        SyncConfig::from_lookup(|name| match name {
            "SUPABASE_URL" | "SUPABASE_SERVICE_ROLE" => lookup(name)
                .filter(|e| !e.trim().is_empty())
                .or_else(|| Some("unset".to_string())),
            _ => lookup(name),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch size must be positive".to_string(),
            ));
        }
        for (name, b) in [
            ("brightness", self.normalize.brightness_bounds),
            ("limiting magnitude", self.normalize.limiting_mag_bounds),
        ] {
            if b.min > b.max {
                return Err(SyncError::InvalidConfig(format!(
                    "{name} bounds are inverted: {} > {}",
                    b.min, b.max
                )));
            }
        }
        Ok(())
    }
}

/// Parse an optional numeric variable, rejecting zero.
fn parse_positive<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr + PartialEq + Default,
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(name).filter(|e| !e.trim().is_empty()) else {
        return Ok(None);
    };
    match value.trim().parse::<T>() {
        Ok(n) if n != T::default() => Ok(Some(n)),
        _ => Err(SyncError::InvalidEnv {
            name: name.to_string(),
            value,
        }),
    }
}
