use serde::Serialize;

/// Columns of the natural key, as passed to the `on_conflict` parameter.
pub const NATURAL_KEY_COLUMNS: [&str; 5] = [
    "timestamp_utc",
    "latitude",
    "longitude",
    "device_type",
    "source_tag",
];

/// One sky brightness observation, ready for upload.  Field names are the
/// column names of the `sqm_readings` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub timestamp_utc: String,
    pub latitude: f64,
    pub longitude: f64,
    pub sky_brightness_mag_arcsec2: Option<f64>,
    pub limiting_magnitude: Option<f64>,
    pub device_type: String,
    pub source_tag: String,
    pub upload_method: String,
    pub notes: Option<String>,
}

/// Identifies an observation in the remote table.  Coordinates are kept
/// in their shortest round-trip text form so the key is `Ord` and `Hash`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NaturalKey {
    pub timestamp_utc: String,
    pub latitude: String,
    pub longitude: String,
    pub device_type: String,
    pub source_tag: String,
}

impl Reading {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            timestamp_utc: self.timestamp_utc.clone(),
            latitude: self.latitude.to_string(),
            longitude: self.longitude.to_string(),
            device_type: self.device_type.clone(),
            source_tag: self.source_tag.clone(),
        }
    }
}
