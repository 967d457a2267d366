use std::borrow::Cow;

use csv::{ByteRecord, StringRecord};
use itertools::Itertools;
use jiff::civil::{Date, DateTime, Time};
use jiff::tz::TimeZone;
use jiff::Timestamp;

use crate::config::{NormalizeConfig, TimestampSource};
use crate::error::{Result, SyncError};

use super::reading::Reading;

pub const NOTES_SEPARATOR: &str = "; ";

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];
const TIME_FORMATS: [&str; 3] = ["%H:%M:%S", "%H:%M:%S%.f", "%H:%M"];

/// Row counts from one pass over the source file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeStats {
    pub rows_read: usize,
    /// No usable timestamp, latitude or longitude
    pub missing_essentials: usize,
    /// Brightness or limiting magnitude outside the plausible bounds
    pub out_of_range: usize,
    pub kept: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub readings: Vec<Reading>,
    pub stats: NormalizeStats,
}

/// Column positions resolved once from the header.
struct Columns {
    timestamp: TimestampColumns,
    latitude: usize,
    longitude: usize,
    brightness: Option<usize>,
    limiting_mag: Option<usize>,
    device: Option<usize>,
    notes: Vec<(String, usize)>,
}

enum TimestampColumns {
    Split { date: usize, time: usize },
    Combined(usize),
}

impl Columns {
    fn resolve(headers: &StringRecord, config: &NormalizeConfig) -> Result<Columns> {
        let find = |name: &str| headers.iter().position(|h| h == name);
        let require =
            |name: &str| find(name).ok_or_else(|| SyncError::MissingColumn(name.to_string()));

        // check everything up front so the error names the first missing column
        for name in config.required_columns() {
            require(name)?;
        }
        let timestamp = match &config.timestamp {
            TimestampSource::Split {
                date_column,
                time_column,
            } => TimestampColumns::Split {
                date: require(date_column.as_str())?,
                time: require(time_column.as_str())?,
            },
            TimestampSource::Combined { column } => {
                TimestampColumns::Combined(require(column.as_str())?)
            }
        };

        Ok(Columns {
            timestamp,
            latitude: require(config.latitude_column.as_str())?,
            longitude: require(config.longitude_column.as_str())?,
            brightness: find(config.brightness_column.as_str()),
            limiting_mag: find(config.limiting_mag_column.as_str()),
            device: config.device_column.as_deref().and_then(find),
            notes: config
                .note_fields
                .iter()
                .filter_map(|name| find(name.as_str()).map(|idx| (name.clone(), idx)))
                .collect(),
        })
    }
}

/// Parse the raw CSV export into readings.
///
/// Fails only if a required column is missing from the header (or the file
/// can't be read as CSV at all).  Rows with a bad timestamp or coordinates,
/// or with an implausible brightness/limiting magnitude, are dropped.
pub fn normalize(csv_text: &str, config: &NormalizeConfig) -> Result<Normalized> {
    let text = csv_text.strip_prefix('\u{feff}').unwrap_or(csv_text);
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let headers = rdr.headers()?.clone();
    let columns = Columns::resolve(&headers, config)?;

    let mut stats = NormalizeStats::default();
    let mut readings: Vec<Reading> = Vec::new();
    let mut record = ByteRecord::new();
    while rdr.read_byte_record(&mut record)? {
        stats.rows_read += 1;

        let timestamp_utc = match columns.timestamp {
            TimestampColumns::Split { date, time } => {
                match (field(&record, Some(date)), field(&record, Some(time))) {
                    (Some(d), Some(t)) => build_timestamp_utc(&d, &t),
                    _ => None,
                }
            }
            TimestampColumns::Combined(idx) => {
                field(&record, Some(idx)).and_then(|s| parse_combined_timestamp(&s))
            }
        };
        let latitude = number(&record, Some(columns.latitude));
        let longitude = number(&record, Some(columns.longitude));
        let (Some(timestamp_utc), Some(latitude), Some(longitude)) =
            (timestamp_utc, latitude, longitude)
        else {
            stats.missing_essentials += 1;
            continue;
        };

        let brightness = number(&record, columns.brightness);
        let limiting_mag = number(&record, columns.limiting_mag);
        let plausible = brightness.map_or(true, |v| config.brightness_bounds.contains(v))
            && limiting_mag.map_or(true, |v| config.limiting_mag_bounds.contains(v));
        if !plausible {
            stats.out_of_range += 1;
            continue;
        }

        let device_type = field(&record, columns.device)
            .map(|e| e.into_owned())
            .unwrap_or_else(|| config.default_device_type.clone());

        readings.push(Reading {
            timestamp_utc,
            latitude,
            longitude,
            sky_brightness_mag_arcsec2: brightness,
            limiting_magnitude: limiting_mag,
            device_type,
            source_tag: config.source_tag.clone(),
            upload_method: config.upload_method.clone(),
            notes: build_notes(&record, &columns.notes),
        });
    }
    stats.kept = readings.len();

    Ok(Normalized { readings, stats })
}

/// Combine a UTC date and time into `YYYY-MM-DDTHH:MM:SSZ`.
pub fn build_timestamp_utc(date: &str, time: &str) -> Option<String> {
    let date = parse_date(date.trim())?;
    let time = parse_time(time.trim())?;
    to_utc_string(date.to_datetime(time))
}

/// A single date-time column.  Values with an offset are converted to UTC,
/// values without one are taken to be UTC already.
pub fn parse_combined_timestamp(value: &str) -> Option<String> {
    let value = value.trim();
    if let Ok(ts) = value.parse::<Timestamp>() {
        return Some(format_utc(ts));
    }
    // a bare date would parse as midnight
    if !value.contains(|c: char| c == 'T' || c == 't' || c.is_whitespace()) {
        return None;
    }
    if let Ok(dt) = value.parse::<DateTime>() {
        return to_utc_string(dt);
    }
    let (date, time) = value.split_once(char::is_whitespace)?;
    build_timestamp_utc(date, time)
}

fn parse_date(s: &str) -> Option<Date> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| Date::strptime(fmt, s).ok())
}

fn parse_time(s: &str) -> Option<Time> {
    TIME_FORMATS
        .iter()
        .find_map(|fmt| Time::strptime(fmt, s).ok())
}

fn to_utc_string(dt: DateTime) -> Option<String> {
    let ts = dt.to_zoned(TimeZone::UTC).ok()?.timestamp();
    Some(format_utc(ts))
}

fn format_utc(ts: Timestamp) -> String {
    ts.strftime("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// `Field=value` pairs for the note fields that have a value, in order.
fn build_notes(record: &ByteRecord, fields: &[(String, usize)]) -> Option<String> {
    let notes = fields
        .iter()
        .filter_map(|(name, idx)| field(record, Some(*idx)).map(|v| format!("{name}={v}")))
        .join(NOTES_SEPARATOR);
    if notes.is_empty() {
        None
    } else {
        Some(notes)
    }
}

/// A trimmed, non-blank field.  Short rows just don't have the field.
fn field(record: &ByteRecord, idx: Option<usize>) -> Option<Cow<'_, str>> {
    let bytes = record.get(idx?)?;
    let value = String::from_utf8_lossy(bytes);
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Lenient numeric coercion, anything that isn't a finite number is null.
fn number(record: &ByteRecord, idx: Option<usize>) -> Option<f64> {
    field(record, idx)?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use crate::config::Bounds;

    use super::*;

    const HEADER: &str =
        "ObsType,UTDate,UTTime,Latitude,Longitude,LimitingMag,SQMReading,SQMSerial,CloudCover,Country";

    fn csv(rows: &[&str]) -> String {
        let mut out = HEADER.to_string();
        for row in rows {
            out.push('\n');
            out.push_str(row);
        }
        out
    }

    #[test]
    fn missing_required_column() {
        let text = "UTDate,Latitude,Longitude\n2024-03-15,32.2,-110.9\n";
        let res = normalize(text, &NormalizeConfig::default());
        assert!(matches!(res, Err(SyncError::MissingColumn(ref c)) if c == "UTTime"));

        // nothing but a header with none of the columns
        let res = normalize("A,B,C\n", &NormalizeConfig::default());
        assert!(matches!(res, Err(SyncError::MissingColumn(ref c)) if c == "UTDate"));

        let res = normalize("", &NormalizeConfig::default());
        assert!(matches!(res, Err(SyncError::MissingColumn(_))));
    }

    #[test]
    fn drop_bad_coordinates() -> Result<(), Box<dyn Error>> {
        let text = csv(&[
            "SQM,2024-03-15,21:45:00,32.2226,-110.9747,,21.3,1234,,United States",
            "SQM,2024-03-15,21:46:00,abc,-110.9747,,21.3,1234,,United States",
            "SQM,2024-03-15,21:47:00,32.2226,,,21.3,1234,,United States",
            "SQM,2024-03-15,21:48:00,NaN,-110.9747,,21.3,1234,,United States",
        ]);
        let out = normalize(&text, &NormalizeConfig::default())?;
        assert_eq!(out.readings.len(), 1);
        assert_eq!(out.readings[0].latitude, 32.2226);
        assert_eq!(out.readings[0].longitude, -110.9747);
        assert_eq!(out.stats.missing_essentials, 3);
        Ok(())
    }

    #[test]
    fn drop_bad_timestamps() -> Result<(), Box<dyn Error>> {
        let text = csv(&[
            "SQM,2024-02-30,21:45:00,32.2,-110.9,,21.3,,,",
            "SQM,2024-03-15,25:00:00,32.2,-110.9,,21.3,,,",
            "SQM,,21:45:00,32.2,-110.9,,21.3,,,",
            "SQM,2024-03-15,,32.2,-110.9,,21.3,,,",
        ]);
        let out = normalize(&text, &NormalizeConfig::default())?;
        assert!(out.readings.is_empty());
        assert_eq!(out.stats.rows_read, 4);
        assert_eq!(out.stats.missing_essentials, 4);
        Ok(())
    }

    #[test]
    fn brightness_bounds() -> Result<(), Box<dyn Error>> {
        let text = csv(&[
            "SQM,2024-03-15,21:45:00,32.2,-110.9,,7.9,,,",
            "SQM,2024-03-15,21:45:00,32.3,-110.9,,8.0,,,",
            "SQM,2024-03-15,21:45:00,32.4,-110.9,,25.0,,,",
            "SQM,2024-03-15,21:45:00,32.5,-110.9,,25.1,,,",
            "Visual,2024-03-15,21:45:00,32.6,-110.9,,,,,",
            "SQM,2024-03-15,21:45:00,32.7,-110.9,,n/a,,,",
        ]);
        let out = normalize(&text, &NormalizeConfig::default())?;
        let lats: Vec<f64> = out.readings.iter().map(|e| e.latitude).collect();
        assert_eq!(lats, vec![32.3, 32.4, 32.6, 32.7]);
        assert_eq!(out.readings[0].sky_brightness_mag_arcsec2, Some(8.0));
        assert_eq!(out.readings[2].sky_brightness_mag_arcsec2, None);
        assert_eq!(out.readings[3].sky_brightness_mag_arcsec2, None);
        assert_eq!(out.stats.out_of_range, 2);
        Ok(())
    }

    #[test]
    fn limiting_magnitude_bounds() -> Result<(), Box<dyn Error>> {
        let text = csv(&[
            "Visual,2024-03-15,21:45:00,32.2,-110.9,3.2,,,,",
            "Visual,2024-03-15,21:45:00,32.3,-110.9,-1,,,,",
            "Visual,2024-03-15,21:45:00,32.4,-110.9,10.5,,,,",
            "Visual,2024-03-15,21:45:00,32.5,-110.9,9.9,,,,",
        ]);
        let out = normalize(&text, &NormalizeConfig::default())?;
        let mags: Vec<Option<f64>> = out.readings.iter().map(|e| e.limiting_magnitude).collect();
        assert_eq!(mags, vec![Some(3.2), Some(9.9)]);
        assert_eq!(out.stats.out_of_range, 2);
        Ok(())
    }

    #[test]
    fn custom_bounds() -> Result<(), Box<dyn Error>> {
        let config = NormalizeConfig {
            brightness_bounds: Bounds::new(15.0, 22.0),
            ..NormalizeConfig::default()
        };
        let text = csv(&["SQM,2024-03-15,21:45:00,32.2,-110.9,,14.0,,,"]);
        assert!(normalize(&text, &config)?.readings.is_empty());
        Ok(())
    }

    #[test]
    fn notes_skip_blank_fields() -> Result<(), Box<dyn Error>> {
        let text = csv(&["Visual,2024-03-15,21:45:00,32.2,-110.9,3.2,,,  ,Chile"]);
        let out = normalize(&text, &NormalizeConfig::default())?;
        let notes = out.readings[0].notes.clone().unwrap();
        assert!(notes.contains("LimitingMag=3.2"));
        assert!(!notes.contains("CloudCover"));
        assert_eq!(notes, "ObsType=Visual; LimitingMag=3.2; Country=Chile");
        Ok(())
    }

    #[test]
    fn notes_absent() -> Result<(), Box<dyn Error>> {
        let text = "UTDate,UTTime,Latitude,Longitude,SQMReading\n2024-03-15,21:45:00,32.2,-110.9,20.1\n";
        let out = normalize(text, &NormalizeConfig::default())?;
        assert_eq!(out.readings.len(), 1);
        assert_eq!(out.readings[0].notes, None);
        assert_eq!(out.readings[0].limiting_magnitude, None);
        Ok(())
    }

    #[test]
    fn timestamp_from_date_and_time() {
        assert_eq!(
            build_timestamp_utc("2024-03-15", "21:45:00"),
            Some("2024-03-15T21:45:00Z".to_string())
        );
        assert_eq!(
            build_timestamp_utc("2024/03/15", "21:45"),
            Some("2024-03-15T21:45:00Z".to_string())
        );
        assert_eq!(
            build_timestamp_utc("03/15/2024", "02:05:09"),
            Some("2024-03-15T02:05:09Z".to_string())
        );
        // sub-seconds are cut, not rounded
        assert_eq!(
            build_timestamp_utc("2024-03-15", "21:45:00.750"),
            Some("2024-03-15T21:45:00Z".to_string())
        );
        assert_eq!(build_timestamp_utc("yesterday", "21:45:00"), None);
        assert_eq!(build_timestamp_utc("2024-03-15", "late"), None);
    }

    #[test]
    fn combined_timestamp() -> Result<(), Box<dyn Error>> {
        assert_eq!(
            parse_combined_timestamp("2024-03-15T23:45:00+02:00"),
            Some("2024-03-15T21:45:00Z".to_string())
        );
        assert_eq!(
            parse_combined_timestamp("2024-03-15T21:45:00Z"),
            Some("2024-03-15T21:45:00Z".to_string())
        );
        assert_eq!(
            parse_combined_timestamp("2024-03-15T21:45:00"),
            Some("2024-03-15T21:45:00Z".to_string())
        );
        assert_eq!(
            parse_combined_timestamp("2024/03/15 21:45:00"),
            Some("2024-03-15T21:45:00Z".to_string())
        );
        assert_eq!(parse_combined_timestamp("not a time"), None);
        assert_eq!(parse_combined_timestamp("2024-03-15"), None);

        let config = NormalizeConfig {
            timestamp: TimestampSource::Combined {
                column: "ObsDateTime".to_string(),
            },
            ..NormalizeConfig::default()
        };
        let text = "ObsDateTime,Latitude,Longitude\n2024-03-15T21:45:00Z,32.2,-110.9\nbad,32.2,-110.9\n2024-03-15,32.2,-110.9\n";
        let out = normalize(text, &config)?;
        assert_eq!(out.readings.len(), 1);
        assert_eq!(out.readings[0].timestamp_utc, "2024-03-15T21:45:00Z");
        assert_eq!(out.stats.missing_essentials, 2);

        // the split columns aren't needed in this mode
        let res = normalize("UTDate,UTTime,Latitude,Longitude\n", &config);
        assert!(matches!(res, Err(SyncError::MissingColumn(ref c)) if c == "ObsDateTime"));
        Ok(())
    }

    #[test]
    fn metadata_and_device_type() -> Result<(), Box<dyn Error>> {
        let text = csv(&[
            "SQM,2024-03-15,21:45:00,32.2,-110.9,,21.3,SQM-LU 1234,,",
            "SQM,2024-03-15,21:45:00,32.3,-110.9,,21.3,,,",
        ]);
        let out = normalize(&text, &NormalizeConfig::default())?;
        assert!(out.readings.iter().all(|e| e.device_type == "unknown"
            && e.source_tag == "globe_at_night"
            && e.upload_method == "gan_csv_import"));

        let config = NormalizeConfig {
            device_column: Some("SQMSerial".to_string()),
            ..NormalizeConfig::default()
        };
        let out = normalize(&text, &config)?;
        assert_eq!(out.readings[0].device_type, "SQM-LU 1234");
        assert_eq!(out.readings[1].device_type, "unknown");
        Ok(())
    }

    #[test]
    fn bom_whitespace_and_short_rows() -> Result<(), Box<dyn Error>> {
        let text = "\u{feff}UTDate, UTTime ,Latitude,Longitude,SQMReading,CloudCover\n 2024-03-15 , 21:45:00 , 32.2 ,-110.9\n";
        let out = normalize(text, &NormalizeConfig::default())?;
        assert_eq!(out.readings.len(), 1);
        let reading = &out.readings[0];
        assert_eq!(reading.timestamp_utc, "2024-03-15T21:45:00Z");
        assert_eq!(reading.latitude, 32.2);
        assert_eq!(reading.sky_brightness_mag_arcsec2, None);
        assert_eq!(reading.notes, None);
        Ok(())
    }

    #[test]
    fn stats_add_up() -> Result<(), Box<dyn Error>> {
        let text = csv(&[
            "SQM,2024-03-15,21:45:00,32.2,-110.9,,21.3,,,",
            "SQM,2024-03-15,21:45:00,abc,-110.9,,21.3,,,",
            "SQM,2024-03-15,21:45:00,32.2,-110.9,,30.0,,,",
            "Visual,2024-03-16,01:10,40.1,-74.2,4,,,,",
        ]);
        let out = normalize(&text, &NormalizeConfig::default())?;
        assert_eq!(
            out.stats,
            NormalizeStats {
                rows_read: 4,
                missing_essentials: 1,
                out_of_range: 1,
                kept: 2,
            }
        );
        // source order is kept
        assert_eq!(out.readings[1].timestamp_utc, "2024-03-16T01:10:00Z");
        Ok(())
    }
}
