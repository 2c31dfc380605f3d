//! InfluxDB line protocol output formatter.

use crate::monitor::Reading;
use crate::output::OutputFormatter;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Default measurement name in line protocol output.
pub const DEFAULT_MEASUREMENT: &str = "eddystone_tlm";

/// Field values for InfluxDB line protocol
#[derive(Debug, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::Integer(num) => write!(f, "{num}i"),
        }
    }
}

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint {
    pub measurement: String,
    pub tag_set: BTreeMap<String, String>,
    pub field_set: BTreeMap<String, FieldValue>,
    pub timestamp: Option<SystemTime>,
}

/// Escape commas, equals signs and spaces in tag keys and values.
fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn fmt_tags(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (key, value) in data_point.tag_set.iter() {
        write!(fmt, ",{}={}", escape_tag(key), escape_tag(value))?;
    }
    Ok(())
}

fn fmt_fields(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    let mut first = true;
    for (key, value) in data_point.field_set.iter() {
        if first {
            first = false;
        } else {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}={}", key, value)?;
    }
    Ok(())
}

fn fmt_timestamp(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    // Clocks before the epoch have no line protocol timestamp
    if let Some(nanos) = data_point
        .timestamp
        .and_then(|time| time.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|since_epoch| since_epoch.as_nanos())
    {
        write!(fmt, " {}", nanos)?;
    }
    Ok(())
}

impl fmt::Display for DataPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.measurement)?;
        fmt_tags(self, fmt)?;
        write!(fmt, " ")?;
        fmt_fields(self, fmt)?;
        fmt_timestamp(self, fmt)
    }
}

/// InfluxDB line protocol formatter.
///
/// Tags are the device address and, when advertised, its name. Temperature
/// and humidity are written in Celsius and percent, uptime in seconds.
pub struct InfluxDbFormatter {
    /// The measurement name in InfluxDB
    measurement_name: String,
}

impl InfluxDbFormatter {
    /// Create a new InfluxDB formatter.
    ///
    /// # Arguments
    /// * `measurement_name` - The measurement name to use in the line protocol
    pub fn new(measurement_name: String) -> Self {
        Self { measurement_name }
    }

    fn tag_set(reading: &Reading) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert("address".to_string(), reading.address.clone());
        if let Some(name) = &reading.name {
            tags.insert("name".to_string(), name.clone());
        }
        tags
    }

    fn field_set(reading: &Reading) -> BTreeMap<String, FieldValue> {
        let frame = &reading.frame;
        let mut fields = BTreeMap::new();

        macro_rules! add {
            ($name:literal, $val:expr) => {
                fields.insert($name.into(), $val);
            };
        }

        add!("temperature", FieldValue::Float(frame.temperature_celsius));
        add!("humidity", FieldValue::Float(frame.humidity_percent));
        add!("uptime", FieldValue::Float(frame.uptime_seconds));
        add!(
            "advertisement_count",
            FieldValue::Integer(i64::from(frame.advertisement_count))
        );
        add!("rssi", FieldValue::Integer(i64::from(reading.rssi)));
        add!("version", FieldValue::Integer(i64::from(frame.version)));

        fields
    }

    fn to_data_point(&self, reading: &Reading, timestamp: SystemTime) -> DataPoint {
        DataPoint {
            measurement: self.measurement_name.clone(),
            tag_set: Self::tag_set(reading),
            field_set: Self::field_set(reading),
            timestamp: Some(timestamp),
        }
    }
}

impl OutputFormatter for InfluxDbFormatter {
    fn format(&self, reading: &Reading, timestamp: SystemTime) -> String {
        format!("{}", self.to_data_point(reading, timestamp))
    }
}
