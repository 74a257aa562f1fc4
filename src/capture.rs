//! EXIF capture attributes extracted from raw image bytes.
//!
//! Extraction is best-effort throughout: cameras disagree about which tags
//! they write, and email clients strip metadata freely, so a missing or
//! malformed EXIF block yields empty attributes rather than an error.

use chrono::{DateTime, NaiveDateTime, Utc};
use exif::{In, Reader, Tag, Value};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Capture-time attributes embedded in an image by the camera.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureAttributes {
    /// Timestamp the photo was taken, if the camera recorded one.
    pub captured_at: Option<DateTime<Utc>>,
    /// GPS latitude in decimal degrees (negative = southern hemisphere).
    pub latitude: Option<f64>,
    /// GPS longitude in decimal degrees (negative = western hemisphere).
    pub longitude: Option<f64>,
}

impl CaptureAttributes {
    /// Whether the camera recorded nothing we understand.
    pub fn is_empty(&self) -> bool {
        self.captured_at.is_none() && self.latitude.is_none() && self.longitude.is_none()
    }
}

/// Extract capture attributes from raw image bytes.
pub fn extract(bytes: &[u8]) -> CaptureAttributes {
    let exif = match read_exif(bytes) {
        Some(exif) => exif,
        None => return CaptureAttributes::default(),
    };

    CaptureAttributes {
        captured_at: extract_timestamp(&exif),
        latitude: extract_coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, "S"),
        longitude: extract_coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, "W"),
    }
}

/// EXIF orientation tag value (1..=8), if present.
pub fn orientation(bytes: &[u8]) -> Option<u32> {
    read_exif(bytes)?
        .get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
}

fn read_exif(bytes: &[u8]) -> Option<exif::Exif> {
    Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()
}

/// Capture timestamp priority: DateTimeOriginal, then DateTimeDigitized,
/// then the IFD0 DateTime.
fn extract_timestamp(exif: &exif::Exif) -> Option<DateTime<Utc>> {
    [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime]
        .iter()
        .find_map(|&tag| field_ascii(exif, tag).and_then(|s| parse_exif_datetime(&s)))
}

fn field_ascii(exif: &exif::Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Ascii(parts) if !parts.is_empty() => {
            Some(String::from_utf8_lossy(&parts[0]).trim().to_string())
        }
        _ => None,
    }
}

/// EXIF datetimes carry no timezone; they are interpreted as UTC.
fn parse_exif_datetime(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y:%m:%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Convert a degrees/minutes/seconds rational triplet into decimal degrees,
/// signed by the hemisphere reference tag.
fn extract_coordinate(
    exif: &exif::Exif,
    tag: Tag,
    ref_tag: Tag,
    negative_ref: &str,
) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let degrees = match &field.value {
        Value::Rational(parts) if parts.len() >= 3 => {
            parts[0].to_f64() + parts[1].to_f64() / 60.0 + parts[2].to_f64() / 3600.0
        }
        _ => return None,
    };

    let sign = match field_ascii(exif, ref_tag) {
        Some(reference) if reference.eq_ignore_ascii_case(negative_ref) => -1.0,
        _ => 1.0,
    };

    Some(sign * degrees)
}
