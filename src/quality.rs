// # Audio quality helpers
//
// Quality strings coming from peers are formatted inconsistently ("320 kbps",
// "320kbps", "44.1 kHz / 16 bit"). `normalize_quality` is the comparison key;
// `derive_quality` turns raw file attributes into the displayed quality.

use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Attribute codes used by peers when describing audio files
pub const ATTR_BITRATE: u32 = 0;
pub const ATTR_DURATION: u32 = 1;
pub const ATTR_VBR: u32 = 2;
pub const ATTR_SAMPLE_RATE: u32 = 4;
pub const ATTR_BIT_DEPTH: u32 = 5;

/// Errors while deriving quality from attributes
#[derive(Error, Debug, PartialEq)]
pub enum MetadataError {
    #[error("Malformed attributes: {0}")]
    Malformed(String),
    #[error("Bitrate is not numeric: {0}")]
    NonNumericBitrate(String),
}

/// Normalize a quality string for comparison: strip whitespace, lowercase
pub fn normalize_quality(quality: &str) -> String {
    quality
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Raw audio attributes attached to a shared file
#[derive(Debug, Clone, PartialEq)]
pub enum FileAttributes {
    /// Code -> value pairs (see the `ATTR_*` constants)
    Coded(BTreeMap<u32, u32>),
    /// Legacy positional list; the first value is the bitrate in bit/s
    Positional(Vec<Value>),
}

impl Default for FileAttributes {
    fn default() -> Self {
        FileAttributes::Coded(BTreeMap::new())
    }
}

impl FileAttributes {
    /// Interpret the attribute slot of a result record
    ///
    /// Accepts `null`, an object keyed by attribute code, a list of `[code, value]`
    /// pairs, or a positional list of values.
    pub fn from_value(value: &Value) -> Result<Self, MetadataError> {
        match value {
            Value::Null => Ok(FileAttributes::default()),
            Value::Object(map) => {
                let mut coded = BTreeMap::new();
                for (key, value) in map {
                    let code = key
                        .parse::<u32>()
                        .map_err(|_| MetadataError::Malformed(format!("attribute code {:?}", key)))?;
                    coded.insert(code, attribute_value(value)?);
                }
                Ok(FileAttributes::Coded(coded))
            }
            Value::Array(items) => {
                let pairs: Option<Vec<(u32, u32)>> = items.iter().map(as_pair).collect();
                match pairs {
                    Some(pairs) if !pairs.is_empty() => {
                        Ok(FileAttributes::Coded(pairs.into_iter().collect()))
                    }
                    _ => Ok(FileAttributes::Positional(items.clone())),
                }
            }
            other => Err(MetadataError::Malformed(other.to_string())),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FileAttributes::Coded(map) => map.is_empty(),
            FileAttributes::Positional(values) => values.is_empty(),
        }
    }

    fn get(&self, code: u32) -> Option<u32> {
        match self {
            FileAttributes::Coded(map) => map.get(&code).copied(),
            FileAttributes::Positional(_) => None,
        }
    }
}

fn attribute_value(value: &Value) -> Result<u32, MetadataError> {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| MetadataError::Malformed(format!("attribute value {}", value)))
}

fn as_pair(value: &Value) -> Option<(u32, u32)> {
    match value.as_array()?.as_slice() {
        [code, value] => Some((
            u32::try_from(code.as_u64()?).ok()?,
            u32::try_from(value.as_u64()?).ok()?,
        )),
        _ => None,
    }
}

/// Quality information derived from a file's size and attributes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioQuality {
    /// Displayed quality, empty when nothing could be derived
    pub quality: String,
    /// Bitrate in kbps
    pub bitrate: Option<u32>,
    /// Length as `m:ss` or `h:mm:ss`, empty when unknown
    pub human_length: String,
    /// Length in seconds
    pub length: Option<u32>,
}

/// Derive quality, bitrate and length from coded attributes
///
/// Lossless files (sample rate and bit depth known) are described by their sample
/// format, everything else by bitrate. Positional attributes yield nothing here.
pub fn derive_quality(size_bytes: u64, attributes: &FileAttributes) -> AudioQuality {
    let bitrate = attributes.get(ATTR_BITRATE).filter(|b| *b > 0);
    let is_vbr = attributes.get(ATTR_VBR) == Some(1);
    let sample_rate = attributes.get(ATTR_SAMPLE_RATE).filter(|r| *r > 0);
    let bit_depth = attributes.get(ATTR_BIT_DEPTH).filter(|d| *d > 0);

    let quality = match (sample_rate, bit_depth, bitrate) {
        (Some(rate), Some(depth), _) => format!("{} kHz / {} bit", format_khz(rate), depth),
        (_, _, Some(kbps)) if is_vbr => format!("{} kbps (vbr)", kbps),
        (_, _, Some(kbps)) => format!("{} kbps", kbps),
        _ => String::new(),
    };

    let length = attributes.get(ATTR_DURATION).filter(|l| *l > 0).or_else(|| {
        let kbps = u64::from(bitrate?);
        u32::try_from(size_bytes.saturating_mul(8) / (kbps * 1000)).ok()
    });

    AudioQuality {
        quality,
        bitrate,
        human_length: length.map(human_length).unwrap_or_default(),
        length,
    }
}

/// Fallback for legacy attribute lists: first value is the bitrate in bit/s
pub fn fallback_quality(attributes: &FileAttributes) -> Result<String, MetadataError> {
    let first = match attributes {
        FileAttributes::Positional(values) => values.first(),
        FileAttributes::Coded(_) => None,
    };
    let Some(first) = first else {
        return Ok(String::new());
    };

    let bits_per_second = match first {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite() && *v >= 0.0)
    .ok_or_else(|| MetadataError::NonNumericBitrate(first.to_string()))?;

    Ok(format!("{}kbps", (bits_per_second / 1000.0) as u64))
}

fn format_khz(rate_hz: u32) -> String {
    let khz = format!("{:.3}", f64::from(rate_hz) / 1000.0);
    khz.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn human_length(seconds: u32) -> String {
    let (hours, minutes, secs) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn coded(pairs: &[(u32, u32)]) -> FileAttributes {
        FileAttributes::Coded(pairs.iter().copied().collect())
    }

    #[test]
    fn test_normalize_ignores_case_and_whitespace() {
        assert_eq!(normalize_quality("320 KBPS"), normalize_quality("320kbps"));
        assert_eq!(normalize_quality("44.1 KHz/16 bit"), "44.1khz/16bit");
        assert_eq!(normalize_quality(" 44.1 kHz / 16 bit\t"), "44.1khz/16bit");
        assert_eq!(normalize_quality(""), "");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for s in ["320 kbps", "  A b\nC ", "44.1 KHz/16 bit", "", "ÀÉ x"] {
            let once = normalize_quality(s);
            assert_eq!(normalize_quality(&once), once);
        }
    }

    #[test]
    fn test_derive_lossy_bitrate() {
        let q = derive_quality(9_600_000, &coded(&[(ATTR_BITRATE, 320), (ATTR_DURATION, 240)]));
        assert_eq!(q.quality, "320 kbps");
        assert_eq!(q.bitrate, Some(320));
        assert_eq!(q.length, Some(240));
        assert_eq!(q.human_length, "4:00");
    }

    #[test]
    fn test_derive_vbr_and_estimated_length() {
        // 4 MB at 128 kbps is 250 seconds
        let q = derive_quality(4_000_000, &coded(&[(ATTR_BITRATE, 128), (ATTR_VBR, 1)]));
        assert_eq!(q.quality, "128 kbps (vbr)");
        assert_eq!(q.length, Some(250));
        assert_eq!(q.human_length, "4:10");
    }

    #[test]
    fn test_derive_lossless() {
        let q = derive_quality(
            40_000_000,
            &coded(&[(ATTR_SAMPLE_RATE, 44_100), (ATTR_BIT_DEPTH, 16), (ATTR_DURATION, 3_725)]),
        );
        assert_eq!(q.quality, "44.1 kHz / 16 bit");
        assert_eq!(normalize_quality(&q.quality), normalize_quality("44.1 KHz/16 bit"));
        assert_eq!(q.human_length, "1:02:05");

        let q = derive_quality(0, &coded(&[(ATTR_SAMPLE_RATE, 96_000), (ATTR_BIT_DEPTH, 24)]));
        assert_eq!(q.quality, "96 kHz / 24 bit");
    }

    #[test]
    fn test_derive_nothing() {
        let q = derive_quality(1_000, &coded(&[(ATTR_DURATION, 61)]));
        assert_eq!(q.quality, "");
        assert_eq!(q.human_length, "1:01");

        let q = derive_quality(1_000, &FileAttributes::Positional(vec![json!(320_000)]));
        assert_eq!(q, AudioQuality::default());
    }

    #[test]
    fn test_attributes_from_value() {
        assert_eq!(
            FileAttributes::from_value(&json!({"0": 320, "1": 200})).unwrap(),
            coded(&[(0, 320), (1, 200)])
        );
        assert_eq!(
            FileAttributes::from_value(&json!([[0, 192], [2, 0]])).unwrap(),
            coded(&[(0, 192), (2, 0)])
        );
        assert_eq!(
            FileAttributes::from_value(&json!([256000, 180])).unwrap(),
            FileAttributes::Positional(vec![json!(256000), json!(180)])
        );
        assert!(FileAttributes::from_value(&json!(null)).unwrap().is_empty());
        assert!(FileAttributes::from_value(&json!({"bitrate": 320})).is_err());
        assert!(FileAttributes::from_value(&json!("320")).is_err());
    }

    #[test]
    fn test_fallback_quality() {
        let positional = FileAttributes::Positional(vec![json!(320_000), json!(180)]);
        assert_eq!(fallback_quality(&positional).unwrap(), "320kbps");

        let textual = FileAttributes::Positional(vec![json!("192000")]);
        assert_eq!(fallback_quality(&textual).unwrap(), "192kbps");

        let bad = FileAttributes::Positional(vec![json!("fast")]);
        assert!(matches!(
            fallback_quality(&bad),
            Err(MetadataError::NonNumericBitrate(_))
        ));

        assert_eq!(fallback_quality(&coded(&[(1, 100)])).unwrap(), "");
    }
}
