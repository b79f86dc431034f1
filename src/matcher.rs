use crate::quality::{derive_quality, fallback_quality, normalize_quality, FileAttributes};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Errors while destructuring a raw result record
#[derive(Error, Debug, PartialEq)]
pub enum RecordParseError {
    #[error("Record is not a list: {0}")]
    NotAList(String),
    #[error("Record has {0} fields, expected at least 5")]
    TooShort(usize),
    #[error("Invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Audio formats the user can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioFormat {
    Mp3,
    Flac,
    Ogg,
    Opus,
    Wav,
}

impl AudioFormat {
    pub const ALL: [AudioFormat; 5] = [
        AudioFormat::Mp3,
        AudioFormat::Flac,
        AudioFormat::Ogg,
        AudioFormat::Opus,
        AudioFormat::Wav,
    ];

    /// Lowercase file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Flac => "flac",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Opus => "opus",
            AudioFormat::Wav => "wav",
        }
    }

    /// Label as shown in the format picker
    pub fn label(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "MP3",
            AudioFormat::Flac => "FLAC",
            AudioFormat::Ogg => "OGG",
            AudioFormat::Opus => "OPUS",
            AudioFormat::Wav => "WAV",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AudioFormat::ALL
            .into_iter()
            .find(|format| format.extension().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unsupported audio format: {}", s))
    }
}

/// Quality presets the user can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QualityPreset {
    Kbps320,
    Kbps192,
    Kbps128,
    Cd,
    /// No quality preference
    Any,
}

impl QualityPreset {
    pub const ALL: [QualityPreset; 5] = [
        QualityPreset::Kbps320,
        QualityPreset::Kbps192,
        QualityPreset::Kbps128,
        QualityPreset::Cd,
        QualityPreset::Any,
    ];

    /// Label as shown in the quality picker; `Any` is the empty string
    pub fn label(&self) -> &'static str {
        match self {
            QualityPreset::Kbps320 => "320kbps",
            QualityPreset::Kbps192 => "192kbps",
            QualityPreset::Kbps128 => "128kbps",
            QualityPreset::Cd => "44.1 KHz/16 bit",
            QualityPreset::Any => "",
        }
    }
}

impl FromStr for QualityPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize_quality(s);
        if wanted == "any" {
            return Ok(QualityPreset::Any);
        }
        QualityPreset::ALL
            .into_iter()
            .find(|preset| normalize_quality(preset.label()) == wanted)
            .ok_or_else(|| format!("Unsupported audio quality: {}", s))
    }
}

/// What a result must look like to be downloaded; fixed for the duration of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchCriteria {
    pub format: AudioFormat,
    pub quality: QualityPreset,
}

/// One file offered by a peer, with the fields the matcher needs
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredFile {
    pub peer: String,
    pub remote_path: String,
    pub size_bytes: u64,
    pub filename: String,
    /// Lowercased, without the dot
    pub extension: String,
    /// Derived quality; empty when it could not be derived
    pub quality: String,
    pub bitrate: Option<u32>,
    pub human_length: String,
    pub length: Option<u32>,
    pub is_private: bool,
}

impl DiscoveredFile {
    /// Build from a raw record `[code, remote_path, size, extension, attributes, ...]`
    ///
    /// Trailing fields are ignored. A missing quality falls back to the legacy
    /// positional bitrate; if that fails too the quality stays empty.
    pub fn from_record(
        peer: &str,
        record: &Value,
        private_marker: &str,
    ) -> Result<Self, RecordParseError> {
        let fields = record
            .as_array()
            .ok_or_else(|| RecordParseError::NotAList(record.to_string()))?;
        if fields.len() < 5 {
            return Err(RecordParseError::TooShort(fields.len()));
        }

        let remote_path = fields[1]
            .as_str()
            .filter(|path| !path.is_empty())
            .ok_or_else(|| RecordParseError::InvalidField {
                field: "remote path",
                value: fields[1].to_string(),
            })?
            .to_string();
        let size_bytes = fields[2]
            .as_u64()
            .ok_or_else(|| RecordParseError::InvalidField {
                field: "size",
                value: fields[2].to_string(),
            })?;
        let attributes =
            FileAttributes::from_value(&fields[4]).map_err(|e| RecordParseError::InvalidField {
                field: "attributes",
                value: e.to_string(),
            })?;

        Ok(Self::new(peer, remote_path, size_bytes, &attributes, private_marker))
    }

    /// Build from already-typed parts
    pub fn new(
        peer: &str,
        remote_path: String,
        size_bytes: u64,
        attributes: &FileAttributes,
        private_marker: &str,
    ) -> Self {
        let filename = filename_of(&remote_path).to_string();
        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();

        let derived = derive_quality(size_bytes, attributes);
        let quality = if derived.quality.is_empty() && !attributes.is_empty() {
            fallback_quality(attributes).unwrap_or_else(|e| {
                warn!("Could not convert bitrate for {}: {}", filename, e);
                String::new()
            })
        } else {
            derived.quality
        };

        let marker = private_marker.to_lowercase();
        let is_private = !marker.is_empty() && filename.to_lowercase().contains(&marker);

        DiscoveredFile {
            peer: peer.to_string(),
            remote_path,
            size_bytes,
            filename,
            extension,
            quality,
            bitrate: derived.bitrate,
            human_length: derived.human_length,
            length: derived.length,
            is_private,
        }
    }
}

/// Last segment of a peer path; peers use backslash separators
fn filename_of(remote_path: &str) -> &str {
    remote_path
        .rsplit(['\\', '/'])
        .next()
        .unwrap_or(remote_path)
}

/// Per-rule outcome, kept for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchDecision {
    pub format_match: bool,
    pub quality_match: bool,
    pub is_private: bool,
}

impl MatchDecision {
    pub fn qualifies(&self) -> bool {
        self.format_match && self.quality_match && !self.is_private
    }
}

/// Evaluate each rule separately
///
/// A file with no derivable quality never matches, not even when the user asked for
/// any quality.
pub fn evaluate(file: &DiscoveredFile, criteria: &MatchCriteria) -> MatchDecision {
    let wanted_quality = criteria.quality.label();
    let quality_match = if file.quality.is_empty() {
        false
    } else if wanted_quality.is_empty() {
        true
    } else {
        normalize_quality(wanted_quality) == normalize_quality(&file.quality)
    };

    MatchDecision {
        format_match: file.extension.eq_ignore_ascii_case(criteria.format.extension()),
        quality_match,
        is_private: file.is_private,
    }
}

/// Whether a discovered file qualifies for download under `criteria`
pub fn matches(file: &DiscoveredFile, criteria: &MatchCriteria) -> bool {
    evaluate(file, criteria).qualifies()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MARKER: &str = "[prive]";

    fn mp3_320() -> MatchCriteria {
        MatchCriteria {
            format: AudioFormat::Mp3,
            quality: QualityPreset::Kbps320,
        }
    }

    fn file(path: &str, attrs: Value) -> DiscoveredFile {
        DiscoveredFile::from_record("peer", &json!([1, path, 5_000_000, "", attrs]), MARKER)
            .unwrap()
    }

    #[test]
    fn test_parse_presets() {
        assert_eq!("mp3".parse::<AudioFormat>().unwrap(), AudioFormat::Mp3);
        assert_eq!("FLAC".parse::<AudioFormat>().unwrap(), AudioFormat::Flac);
        assert!("aac".parse::<AudioFormat>().is_err());

        assert_eq!("320 KBPS".parse::<QualityPreset>().unwrap(), QualityPreset::Kbps320);
        assert_eq!("44.1 kHz / 16 bit".parse::<QualityPreset>().unwrap(), QualityPreset::Cd);
        assert_eq!("".parse::<QualityPreset>().unwrap(), QualityPreset::Any);
        assert_eq!("any".parse::<QualityPreset>().unwrap(), QualityPreset::Any);
        assert!("256kbps".parse::<QualityPreset>().is_err());
    }

    #[test]
    fn test_record_destructuring() {
        let f = file("Music\\Artist\\01 - Song A.MP3", json!({"0": 320, "1": 200}));
        assert_eq!(f.filename, "01 - Song A.MP3");
        assert_eq!(f.extension, "mp3");
        assert_eq!(f.quality, "320 kbps");
        assert_eq!(f.human_length, "3:20");
        assert!(!f.is_private);

        let extra = json!([1, "a\\b.flac", 10, "flac", null, "trailing", 42]);
        assert!(DiscoveredFile::from_record("p", &extra, MARKER).is_ok());
    }

    #[test]
    fn test_record_parse_failures() {
        assert!(matches!(
            DiscoveredFile::from_record("p", &json!("nope"), MARKER),
            Err(RecordParseError::NotAList(_))
        ));
        assert_eq!(
            DiscoveredFile::from_record("p", &json!([1, "a.mp3", 10]), MARKER),
            Err(RecordParseError::TooShort(3))
        );
        assert!(matches!(
            DiscoveredFile::from_record("p", &json!([1, 7, 10, "", null]), MARKER),
            Err(RecordParseError::InvalidField { field: "remote path", .. })
        ));
        assert!(matches!(
            DiscoveredFile::from_record("p", &json!([1, "a.mp3", -1, "", null]), MARKER),
            Err(RecordParseError::InvalidField { field: "size", .. })
        ));
        assert!(matches!(
            DiscoveredFile::from_record("p", &json!([1, "a.mp3", 1, "", "320"]), MARKER),
            Err(RecordParseError::InvalidField { field: "attributes", .. })
        ));
    }

    #[test]
    fn test_positional_fallback_quality() {
        let f = file("x\\song.mp3", json!([320_000, 180]));
        assert_eq!(f.quality, "320kbps");
        assert!(matches(&f, &mp3_320()));

        let f = file("x\\song.mp3", json!(["n/a"]));
        assert_eq!(f.quality, "");
        assert!(!matches(&f, &mp3_320()));
    }

    #[test]
    fn test_matching_is_conjunctive() {
        let criteria = mp3_320();
        let good = file("x\\Song A.mp3", json!({"0": 320}));
        assert!(matches(&good, &criteria));

        let wrong_format = file("x\\Song A.flac", json!({"0": 320}));
        assert!(!matches(&wrong_format, &criteria));

        let wrong_quality = file("x\\Song A.mp3", json!({"0": 192}));
        assert!(!matches(&wrong_quality, &criteria));

        let private = file("x\\Song A [PRIVE].mp3", json!({"0": 320}));
        assert!(private.is_private);
        assert!(!matches(&private, &criteria));
    }

    #[test]
    fn test_any_quality() {
        let criteria = MatchCriteria {
            format: AudioFormat::Mp3,
            quality: QualityPreset::Any,
        };
        assert!(matches(&file("x\\a.mp3", json!({"0": 128})), &criteria));
        // nothing derivable never matches
        assert!(!matches(&file("x\\a.mp3", json!(null)), &criteria));
    }

    #[test]
    fn test_lossless_quality_match() {
        let criteria = MatchCriteria {
            format: AudioFormat::Flac,
            quality: QualityPreset::Cd,
        };
        let f = file("x\\a.flac", json!({"4": 44100, "5": 16}));
        let decision = evaluate(&f, &criteria);
        assert!(decision.format_match && decision.quality_match && !decision.is_private);
        assert!(decision.qualifies());
    }

    #[test]
    fn test_vbr_does_not_match_constant_preset() {
        let f = file("x\\a.mp3", json!({"0": 320, "2": 1}));
        assert!(!matches(&f, &mp3_320()));
    }

    #[test]
    fn test_file_without_extension() {
        let f = file("x\\README", json!({"0": 320}));
        assert_eq!(f.extension, "");
        assert!(!matches(&f, &mp3_320()));
    }
}
