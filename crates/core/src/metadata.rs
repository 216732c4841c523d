//! Encoded upload-metadata codec.
//!
//! A create request carries descriptive metadata in a single header as a
//! comma-separated list of `key base64(value)` pairs, e.g.
//!
//! ```text
//! filename cmVwb3J0LnBkZg==,content_type YXBwbGljYXRpb24vcGRm,album aG9saWRheQ==
//! ```
//!
//! `filename` is required and must decode to a non-empty UTF-8 string.
//! `content_type` is optional and defaults to `application/octet-stream`.
//! All other pairs are carried opaquely into the session's custom metadata.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::collections::BTreeMap;

/// Default content type when the client does not declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Metadata key carrying the filename.
const FILENAME_KEY: &str = "filename";

/// Metadata key carrying the content type.
const CONTENT_TYPE_KEY: &str = "content_type";

/// Maximum accepted header length (16 KiB) to bound decode work.
const MAX_HEADER_LEN: usize = 16 * 1024;

/// Decoded upload metadata from a create request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadMetadata {
    /// Declared filename (required).
    pub filename: String,
    /// Declared content type, or the default.
    pub content_type: String,
    /// Remaining key/value pairs, carried opaquely.
    pub extra: BTreeMap<String, String>,
}

impl UploadMetadata {
    /// Parse the encoded metadata header.
    pub fn parse(header: &str) -> crate::Result<Self> {
        if header.len() > MAX_HEADER_LEN {
            return Err(crate::Error::InvalidMetadata(format!(
                "metadata header too large: {} bytes (max: {})",
                header.len(),
                MAX_HEADER_LEN
            )));
        }

        let mut pairs = BTreeMap::new();
        for entry in header.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }

            let mut tokens = entry.splitn(2, ' ');
            let key = tokens.next().unwrap_or_default();
            if key.is_empty() {
                return Err(crate::Error::InvalidMetadata(
                    "metadata key cannot be empty".to_string(),
                ));
            }
            if !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            {
                return Err(crate::Error::InvalidMetadata(format!(
                    "metadata key contains invalid characters: {key}"
                )));
            }

            // A key without a value is legal and decodes to the empty string.
            let value = match tokens.next() {
                Some(encoded) if !encoded.is_empty() => {
                    let raw = STANDARD.decode(encoded.trim()).map_err(|e| {
                        crate::Error::InvalidMetadata(format!(
                            "invalid base64 value for key {key}: {e}"
                        ))
                    })?;
                    String::from_utf8(raw).map_err(|_| {
                        crate::Error::InvalidMetadata(format!(
                            "value for key {key} is not valid UTF-8"
                        ))
                    })?
                }
                _ => String::new(),
            };

            if pairs.insert(key.to_string(), value).is_some() {
                return Err(crate::Error::InvalidMetadata(format!(
                    "duplicate metadata key: {key}"
                )));
            }
        }

        let filename = pairs.remove(FILENAME_KEY).unwrap_or_default();
        if filename.is_empty() {
            return Err(crate::Error::InvalidMetadata(
                "metadata must include a non-empty filename".to_string(),
            ));
        }

        let content_type = match pairs.remove(CONTENT_TYPE_KEY) {
            Some(ct) if !ct.is_empty() => ct,
            _ => DEFAULT_CONTENT_TYPE.to_string(),
        };

        Ok(Self {
            filename,
            content_type,
            extra: pairs,
        })
    }

    /// Encode back to the header form. Used by clients and tests.
    pub fn encode(&self) -> String {
        let mut entries = Vec::with_capacity(self.extra.len() + 2);
        entries.push(format!(
            "{FILENAME_KEY} {}",
            STANDARD.encode(self.filename.as_bytes())
        ));
        entries.push(format!(
            "{CONTENT_TYPE_KEY} {}",
            STANDARD.encode(self.content_type.as_bytes())
        ));
        for (key, value) in &self.extra {
            if value.is_empty() {
                entries.push(key.clone());
            } else {
                entries.push(format!("{key} {}", STANDARD.encode(value.as_bytes())));
            }
        }
        entries.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        // "report.pdf"
        let meta = UploadMetadata::parse("filename cmVwb3J0LnBkZg==").unwrap();
        assert_eq!(meta.filename, "report.pdf");
        assert_eq!(meta.content_type, DEFAULT_CONTENT_TYPE);
        assert!(meta.extra.is_empty());
    }

    #[test]
    fn test_parse_full() {
        let encoded = UploadMetadata {
            filename: "holiday.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            extra: BTreeMap::from([
                ("album".to_string(), "summer".to_string()),
                ("starred".to_string(), String::new()),
            ]),
        }
        .encode();

        let meta = UploadMetadata::parse(&encoded).unwrap();
        assert_eq!(meta.filename, "holiday.jpg");
        assert_eq!(meta.content_type, "image/jpeg");
        assert_eq!(meta.extra.get("album").map(String::as_str), Some("summer"));
        assert_eq!(meta.extra.get("starred").map(String::as_str), Some(""));
    }

    #[test]
    fn test_parse_rejects_missing_filename() {
        assert!(UploadMetadata::parse("").is_err());
        assert!(UploadMetadata::parse("album c3VtbWVy").is_err());
        // filename present but decodes to empty
        assert!(UploadMetadata::parse("filename").is_err());
    }

    #[test]
    fn test_parse_rejects_malformed_entries() {
        assert!(UploadMetadata::parse("filename not!base64").is_err());
        assert!(UploadMetadata::parse("bad key! cmVwb3J0").is_err());
        assert!(
            UploadMetadata::parse("filename cmVwb3J0LnBkZg==,filename cmVwb3J0LnBkZg==").is_err()
        );
    }

    #[test]
    fn test_parse_rejects_non_utf8_value() {
        // 0xff 0xfe is not valid UTF-8
        let header = format!("filename {}", STANDARD.encode([0xff, 0xfe]));
        assert!(UploadMetadata::parse(&header).is_err());
    }

    #[test]
    fn test_parse_rejects_oversized_header() {
        let huge = format!("filename {}", "A".repeat(MAX_HEADER_LEN + 1));
        assert!(UploadMetadata::parse(&huge).is_err());
    }
}
