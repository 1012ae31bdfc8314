//! Enrollment CSV source
//!
//! Downloads the export, decodes it (UTF-8, then Windows-1252, then lossy
//! UTF-8) and turns it into `InputRow`s keyed by the header row.

use std::borrow::Cow;

use async_trait::async_trait;
use encoding_rs::WINDOWS_1252;
use reqwest::Client;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::domain::InputRow;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CsvSourceError {
    #[error("failed to fetch CSV from {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("CSV download from {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("malformed CSV: {0}")]
    Parse(String),
}

impl From<csv::Error> for CsvSourceError {
    fn from(err: csv::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

#[async_trait]
pub trait CsvSource: Send + Sync {
    async fn fetch_rows(&self, url: &Url) -> Result<Vec<InputRow>, CsvSourceError>;
}

#[derive(Debug, Clone)]
pub struct HttpCsvSource {
    client: Client,
}

impl HttpCsvSource {
    pub const fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CsvSource for HttpCsvSource {
    async fn fetch_rows(&self, url: &Url) -> Result<Vec<InputRow>, CsvSourceError> {
        let fetch_err = |e: reqwest::Error| CsvSourceError::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        };

        info!("📥 Downloading CSV: {}", url);
        let response = self.client.get(url.clone()).send().await.map_err(fetch_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(CsvSourceError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await.map_err(fetch_err)?;

        let text = decode_csv_bytes(&bytes);
        let rows = parse_csv(&text)?;
        info!("📄 Parsed {} rows ({} bytes)", rows.len(), bytes.len());
        Ok(rows)
    }
}

/// Bytes that Windows-1252 leaves undefined.
const CP1252_UNDEFINED: [u8; 5] = [0x81, 0x8D, 0x8F, 0x90, 0x9D];

pub fn decode_csv_bytes(bytes: &[u8]) -> Cow<'_, str> {
    let text = match std::str::from_utf8(bytes) {
        Ok(s) => Cow::Borrowed(s),
        Err(_) if !bytes.iter().any(|b| CP1252_UNDEFINED.contains(b)) => {
            warn!("⚠️ CSV is not valid UTF-8, decoding as Windows-1252");
            WINDOWS_1252.decode_without_bom_handling(bytes).0
        }
        Err(_) => {
            warn!("⚠️ CSV is neither UTF-8 nor Windows-1252, replacing invalid bytes");
            String::from_utf8_lossy(bytes)
        }
    };

    match text {
        Cow::Borrowed(s) => Cow::Borrowed(s.strip_prefix('\u{feff}').unwrap_or(s)),
        Cow::Owned(mut s) => {
            if s.starts_with('\u{feff}') {
                s.replace_range(..'\u{feff}'.len_utf8(), "");
            }
            Cow::Owned(s)
        }
    }
}

/// Header-row CSV to rows. Short records get empty trailing cells, extra
/// cells are ignored, rows with every cell empty are dropped.
pub fn parse_csv(text: &str) -> Result<Vec<InputRow>, CsvSourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let row = InputRow::new(
            headers
                .iter()
                .enumerate()
                .map(|(i, name)| (name.to_string(), record.get(i).unwrap_or_default().to_string()))
                .collect(),
        );
        if !row.is_blank() {
            rows.push(row);
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_with_bom() {
        let bytes = "\u{feff}EmailAddress,FirstName\na@x.com,Zoë\n".as_bytes();
        let text = decode_csv_bytes(bytes);
        assert!(text.starts_with("EmailAddress"));

        let rows = parse_csv(&text).unwrap();
        assert_eq!(rows[0].get("EmailAddress"), Some("a@x.com"));
        assert_eq!(rows[0].get("FirstName"), Some("Zoë"));
    }

    #[test]
    fn test_windows_1252_fallback() {
        // "José" with é as 0xE9
        let bytes = b"FirstName\nJos\xe9\n";
        let text = decode_csv_bytes(bytes);
        assert_eq!(text, "FirstName\nJosé\n");
    }

    #[test]
    fn test_lossy_fallback_for_undefined_cp1252_bytes() {
        let bytes = b"FirstName\nA\x81B\n";
        let text = decode_csv_bytes(bytes);
        assert_eq!(text, "FirstName\nA\u{fffd}B\n");
    }

    #[test]
    fn test_short_rows_and_blank_rows() {
        let text = "EmailAddress,FirstName,Course\na@x.com,Ann\n,,\nb@x.com,Bob,Life,extra\n";
        let rows = parse_csv(text).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("Course"), Some(""));
        assert_eq!(rows[1].get("Course"), Some("Life"));
        assert_eq!(rows[1].len(), 3);
    }

    #[test]
    fn test_quoted_fields() {
        let text = "EmailAddress,HiringManager\na@x.com,\"Smith, Jo\"\n";
        let rows = parse_csv(text).unwrap();
        assert_eq!(rows[0].get("HiringManager"), Some("Smith, Jo"));
    }

    #[test]
    fn test_header_only() {
        assert!(parse_csv("EmailAddress,Phone\n").unwrap().is_empty());
    }
}
