//! Ledger row model.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// Kind of check a ledger row describes.
///
/// Declaration order is the order used when rendering summaries.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CheckType {
    PdfCheck,
    PdfDownload,
    CrtCheck,
    CrtDownload,
    CrlCheck,
    CrlDownload,
    OcspHttpCheck,
    OcspStatus,
    LdapPort,
    LdapSearch,
}

/// Outcome of a single check.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Status {
    Ok,
    Fail,
}

/// One row of the result ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub timestamp: DateTime<Utc>,
    pub check_type: CheckType,
    pub target: String,
    pub status: Status,
    pub code_or_port: String,
    pub duration_ms: u64,
    pub artifact_path: Option<String>,
    pub content_hash: Option<String>,
    pub note: String,
}

impl CheckRecord {
    /// Starts a record stamped with the current time. Defaults to `fail` with
    /// every optional column empty.
    pub fn new(check_type: CheckType, target: impl Into<String>) -> Self {
        CheckRecord {
            timestamp: now(),
            check_type,
            target: target.into(),
            status: Status::Fail,
            code_or_port: String::new(),
            duration_ms: 0,
            artifact_path: None,
            content_hash: None,
            note: String::new(),
        }
    }

    pub fn ok(mut self) -> Self {
        self.status = Status::Ok;
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn code(mut self, code: impl ToString) -> Self {
        self.code_or_port = code.to_string();
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    pub fn artifact(mut self, path: impl Into<String>, hash: impl Into<String>) -> Self {
        self.artifact_path = Some(path.into());
        self.content_hash = Some(hash.into());
        self
    }

    pub fn hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

/// Current UTC time truncated to whole seconds.
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now)
}

/// ISO-8601 rendering used in the ledger, e.g. `2025-10-03T08:15:00Z`.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_check_type_names() {
        assert_eq!(CheckType::OcspHttpCheck.to_string(), "ocsp_http_check");
        let name: &str = CheckType::PdfDownload.as_ref();
        assert_eq!(name, "pdf_download");
        assert_eq!(
            CheckType::from_str("ldap_search").unwrap(),
            CheckType::LdapSearch
        );
        assert!(CheckType::from_str("pdf").is_err());
    }

    #[test]
    fn test_builder_defaults_to_fail() {
        let record = CheckRecord::new(CheckType::CrlCheck, "https://crl.example/a.crl");
        assert_eq!(record.status, Status::Fail);
        assert!(record.artifact_path.is_none());

        let record = record.ok().code(200).duration_ms(12);
        assert!(record.is_ok());
        assert_eq!(record.code_or_port, "200");
        assert_eq!(record.duration_ms, 12);
    }

    #[test]
    fn test_timestamp_format() {
        let ts = DateTime::parse_from_rfc3339("2025-10-03T08:15:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_timestamp(&ts), "2025-10-03T08:15:00Z");
    }
}
