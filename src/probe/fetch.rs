//! Document, certificate and revocation list probe.

use std::time::Instant;

use openssl::x509::{X509Crl, X509};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, CONNECTION};

use super::{elapsed_ms, existence_record, http_client};
use crate::config::Timeouts;
use crate::error::ProbeError;
use crate::record::{self, CheckRecord, CheckType};
use crate::store::{Artifact, ArtifactStore, DocumentKind};

/// Rows emitted by one fetch invocation.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub check: CheckRecord,
    pub download: CheckRecord,
}

impl FetchOutcome {
    pub fn into_records(self) -> Vec<CheckRecord> {
        vec![self.check, self.download]
    }
}

pub fn check_type(kind: DocumentKind) -> CheckType {
    match kind {
        DocumentKind::Pdf => CheckType::PdfCheck,
        DocumentKind::Crt => CheckType::CrtCheck,
        DocumentKind::Crl => CheckType::CrlCheck,
    }
}

pub fn download_type(kind: DocumentKind) -> CheckType {
    match kind {
        DocumentKind::Pdf => CheckType::PdfDownload,
        DocumentKind::Crt => CheckType::CrtDownload,
        DocumentKind::Crl => CheckType::CrlDownload,
    }
}

/// Checks and downloads published files of one [`DocumentKind`].
pub struct FetchProbe {
    store: ArtifactStore,
    check_client: Client,
    download_client: Client,
}

impl FetchProbe {
    pub fn new(store: ArtifactStore, timeouts: &Timeouts) -> Result<Self, ProbeError> {
        Ok(FetchProbe {
            store,
            check_client: http_client(timeouts.connect(), timeouts.check())?,
            download_client: http_client(timeouts.connect(), timeouts.download())?,
        })
    }

    /// Existence check followed by a full download.
    ///
    /// The download is skipped, and recorded as failed, when the existence
    /// check did not succeed. The two rows are timed independently.
    pub fn run(&self, kind: DocumentKind, url: &str) -> FetchOutcome {
        tracing::info!(kind = %kind, url = %url, "checking");
        let check = existence_record(&self.check_client, check_type(kind), url);

        let download = if check.is_ok() {
            self.download(kind, url)
        } else {
            CheckRecord::new(download_type(kind), url).note("not accessible")
        };
        FetchOutcome { check, download }
    }

    fn download(&self, kind: DocumentKind, url: &str) -> CheckRecord {
        let record = CheckRecord::new(download_type(kind), url);
        let start = Instant::now();
        match self.fetch_and_store(kind, url) {
            Ok((code, artifact, note)) => {
                let ms = elapsed_ms(start);
                tracing::info!(
                    kind = %kind,
                    path = %artifact.path.display(),
                    sha256 = %artifact.digest,
                    bytes = artifact.size,
                    ms,
                    "saved"
                );
                record
                    .ok()
                    .code(code)
                    .duration_ms(ms)
                    .artifact(artifact.path.display().to_string(), artifact.digest)
                    .note(note)
            }
            Err((code, e)) => {
                let ms = elapsed_ms(start);
                tracing::warn!(kind = %kind, url = %url, error = %e, ms, "download failed");
                let record = record.duration_ms(ms).note(e.note());
                match code {
                    Some(code) => record.code(code),
                    None => record,
                }
            }
        }
    }

    fn fetch_and_store(
        &self,
        kind: DocumentKind,
        url: &str,
    ) -> Result<(u16, Artifact, String), (Option<u16>, ProbeError)> {
        let captured_at = record::now();
        let response = self
            .download_client
            .get(url)
            .header(ACCEPT, "*/*")
            .header(CONNECTION, "close")
            .send()
            .map_err(|e| (None, ProbeError::from(e)))?;
        let code = response.status().as_u16();
        if !response.status().is_success() {
            return Err((Some(code), ProbeError::UnexpectedStatus { code }));
        }
        let bytes = response.bytes().map_err(|e| (Some(code), ProbeError::from(e)))?;
        let artifact = self
            .store
            .store(kind, url, &bytes, captured_at)
            .map_err(|e| (Some(code), ProbeError::from(e)))?;
        Ok((code, artifact, inspect(kind, &bytes)))
    }
}

/// One-line description of downloaded content for the ledger note.
pub fn inspect(kind: DocumentKind, bytes: &[u8]) -> String {
    match kind {
        DocumentKind::Pdf => inspect_pdf(bytes),
        DocumentKind::Crt => inspect_certificate(bytes),
        DocumentKind::Crl => inspect_crl(bytes),
    }
    .unwrap_or_else(|| "unrecognized content".to_string())
}

fn inspect_pdf(bytes: &[u8]) -> Option<String> {
    let rest = bytes.strip_prefix(b"%PDF-")?;
    let version: String = rest
        .iter()
        .take_while(|b| b.is_ascii_digit() || **b == b'.')
        .map(|b| *b as char)
        .collect();
    Some(format!("pdf {}", version))
}

fn inspect_certificate(bytes: &[u8]) -> Option<String> {
    let cert = X509::from_der(bytes)
        .or_else(|_| X509::from_pem(bytes))
        .ok()?;
    let cn = cert
        .subject_name()
        .entries_by_nid(openssl::nid::Nid::COMMONNAME)
        .next()
        .and_then(|e| e.data().to_string().ok())
        .unwrap_or_else(|| "None".to_string());
    Some(format!("CN={} notAfter={}", cn, cert.not_after()))
}

fn inspect_crl(bytes: &[u8]) -> Option<String> {
    let crl = X509Crl::from_der(bytes)
        .or_else(|_| X509Crl::from_pem(bytes))
        .ok()?;
    let revoked = crl.get_revoked().map(|r| r.len()).unwrap_or(0);
    let next = crl
        .next_update()
        .map(|t| t.to_string())
        .unwrap_or_else(|| "none".to_string());
    Some(format!(
        "lastUpdate={} nextUpdate={} revoked={}",
        crl.last_update(),
        next,
        revoked
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_types_per_kind() {
        assert_eq!(check_type(DocumentKind::Crl), CheckType::CrlCheck);
        assert_eq!(download_type(DocumentKind::Pdf), CheckType::PdfDownload);
    }

    #[test]
    fn test_inspect_pdf_header() {
        assert_eq!(inspect(DocumentKind::Pdf, b"%PDF-1.7\n%..."), "pdf 1.7");
        assert_eq!(
            inspect(DocumentKind::Pdf, b"<html>not found</html>"),
            "unrecognized content"
        );
    }

    #[test]
    fn test_inspect_certificate_subject_and_expiry() {
        let pem = include_bytes!("../../tests/fixtures/ocsp/good.crt");
        assert_eq!(
            inspect(DocumentKind::Crt, pem),
            "CN=Test good notAfter=Sep 20 19:36:28 2126 GMT"
        );

        let der = X509::from_pem(pem).unwrap().to_der().unwrap();
        assert_eq!(inspect(DocumentKind::Crt, &der), inspect(DocumentKind::Crt, pem));
    }

    #[test]
    fn test_inspect_crl_update_times_and_revoked_count() {
        let der = include_bytes!("../../tests/fixtures/crl/test.crl");
        assert_eq!(
            inspect(DocumentKind::Crl, der),
            "lastUpdate=Oct 14 23:56:08 2026 GMT nextUpdate=Sep 20 23:56:08 2126 GMT revoked=2"
        );

        let pem = X509Crl::from_der(der).unwrap().to_pem().unwrap();
        assert_eq!(inspect(DocumentKind::Crl, &pem), inspect(DocumentKind::Crl, der));
    }

    #[test]
    fn test_inspect_rejects_garbage_certificates() {
        assert_eq!(inspect(DocumentKind::Crt, b"\x30\x03\x02"), "unrecognized content");
        assert_eq!(inspect(DocumentKind::Crl, b""), "unrecognized content");
    }
}
