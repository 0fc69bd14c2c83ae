//! OCSP responder probe.
//!
//! Two rows per responder: an HTTP reachability check and a status query for
//! a known test certificate. The responder's signature is not verified; the
//! query proves the responder is alive and answering, nothing more.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use openssl::hash::MessageDigest;
use openssl::ocsp::{OcspCertId, OcspCertIdRef, OcspRequest, OcspResponse};
use openssl::x509::X509;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HOST};
use serde::Serialize;
use strum_macros::Display;

use super::{elapsed_ms, existence_record, http_client};
use crate::config::{Config, OcspConfig};
use crate::error::ProbeError;
use crate::record::{CheckRecord, CheckType};
use crate::store::{digest, ArtifactStore, DocumentKind};

/// Certificate status reported by the responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[strum(serialize_all = "lowercase")]
pub enum CertStatus {
    Good,
    Revoked,
    Unknown,
}

/// Everything extracted from a successful OCSP response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OcspReport {
    pub cert_status: CertStatus,
    pub revocation_time: Option<String>,
    pub revocation_reason: Option<String>,
    pub this_update: String,
    pub next_update: Option<String>,
    /// Responder signature verification result; always `skipped`.
    pub verification: String,
}

impl OcspReport {
    /// Ledger note, e.g. `good` or `revoked Revocation Time: ... Reason: keyCompromise`.
    pub fn note(&self) -> String {
        let mut note = self.cert_status.to_string();
        if let Some(time) = &self.revocation_time {
            note.push_str(&format!(" Revocation Time: {}", time));
            if let Some(reason) = &self.revocation_reason {
                note.push_str(&format!(" Reason: {}", reason));
            }
        }
        note
    }
}

pub struct OcspProbe {
    store: ArtifactStore,
    issuer_cert: PathBuf,
    test_cert: PathBuf,
    check_client: Client,
    query_client: Client,
}

impl OcspProbe {
    pub fn new(config: &Config, store: ArtifactStore) -> Result<Self, ProbeError> {
        let OcspConfig {
            issuer_cert,
            test_cert,
        } = &config.ocsp;
        let timeouts = &config.timeouts;
        Ok(OcspProbe {
            store,
            issuer_cert: config.artifact_path(issuer_cert),
            test_cert: config.artifact_path(test_cert),
            check_client: http_client(timeouts.ocsp_connect(), timeouts.check())?,
            query_client: http_client(timeouts.ocsp_connect(), timeouts.ocsp())?,
        })
    }

    /// Reachability row followed by the status row.
    pub fn run(&self, url: &str) -> Vec<CheckRecord> {
        tracing::info!(url = %url, "checking OCSP responder");
        vec![
            existence_record(&self.check_client, CheckType::OcspHttpCheck, url),
            self.status(url),
        ]
    }

    /// Queries the status of the test certificate.
    ///
    /// Missing inputs produce a `fail` row with a `skipped:` note so the row
    /// still counts in the summary.
    pub fn status(&self, url: &str) -> CheckRecord {
        let record = CheckRecord::new(CheckType::OcspStatus, url);
        let (issuer, subject) = match self.load_inputs() {
            Ok(certs) => certs,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "OCSP status query not attempted");
                return record.note(e.note());
            }
        };

        let start = Instant::now();
        match self.query(url, &issuer, &subject) {
            Ok((code, raw, report)) => {
                let ms = elapsed_ms(start);
                tracing::info!(
                    url = %url,
                    cert_status = %report.cert_status,
                    this_update = %report.this_update,
                    next_update = report.next_update.as_deref().unwrap_or("none"),
                    verify = %report.verification,
                    ms,
                    "OCSP response"
                );
                record
                    .ok()
                    .code(code)
                    .duration_ms(ms)
                    .hash(digest(&raw))
                    .note(report.note())
            }
            Err((code, e)) => {
                let ms = elapsed_ms(start);
                tracing::warn!(url = %url, error = %e, ms, "OCSP query failed");
                let record = record.duration_ms(ms).note(e.note());
                match code {
                    Some(code) => record.code(code),
                    None => record,
                }
            }
        }
    }

    fn load_inputs(&self) -> Result<(X509, X509), ProbeError> {
        let issuer = self.load_certificate("issuer", &self.issuer_cert)?;
        let subject = self.load_certificate("test", &self.test_cert)?;
        Ok((issuer, subject))
    }

    fn load_certificate(&self, role: &str, configured: &Path) -> Result<X509, ProbeError> {
        let path = self.locate(configured).ok_or_else(|| ProbeError::Precondition {
            reason: format!("{} certificate not found: {}", role, configured.display()),
        })?;
        let bytes = fs::read(&path).map_err(|e| ProbeError::Precondition {
            reason: format!("cannot read {} certificate {}: {}", role, path.display(), e),
        })?;
        X509::from_der(&bytes)
            .or_else(|_| X509::from_pem(&bytes))
            .map_err(|e| ProbeError::Precondition {
                reason: format!("invalid {} certificate {}: {}", role, path.display(), e),
            })
    }

    /// The configured file, or else the newest downloaded copy of it.
    fn locate(&self, configured: &Path) -> Option<PathBuf> {
        if configured.is_file() {
            return Some(configured.to_path_buf());
        }
        let name = configured.file_name()?.to_str()?;
        self.store.latest(DocumentKind::Crt, name).ok().flatten()
    }

    fn query(
        &self,
        url: &str,
        issuer: &X509,
        subject: &X509,
    ) -> Result<(u16, Vec<u8>, OcspReport), (Option<u16>, ProbeError)> {
        let body = build_request(issuer, subject).map_err(|e| (None, ProbeError::from(e)))?;
        let mut request = self
            .query_client
            .post(url)
            .header(CONTENT_TYPE, "application/ocsp-request")
            .header(ACCEPT, "application/ocsp-response")
            .body(body);
        if let Some(host) = host_header(url) {
            request = request.header(HOST, host);
        }

        let response = request.send().map_err(|e| (None, ProbeError::from(e)))?;
        let code = response.status().as_u16();
        if !response.status().is_success() {
            return Err((Some(code), ProbeError::UnexpectedStatus { code }));
        }
        let raw = response
            .bytes()
            .map_err(|e| (Some(code), ProbeError::from(e)))?
            .to_vec();
        let id = cert_id(issuer, subject).map_err(|e| (Some(code), ProbeError::from(e)))?;
        let report = parse_response(&raw, &id).map_err(|e| (Some(code), e))?;
        Ok((code, raw, report))
    }
}

/// `host[:port]` of the responder URL.
fn host_header(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

fn cert_id(issuer: &X509, subject: &X509) -> Result<OcspCertId, openssl::error::ErrorStack> {
    OcspCertId::from_cert(MessageDigest::sha1(), subject, issuer)
}

/// DER encoded single-certificate OCSP request, without nonce.
pub fn build_request(
    issuer: &X509,
    subject: &X509,
) -> Result<Vec<u8>, openssl::error::ErrorStack> {
    let mut request = OcspRequest::new()?;
    request.add_id(cert_id(issuer, subject)?)?;
    request.to_der()
}

/// Decodes a DER OCSP response and extracts the status of `id`.
pub fn parse_response(der: &[u8], id: &OcspCertIdRef) -> Result<OcspReport, ProbeError> {
    let response = OcspResponse::from_der(der).map_err(|e| ProbeError::Protocol {
        reason: format!("not an OCSP response: {}", e),
    })?;
    let status = response.status().as_raw();
    if status != 0 {
        return Err(ProbeError::Protocol {
            reason: format!("responder returned {}", response_status_name(status)),
        });
    }
    let basic = response.basic().map_err(|e| ProbeError::Protocol {
        reason: format!("missing basic response: {}", e),
    })?;
    let single = basic.find_status(id).ok_or_else(|| ProbeError::Protocol {
        reason: "response does not cover the requested certificate".to_string(),
    })?;

    let cert_status = match single.status.as_raw() {
        0 => CertStatus::Good,
        1 => CertStatus::Revoked,
        _ => CertStatus::Unknown,
    };
    let revocation_reason = match cert_status {
        CertStatus::Revoked => revocation_reason_name(single.reason.as_raw()).map(str::to_string),
        _ => None,
    };
    Ok(OcspReport {
        cert_status,
        revocation_time: single.revocation_time.map(|t| t.to_string()),
        revocation_reason,
        this_update: single.this_update.to_string(),
        next_update: single.next_update().map(|t| t.to_string()),
        verification: "skipped".to_string(),
    })
}

/// RFC 6960 OCSPResponseStatus names.
pub fn response_status_name(status: i32) -> &'static str {
    match status {
        0 => "successful",
        1 => "malformedRequest",
        2 => "internalError",
        3 => "tryLater",
        5 => "sigRequired",
        6 => "unauthorized",
        _ => "unknown status",
    }
}

/// RFC 5280 CRLReason names; `None` when the responder gave no reason.
pub fn revocation_reason_name(reason: i32) -> Option<&'static str> {
    Some(match reason {
        0 => "unspecified",
        1 => "keyCompromise",
        2 => "cACompromise",
        3 => "affiliationChanged",
        4 => "superseded",
        5 => "cessationOfOperation",
        6 => "certificateHold",
        8 => "removeFromCRL",
        9 => "privilegeWithdrawn",
        10 => "aACompromise",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::nid::Nid;
    use openssl::pkey::PKey;
    use openssl::x509::X509NameBuilder;

    fn certificate(cn: &str, serial: u32) -> X509 {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
        let name = name.build();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(serial).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(30).unwrap())
            .unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        builder.build()
    }

    // OCSPResponse { responseStatus tryLater } with no responseBytes
    const TRY_LATER: &[u8] = &[0x30, 0x03, 0x0a, 0x01, 0x03];
    const UNAUTHORIZED: &[u8] = &[0x30, 0x03, 0x0a, 0x01, 0x06];

    #[test]
    fn test_request_is_der_sequence() {
        let issuer = certificate("Test Issuer", 1);
        let subject = certificate("Test Subject", 0xAAA);
        let der = build_request(&issuer, &subject).unwrap();
        assert_eq!(der[0], 0x30);
        assert!(der.len() > 40);
    }

    #[test]
    fn test_unsuccessful_response_status() {
        let issuer = certificate("Test Issuer", 1);
        let subject = certificate("Test Subject", 2);
        let id = cert_id(&issuer, &subject).unwrap();

        let err = parse_response(TRY_LATER, &id).unwrap_err();
        assert_eq!(err.to_string(), "malformed response: responder returned tryLater");
        let err = parse_response(UNAUTHORIZED, &id).unwrap_err();
        assert!(err.to_string().contains("unauthorized"));
    }

    #[test]
    fn test_garbage_is_a_parse_failure() {
        let issuer = certificate("Test Issuer", 1);
        let subject = certificate("Test Subject", 2);
        let id = cert_id(&issuer, &subject).unwrap();

        let err = parse_response(b"<html>502 Bad Gateway</html>", &id).unwrap_err();
        assert!(matches!(err, ProbeError::Protocol { .. }));
    }

    const CA_PEM: &[u8] = include_bytes!("../../tests/fixtures/ocsp/ca.crt");
    const GOOD_PEM: &[u8] = include_bytes!("../../tests/fixtures/ocsp/good.crt");
    const REVOKED_PEM: &[u8] = include_bytes!("../../tests/fixtures/ocsp/revoked.crt");
    const GOOD_RESPONSE: &[u8] = include_bytes!("../../tests/fixtures/ocsp/good.ocsp");
    const REVOKED_RESPONSE: &[u8] = include_bytes!("../../tests/fixtures/ocsp/revoked.ocsp");

    fn fixture_id(subject: &[u8]) -> OcspCertId {
        let issuer = X509::from_pem(CA_PEM).unwrap();
        let subject = X509::from_pem(subject).unwrap();
        cert_id(&issuer, &subject).unwrap()
    }

    #[test]
    fn test_good_response() {
        let report = parse_response(GOOD_RESPONSE, &fixture_id(GOOD_PEM)).unwrap();
        assert_eq!(report.cert_status, CertStatus::Good);
        assert_eq!(report.this_update, "Oct 14 19:36:28 2026 GMT");
        assert_eq!(report.next_update.as_deref(), Some("Sep 20 19:36:28 2126 GMT"));
        assert_eq!(report.revocation_time, None);
        assert_eq!(report.revocation_reason, None);
        assert_eq!(report.verification, "skipped");
        assert_eq!(report.note(), "good");
    }

    #[test]
    fn test_revoked_response() {
        let report = parse_response(REVOKED_RESPONSE, &fixture_id(REVOKED_PEM)).unwrap();
        assert_eq!(report.cert_status, CertStatus::Revoked);
        assert_eq!(report.revocation_time.as_deref(), Some("Oct  1 10:00:00 2025 GMT"));
        assert_eq!(report.revocation_reason.as_deref(), Some("keyCompromise"));
        assert_eq!(
            report.note(),
            "revoked Revocation Time: Oct  1 10:00:00 2025 GMT Reason: keyCompromise"
        );
    }

    #[test]
    fn test_response_for_another_certificate() {
        let err = parse_response(GOOD_RESPONSE, &fixture_id(REVOKED_PEM)).unwrap_err();
        assert!(matches!(err, ProbeError::Protocol { .. }));
        assert!(err.to_string().contains("does not cover"));
    }

    #[test]
    fn test_report_note() {
        let mut report = OcspReport {
            cert_status: CertStatus::Good,
            revocation_time: None,
            revocation_reason: None,
            this_update: "Oct  3 08:00:00 2025 GMT".to_string(),
            next_update: None,
            verification: "skipped".to_string(),
        };
        assert_eq!(report.note(), "good");

        report.cert_status = CertStatus::Revoked;
        report.revocation_time = Some("Oct  1 10:00:00 2025 GMT".to_string());
        report.revocation_reason = Some("keyCompromise".to_string());
        assert_eq!(
            report.note(),
            "revoked Revocation Time: Oct  1 10:00:00 2025 GMT Reason: keyCompromise"
        );
    }

    #[test]
    fn test_status_names() {
        assert_eq!(response_status_name(3), "tryLater");
        assert_eq!(revocation_reason_name(1), Some("keyCompromise"));
        assert_eq!(revocation_reason_name(-1), None);
    }

    #[test]
    fn test_host_header_keeps_port() {
        assert_eq!(
            host_header("https://ocsp.eidpki.ee").as_deref(),
            Some("ocsp.eidpki.ee")
        );
        assert_eq!(
            host_header("http://127.0.0.1:8080/ocsp").as_deref(),
            Some("127.0.0.1:8080")
        );
    }
}
