//! Endpoint probes.
//!
//! Each probe performs one bounded network operation per ledger row and turns
//! whatever happened into a [`CheckRecord`]. Failures are data: nothing in
//! this module returns an error to the caller.
//!
//! - `fetch` - document, certificate and CRL existence checks and downloads
//! - `ocsp` - OCSP responder reachability and certificate status
//! - `ldap` - directory port reachability and one-level search

pub mod fetch;
pub mod ldap;
pub mod ocsp;

use std::time::{Duration, Instant};

use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, CONNECTION, CONTENT_TYPE, RANGE};
use reqwest::StatusCode;

use crate::error::ProbeError;
use crate::record::{CheckRecord, CheckType};

/// Identifies the monitor to the servers it probes.
pub const USER_AGENT: &str = concat!("pki-monitor/", env!("CARGO_PKG_VERSION"));

/// Builds a blocking client with the given bounds.
pub(crate) fn http_client(connect: Duration, total: Duration) -> Result<Client, ProbeError> {
    Ok(Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(connect)
        .timeout(total)
        .build()?)
}

/// Milliseconds elapsed since `start`.
pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
}

/// What an existence check observed.
#[derive(Debug)]
pub(crate) struct Reachability {
    pub code: u16,
    pub content_type: Option<String>,
}

impl Reachability {
    /// 200 and 206 both prove the resource is being served.
    pub fn is_available(&self) -> bool {
        self.code == StatusCode::OK.as_u16() || self.code == StatusCode::PARTIAL_CONTENT.as_u16()
    }
}

/// HEAD the URL; if the server does not answer, or refuses HEAD with 403/405,
/// ask for the first byte with a ranged GET instead.
pub(crate) fn probe_reachability(client: &Client, url: &str) -> Result<Reachability, ProbeError> {
    match client
        .head(url)
        .header(ACCEPT, "*/*")
        .header(CONNECTION, "close")
        .send()
    {
        Ok(response) if !head_rejected(response.status()) => return Ok(reachability(&response)),
        Ok(response) => tracing::debug!(
            url = %url,
            code = response.status().as_u16(),
            "HEAD rejected, trying ranged GET"
        ),
        Err(e) => tracing::debug!(url = %url, error = %e, "HEAD failed, trying ranged GET"),
    }

    let response = client
        .get(url)
        .header(ACCEPT, "*/*")
        .header(CONNECTION, "close")
        .header(RANGE, "bytes=0-0")
        .send()?;
    Ok(reachability(&response))
}

fn head_rejected(status: StatusCode) -> bool {
    status == StatusCode::FORBIDDEN || status == StatusCode::METHOD_NOT_ALLOWED
}

fn reachability(response: &Response) -> Reachability {
    Reachability {
        code: response.status().as_u16(),
        content_type: response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    }
}

/// Runs an existence check and records it as a `check_type` row.
pub(crate) fn existence_record(client: &Client, check_type: CheckType, url: &str) -> CheckRecord {
    let record = CheckRecord::new(check_type, url);
    let start = Instant::now();
    match probe_reachability(client, url) {
        Ok(seen) => {
            let ms = elapsed_ms(start);
            let available = seen.is_available();
            if available {
                tracing::info!(check = %check_type, url = %url, code = seen.code, ms, "reachable");
            } else {
                tracing::warn!(
                    check = %check_type,
                    url = %url,
                    code = seen.code,
                    ms,
                    "unexpected status"
                );
            }
            let record = record.code(seen.code).duration_ms(ms).note(format!(
                "Content-Type: {}",
                seen.content_type.as_deref().unwrap_or("unknown")
            ));
            if available {
                record.ok()
            } else {
                record
            }
        }
        Err(e) => {
            let ms = elapsed_ms(start);
            tracing::warn!(check = %check_type, url = %url, error = %e, ms, "not reachable");
            record.duration_ms(ms).note(e.note())
        }
    }
}
