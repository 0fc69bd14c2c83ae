//! Error types for probes and for the monitor run.
//!
//! [`ProbeError`] describes why a single network check did not succeed. It never
//! leaves a probe: it is rendered into the `note` column of a failed ledger row.
//! [`MonitorError`] is reserved for setup problems that stop a run before any
//! probe executes.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

/// Reason a probe failed.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// DNS resolution failed for the given hostname
    #[error("failed to resolve hostname: {hostname}")]
    DnsResolution {
        /// The hostname that failed to resolve
        hostname: String,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// TCP connection failed to the target address
    #[error("connection failed to {address}: {source}")]
    ConnectionFailed {
        /// The address (host:port) that connection failed to
        address: String,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Network operation timeout
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Description of which operation timed out
        operation: String,
    },

    /// HTTP transport error that is not a timeout
    #[error("http error: {details}")]
    Http { details: String },

    /// The server answered with a status outside the accepted range
    #[error("unexpected HTTP status {code}")]
    UnexpectedStatus { code: u16 },

    /// TLS handshake failed
    #[error("TLS handshake failed: {details}")]
    HandshakeFailed { details: String },

    /// Response bytes could not be decoded
    #[error("malformed response: {reason}")]
    Protocol { reason: String },

    /// A required local input is missing, the check was not attempted
    #[error("skipped: {reason}")]
    Precondition { reason: String },

    /// OpenSSL error occurred
    #[error("OpenSSL error: {details}")]
    OpenSSLError { details: String },

    /// Generic I/O error
    #[error("I/O error: {source}")]
    IoError {
        #[from]
        source: io::Error,
    },
}

impl ProbeError {
    /// Text suitable for the ledger `note` column.
    pub fn note(&self) -> String {
        self.to_string()
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Timeout {
                operation: e
                    .url()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| "http request".to_string()),
            };
        }
        if let Some(status) = e.status() {
            return Self::UnexpectedStatus {
                code: status.as_u16(),
            };
        }
        // reqwest renders only the outermost layer; the cause carries the useful part
        let mut details = e.to_string();
        let mut source = std::error::Error::source(&e);
        while let Some(inner) = source {
            details = format!("{}: {}", details, inner);
            source = inner.source();
        }
        Self::Http { details }
    }
}

impl From<openssl::error::ErrorStack> for ProbeError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Self::OpenSSLError {
            details: e.to_string(),
        }
    }
}

impl<S: std::fmt::Debug> From<openssl::ssl::HandshakeError<S>> for ProbeError {
    fn from(e: openssl::ssl::HandshakeError<S>) -> Self {
        Self::HandshakeFailed {
            details: format!("{}", e),
        }
    }
}

/// Fatal error that aborts a run before any probe is executed.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Artifact directories or the ledger could not be prepared
    #[error("setup failed for {}: {source}", path.display())]
    Setup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A probe could not be constructed
    #[error("probe setup failed: {0}")]
    Client(ProbeError),

    /// Summary requested but no ledger has been written yet
    #[error("no ledger found at {}, run checks first", .0.display())]
    MissingLedger(PathBuf),
}
