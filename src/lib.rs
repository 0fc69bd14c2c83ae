//! Health and integrity checks for a public PKI's published artifacts.
//!
//! A run downloads policy documents, certificates and revocation lists,
//! queries the OCSP responder and searches the LDAP directory. Every outcome is
//! appended to a CSV [`Ledger`]; downloads are kept in an [`ArtifactStore`]
//! with their SHA-256 digest.
//!
//! ```no_run
//! use pki_monitor::{Config, Monitor};
//!
//! let monitor = Monitor::new(Config::default())?;
//! let report = monitor.run(&[])?;
//! println!("{}/{} checks OK", report.summary.ok(), report.summary.total());
//! # Ok::<(), pki_monitor::MonitorError>(())
//! ```

pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod monitor;
pub mod probe;
pub mod record;
pub mod report;
pub mod store;

pub use config::{Config, ConfigError};
pub use error::{MonitorError, ProbeError};
pub use ledger::Ledger;
pub use monitor::{Family, Monitor, RunReport};
pub use record::{CheckRecord, CheckType, Status};
pub use report::{OutputFormat, Summary, Tally};
pub use store::{Artifact, ArtifactStore, DocumentKind};
