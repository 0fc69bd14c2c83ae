//! Run orchestration.
//!
//! A [`Monitor`] is built once from a validated [`Config`]. Building it is the
//! only fallible setup step: directories, the ledger file and the HTTP clients
//! are all prepared before the first probe runs. [`Monitor::run`] then walks
//! the selected families in a fixed order, appending every record to the
//! ledger as soon as it is produced.

use std::path::Path;

use serde::Serialize;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use crate::config::Config;
use crate::error::MonitorError;
use crate::ledger::Ledger;
use crate::probe::fetch::FetchProbe;
use crate::probe::ldap::LdapProbe;
use crate::probe::ocsp::OcspProbe;
use crate::record::{CheckRecord, CheckType};
use crate::report::Summary;
use crate::store::{ArtifactStore, DocumentKind};

/// Probe families, declared in execution order.
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
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Family {
    Pdf,
    Crt,
    Crl,
    Ocsp,
    Ldap,
}

impl Family {
    pub fn document_kind(self) -> Option<DocumentKind> {
        match self {
            Family::Pdf => Some(DocumentKind::Pdf),
            Family::Crt => Some(DocumentKind::Crt),
            Family::Crl => Some(DocumentKind::Crl),
            Family::Ocsp | Family::Ldap => None,
        }
    }

    /// Ledger row types produced by this family.
    pub fn check_types(self) -> &'static [CheckType] {
        match self {
            Family::Pdf => &[CheckType::PdfCheck, CheckType::PdfDownload],
            Family::Crt => &[CheckType::CrtCheck, CheckType::CrtDownload],
            Family::Crl => &[CheckType::CrlCheck, CheckType::CrlDownload],
            Family::Ocsp => &[CheckType::OcspHttpCheck, CheckType::OcspStatus],
            Family::Ldap => &[CheckType::LdapPort, CheckType::LdapSearch],
        }
    }
}

/// Records produced by one run and the summary computed from the ledger.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub records: Vec<CheckRecord>,
    pub summary: Summary,
}

pub struct Monitor {
    config: Config,
    ledger: Ledger,
    fetch: FetchProbe,
    ocsp: OcspProbe,
    ldap: LdapProbe,
}

impl Monitor {
    /// Validates the configuration and prepares everything a run needs.
    pub fn new(config: Config) -> Result<Self, MonitorError> {
        config.validate()?;
        let store = ArtifactStore::open(&config.artifacts_dir)
            .map_err(|source| setup(&config.artifacts_dir, source))?;
        let ledger =
            Ledger::open(&config.ledger_path).map_err(|source| setup(&config.ledger_path, source))?;

        let fetch = FetchProbe::new(store.clone(), &config.timeouts).map_err(MonitorError::Client)?;
        let ocsp = OcspProbe::new(&config, store).map_err(MonitorError::Client)?;
        let ldap = LdapProbe::new(config.ldap.clone(), config.timeouts.ldap())
            .map_err(MonitorError::Client)?;

        Ok(Monitor {
            config,
            ledger,
            fetch,
            ocsp,
            ldap,
        })
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Runs the selected families, or all of them when `families` is empty.
    ///
    /// Probe failures are recorded, never returned. Only a ledger that can no
    /// longer be written or read stops the run.
    pub fn run(&self, families: &[Family]) -> Result<RunReport, MonitorError> {
        let ledger_path = self.ledger.path();
        let offset = self
            .ledger
            .row_count()
            .map_err(|source| setup(ledger_path, source))?;
        tracing::info!(ledger = %ledger_path.display(), "starting PKI checks");

        let mut records = Vec::new();
        for family in Family::iter().filter(|f| families.is_empty() || families.contains(f)) {
            tracing::info!(family = %family, "running checks");
            for record in self.run_family(family) {
                self.ledger
                    .append(&record)
                    .map_err(|source| setup(ledger_path, source))?;
                records.push(record);
            }
        }

        let appended = self
            .ledger
            .read_from(offset)
            .map_err(|source| setup(ledger_path, source))?;
        let summary = Summary::from_records(&appended);
        tracing::info!(rows = records.len(), ok = summary.ok(), "checks completed");
        Ok(RunReport { records, summary })
    }

    fn run_family(&self, family: Family) -> Vec<CheckRecord> {
        let targets = &self.config.targets;
        match family.document_kind() {
            Some(kind) => {
                let urls = match kind {
                    DocumentKind::Pdf => &targets.pdf,
                    DocumentKind::Crt => &targets.crt,
                    DocumentKind::Crl => &targets.crl,
                };
                urls.iter()
                    .flat_map(|url| self.fetch.run(kind, url).into_records())
                    .collect()
            }
            None if family == Family::Ocsp => targets
                .ocsp
                .iter()
                .flat_map(|url| self.ocsp.run(url))
                .collect(),
            None => self.ldap.run(),
        }
    }
}

fn setup(path: &Path, source: std::io::Error) -> MonitorError {
    MonitorError::Setup {
        path: path.to_path_buf(),
        source,
    }
}
