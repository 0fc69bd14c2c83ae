//! Configuration file management for pki-monitor.
//!
//! Settings come from three places, later ones winning:
//!
//! 1. Default values (the eID PKI endpoints, see [`Config::default`])
//! 2. Configuration file (`pki-monitor.toml` or specified with `--config`)
//! 3. Command-line arguments
//!
//! The resulting [`Config`] is built once at startup and shared read-only by
//! every probe.
//!
//! # Example Configuration File
//!
//! ```toml
//! artifacts_dir = "./artifacts"
//! ledger_path = "./results.csv"
//!
//! [targets]
//! crt = ["https://crt.eidpki.ee/ESTEID2025.crt"]
//!
//! [ldap]
//! host = "ldap.eidpki.ee"
//! base_dn = "dc=ldap,dc=eidpki,dc=ee"
//!
//! [prometheus]
//! enabled = true
//! address = "http://localhost:9091"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::probe::ldap::proto::Filter;

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "pki-monitor.toml";

/// Main configuration structure.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Root directory of the artifact store
    pub artifacts_dir: PathBuf,
    /// CSV ledger file
    pub ledger_path: PathBuf,
    pub targets: Targets,
    pub timeouts: Timeouts,
    pub ocsp: OcspConfig,
    pub ldap: LdapConfig,
    pub prometheus: PrometheusConfig,
}

/// Endpoints per check family.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Targets {
    pub pdf: Vec<String>,
    pub crt: Vec<String>,
    pub crl: Vec<String>,
    pub ocsp: Vec<String>,
}

/// Per-request bounds, in seconds.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Timeouts {
    /// Connect bound for document existence checks
    pub connect_secs: u64,
    /// Total bound for document existence checks
    pub check_secs: u64,
    /// Total bound for full downloads
    pub download_secs: u64,
    /// Connect bound for the OCSP reachability check
    pub ocsp_connect_secs: u64,
    /// Total bound for the OCSP status query
    pub ocsp_secs: u64,
    /// Bound for LDAP port connects and each LDAP read/write
    pub ldap_secs: u64,
}

/// Certificates the OCSP status query is built from, relative to the
/// artifacts directory unless absolute.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct OcspConfig {
    pub issuer_cert: PathBuf,
    pub test_cert: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LdapConfig {
    pub host: String,
    /// Ports probed with a raw TCP connect
    pub ports: Vec<u16>,
    pub ldap_port: u16,
    pub ldaps_port: u16,
    /// Transports searched, any of `ldap` and `ldaps`
    pub transports: Vec<String>,
    pub base_dn: String,
    pub filter: String,
    pub attributes: Vec<String>,
}

/// Prometheus integration configuration.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct PrometheusConfig {
    /// Enable prometheus metrics pushing
    pub enabled: bool,
    /// Prometheus push gateway address (e.g., "http://localhost:9091")
    pub address: String,
}

/// Values given on the command line; only `Some` fields override.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub artifacts_dir: Option<PathBuf>,
    pub ledger_path: Option<PathBuf>,
    pub prometheus: Option<bool>,
    pub prometheus_address: Option<String>,
}

impl Default for Config {
    /// Defaults target the Estonian eID PKI published by ZETES.
    fn default() -> Self {
        Config {
            artifacts_dir: PathBuf::from("./artifacts"),
            ledger_path: PathBuf::from("./results.csv"),
            targets: Targets::default(),
            timeouts: Timeouts::default(),
            ocsp: OcspConfig::default(),
            ldap: LdapConfig::default(),
            prometheus: PrometheusConfig::default(),
        }
    }
}

impl Default for Targets {
    fn default() -> Self {
        let repo = |doc: &str| format!("https://repository.eidpki.ee/static/{}", doc);
        Targets {
            pdf: vec![
                repo("Root%20CP_V%201.1%20-%20signed%2030.05.2025.pdf"),
                repo("2025%2010%2003%20-%20ZE%20CPS-ID1-ROOT-CA%20v1.3%20-%20Approved.pdf"),
                repo("2025%2010%2001%20-%20ZE%20CPS-ID1-EID-CA%20v1.3%20-%20Approved.pdf"),
                repo("2025%2010%2003%20-%20ZE%20TSPS-ID1%20v1.3%20-%20Approved.pdf"),
                repo("2025%2010%2003%20-%20ZE%20TC-ID1%20v1.3%20-%20Approved.pdf"),
                repo("2025%2010%2003%20-%20ZE%20TC-ID1-SUB%20v1.3%20-%20Approved.pdf"),
                repo("2025-10-03-ze-tc-id1-sub-v1.3_PBGB_Estonian%20Approved.pdf"),
                repo("Technical%20profile%20of%20certificates%20OCSP%20responses%20and%20CRLs_20251001_withoutUAT.pdf"),
            ],
            crt: vec![
                "https://crt.eidpki.ee/EEGovCA2025.crt".to_string(),
                "https://crt.eidpki.ee/ESTEID2025.crt".to_string(),
            ],
            crl: vec![
                "https://crl.eidpki.ee/EEGovCA2025.crl".to_string(),
                "https://crl.eidpki.ee/ESTEID2025.crl".to_string(),
            ],
            ocsp: vec!["https://ocsp.eidpki.ee".to_string()],
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            connect_secs: 10,
            check_secs: 60,
            download_secs: 60,
            ocsp_connect_secs: 5,
            ocsp_secs: 10,
            ldap_secs: 10,
        }
    }
}

impl Timeouts {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn check(&self) -> Duration {
        Duration::from_secs(self.check_secs)
    }

    pub fn download(&self) -> Duration {
        Duration::from_secs(self.download_secs)
    }

    pub fn ocsp_connect(&self) -> Duration {
        Duration::from_secs(self.ocsp_connect_secs)
    }

    pub fn ocsp(&self) -> Duration {
        Duration::from_secs(self.ocsp_secs)
    }

    pub fn ldap(&self) -> Duration {
        Duration::from_secs(self.ldap_secs)
    }
}

impl Default for OcspConfig {
    fn default() -> Self {
        OcspConfig {
            issuer_cert: PathBuf::from("crt/ESTEID2025.crt"),
            test_cert: PathBuf::from("crt/test.crt"),
        }
    }
}

impl Default for LdapConfig {
    fn default() -> Self {
        LdapConfig {
            host: "ldap.eidpki.ee".to_string(),
            ports: vec![389, 636],
            ldap_port: 389,
            ldaps_port: 636,
            transports: vec!["ldap".to_string(), "ldaps".to_string()],
            base_dn: "dc=ldap,dc=eidpki,dc=ee".to_string(),
            filter: "(objectClass=*)".to_string(),
            attributes: vec!["cn".to_string()],
        }
    }
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        PrometheusConfig {
            enabled: false,
            address: "http://localhost:9091".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file. Missing keys keep their defaults.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use pki_monitor::config::Config;
    /// let config = Config::from_file("pki-monitor.toml")?;
    /// # Ok::<(), pki_monitor::config::ConfigError>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Ok(config)
    }

    /// Reads `path` if given, otherwise [`DEFAULT_CONFIG_FILE`] when present,
    /// otherwise the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Config::from_file(path),
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Config::from_file(DEFAULT_CONFIG_FILE)
            }
            None => Ok(Config::default()),
        }
    }

    /// Applies command-line values on top of this configuration.
    pub fn merge_cli(mut self, cli: CliOverrides) -> Self {
        if let Some(dir) = cli.artifacts_dir {
            self.artifacts_dir = dir;
        }
        if let Some(path) = cli.ledger_path {
            self.ledger_path = path;
        }
        if let Some(enabled) = cli.prometheus {
            self.prometheus.enabled = enabled;
        }
        if let Some(address) = cli.prometheus_address {
            self.prometheus.address = address;
        }
        self
    }

    /// Rejects settings no probe could work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let all_urls = self
            .targets
            .pdf
            .iter()
            .chain(&self.targets.crt)
            .chain(&self.targets.crl)
            .chain(&self.targets.ocsp);
        for target in all_urls {
            let parsed = url::Url::parse(target)
                .map_err(|e| ConfigError::Validation(format!("invalid URL '{}': {}", target, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::Validation(format!(
                    "unsupported scheme in '{}', expected http or https",
                    target
                )));
            }
        }
        if self.ldap.host.trim().is_empty() {
            return Err(ConfigError::Validation("ldap.host cannot be empty".to_string()));
        }
        if let Some(bad) = self
            .ldap
            .transports
            .iter()
            .find(|t| !matches!(t.as_str(), "ldap" | "ldaps"))
        {
            return Err(ConfigError::Validation(format!(
                "unknown ldap transport '{}', expected ldap or ldaps",
                bad
            )));
        }
        Filter::parse(&self.ldap.filter).map_err(ConfigError::Validation)?;
        Ok(())
    }

    /// Resolves a configured OCSP input path against the artifacts directory.
    pub fn artifact_path(&self, relative: &Path) -> PathBuf {
        if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            self.artifacts_dir.join(relative)
        }
    }

    /// Example configuration file in TOML format, all options spelled out.
    pub fn example_toml() -> String {
        toml::to_string_pretty(&Config::default())
            .unwrap_or_else(|_| "# Error generating example".to_string())
    }
}

/// Errors that can occur during configuration loading and parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error (file not found, permission denied, etc.)
    #[error("IO Error: {0}")]
    Io(String),
    /// TOML parsing error (invalid syntax, type mismatch, etc.)
    #[error("Parse Error: {0}")]
    Parse(String),
    /// Validation error (invalid URL, unsupported filter, etc.)
    #[error("Validation Error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_from_toml() {
        let toml_content = r#"
            artifacts_dir = "/var/lib/pki"

            [targets]
            crt = ["https://crt.example/ca.crt"]

            [timeouts]
            ldap_secs = 3

            [ldap]
            host = "dir.example"
            base_dn = "dc=example"

            [prometheus]
            enabled = true
            address = "http://localhost:9092"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(config.artifacts_dir, PathBuf::from("/var/lib/pki"));
        assert_eq!(config.targets.crt, vec!["https://crt.example/ca.crt"]);
        // untouched sections and keys keep their defaults
        assert_eq!(config.targets.crl, Targets::default().crl);
        assert_eq!(config.timeouts.ldap(), Duration::from_secs(3));
        assert_eq!(config.timeouts.download_secs, 60);
        assert_eq!(config.ldap.host, "dir.example");
        assert_eq!(config.ldap.ports, vec![389, 636]);
        assert!(config.prometheus.enabled);
        assert_eq!(config.prometheus.address, "http://localhost:9092");
    }

    #[test]
    fn test_cli_overrides_file_values() {
        let config = Config::default().merge_cli(CliOverrides {
            artifacts_dir: Some(PathBuf::from("./data")),
            ledger_path: None,
            prometheus: Some(true),
            prometheus_address: None,
        });

        assert_eq!(config.artifacts_dir, PathBuf::from("./data"));
        assert_eq!(config.ledger_path, PathBuf::from("./results.csv"));
        assert!(config.prometheus.enabled);
        assert_eq!(config.prometheus.address, "http://localhost:9091");
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.targets.pdf.len(), 8);
        assert_eq!(config.targets.ocsp, vec!["https://ocsp.eidpki.ee"]);
        assert_eq!(config.ldap.filter, "(objectClass=*)");
        assert_eq!(config.timeouts.check(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"artifacts_dir = [invalid toml").unwrap();

        match Config::from_file(temp_file.path()).unwrap_err() {
            ConfigError::Parse(_) => {} // Expected
            other => panic!("Expected ParseError, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_rejects_bad_targets() {
        let mut config = Config::default();
        config.targets.crl = vec!["ftp://crl.example/a.crl".to_string()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));

        let mut config = Config::default();
        config.ldap.filter = "(&(a=b)(c=d))".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.ldap.transports = vec!["ldapi".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_artifact_path_resolution() {
        let config = Config::default();
        assert_eq!(
            config.artifact_path(Path::new("crt/test.crt")),
            PathBuf::from("./artifacts/crt/test.crt")
        );
        assert_eq!(
            config.artifact_path(Path::new("/etc/pki/test.crt")),
            PathBuf::from("/etc/pki/test.crt")
        );
    }

    #[test]
    fn test_example_toml_generation() {
        let parsed: Config = toml::from_str(&Config::example_toml()).unwrap();
        assert_eq!(parsed, Config::default());
    }
}
