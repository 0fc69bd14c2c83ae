//! Integration tests for the public API

use std::str::FromStr;

use pki_monitor::ledger::HEADER;
use pki_monitor::{
    CheckRecord, CheckType, Config, ConfigError, Family, Ledger, MonitorError, ProbeError, Status,
    Summary,
};

#[test]
fn test_monitor_rejects_invalid_config_before_setup() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.artifacts_dir = dir.path().join("artifacts");
    config.ledger_path = dir.path().join("results.csv");
    config.targets.crt = vec!["ftp://crt.example/ca.crt".to_string()];

    match pki_monitor::Monitor::new(config) {
        Err(MonitorError::Config(ConfigError::Validation(msg))) => {
            assert!(msg.contains("ftp://crt.example/ca.crt"), "message was {}", msg)
        }
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("invalid config accepted"),
    }
    assert!(!dir.path().join("artifacts").exists());
    assert!(!dir.path().join("results.csv").exists());
}

#[test]
fn test_monitor_run_with_no_targets_appends_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.artifacts_dir = dir.path().join("artifacts");
    config.ledger_path = dir.path().join("results.csv");
    config.targets.pdf.clear();

    let monitor = pki_monitor::Monitor::new(config).unwrap();
    let report = monitor.run(&[Family::Pdf]).unwrap();
    assert!(report.records.is_empty());
    assert_eq!(report.summary.total(), 0);
    assert_eq!(monitor.ledger().row_count().unwrap(), 0);
    assert!(dir.path().join("artifacts").join("crt").is_dir());
}

#[test]
fn test_error_types_are_public() {
    fn handle_error(err: ProbeError) -> String {
        match err {
            ProbeError::DnsResolution { hostname, .. } => format!("DNS failed for {}", hostname),
            ProbeError::ConnectionFailed { address, .. } => {
                format!("Connection failed to {}", address)
            }
            ProbeError::Timeout { operation } => format!("Timeout: {}", operation),
            ProbeError::Http { details } => format!("HTTP: {}", details),
            ProbeError::UnexpectedStatus { code } => format!("Status {}", code),
            ProbeError::HandshakeFailed { details } => format!("Handshake failed: {}", details),
            ProbeError::Protocol { reason } => format!("Protocol: {}", reason),
            ProbeError::Precondition { reason } => format!("Skipped: {}", reason),
            ProbeError::OpenSSLError { details } => format!("OpenSSL error: {}", details),
            ProbeError::IoError { source } => format!("I/O error: {}", source),
        }
    }

    let err = ProbeError::Timeout {
        operation: "connect to ldap.example:389".to_string(),
    };
    assert_eq!(handle_error(err), "Timeout: connect to ldap.example:389");
}

#[test]
fn test_monitor_errors_display() {
    let err = MonitorError::MissingLedger("results.csv".into());
    assert_eq!(err.to_string(), "no ledger found at results.csv, run checks first");

    let err: MonitorError = ConfigError::Validation("ldap.host cannot be empty".to_string()).into();
    assert_eq!(err.to_string(), "Validation Error: ldap.host cannot be empty");
}

#[test]
fn test_check_type_names_match_ledger_values() {
    assert_eq!(CheckType::OcspHttpCheck.to_string(), "ocsp_http_check");
    assert_eq!(CheckType::from_str("ldap_port").unwrap(), CheckType::LdapPort);
    assert_eq!(Status::Fail.to_string(), "fail");
    assert_eq!(Family::from_str("crl").unwrap(), Family::Crl);
}

#[test]
fn test_ledger_round_trip_through_public_api() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("results.csv");
    let ledger = Ledger::open(&path).unwrap();

    ledger
        .append(
            &CheckRecord::new(CheckType::LdapSearch, "ldap://ldap.example")
                .ok()
                .code(389)
                .duration_ms(12)
                .note("found"),
        )
        .unwrap();
    ledger
        .append(&CheckRecord::new(CheckType::LdapPort, "ldap.example:636").code(636))
        .unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().next(), Some(HEADER));
    assert_eq!(content.lines().count(), 3);

    let summary = Summary::from_records(&ledger.read_all().unwrap());
    assert_eq!(summary.family(Family::Ldap).ok, 1);
    assert_eq!(summary.family(Family::Ldap).total, 2);
}
