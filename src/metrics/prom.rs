use lazy_static::lazy_static;
use prometheus::{labels, register_gauge_vec, GaugeVec};

use crate::monitor::Family;
use crate::report::Summary;
use strum::IntoEnumIterator;

lazy_static! {
    static ref PKI_MONITOR_CHECKS_OK: GaugeVec = register_gauge_vec!(
        "pki_monitor_checks_ok",
        "successful checks in the last run",
        &["family", "check_type"]
    )
    .unwrap();
    static ref PKI_MONITOR_CHECKS_TOTAL: GaugeVec = register_gauge_vec!(
        "pki_monitor_checks_total",
        "checks executed in the last run",
        &["family", "check_type"]
    )
    .unwrap();
}

/// Sets one gauge pair per check type from `summary`.
pub fn record_summary(summary: &Summary) {
    for family in Family::iter() {
        for check_type in family.check_types() {
            let tally = summary.get(*check_type);
            let labels: [&str; 2] = [family.as_ref(), check_type.as_ref()];
            PKI_MONITOR_CHECKS_OK
                .with_label_values(&labels)
                .set(tally.ok as f64);
            PKI_MONITOR_CHECKS_TOTAL
                .with_label_values(&labels)
                .set(tally.total as f64);
        }
    }
}

/// Function to push metrics to prometheus
/// # Arguments
/// * `summary` - Summary of the run that just finished
/// * `prometheus_address` - Push gateway base address
pub fn prometheus_metrics(summary: &Summary, prometheus_address: &str) -> prometheus::Result<()> {
    record_summary(summary);
    let metric_families = prometheus::gather();
    prometheus::push_metrics(
        "pki_monitor",
        labels! {
            "instance".to_owned() => "pki-monitor".to_owned(),
        },
        &format!("{}/metrics/job", prometheus_address),
        metric_families,
        None,
    )
}
