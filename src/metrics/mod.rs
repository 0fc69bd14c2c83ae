//! Metrics export.
//!
//! Run summaries can be pushed to a Prometheus Push Gateway so the ledger's
//! latest results show up next to other monitoring data.
//!
//! # Submodules
//!
//! - `prom` - Prometheus metrics integration

pub mod prom;
