//! Prometheus metrics for the bridge operator.
//!
//! Exposed on the /metrics endpoint for scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Gauge, GaugeVec,
};

lazy_static! {
    // Swap lifecycle
    pub static ref SWAPS_CREATED: CounterVec = register_counter_vec!(
        "bridge_swaps_created_total",
        "Swap records created, by source network",
        &["network"]
    ).unwrap();

    pub static ref SIGNATURES_WRITTEN: CounterVec = register_counter_vec!(
        "bridge_signatures_written_total",
        "Signatures persisted by this operator, by destination network",
        &["network"]
    ).unwrap();

    pub static ref SWAPS_SIGNED: CounterVec = register_counter_vec!(
        "bridge_swaps_signed_total",
        "Swaps promoted to signed at threshold, by destination network",
        &["network"]
    ).unwrap();

    pub static ref BROADCASTS: CounterVec = register_counter_vec!(
        "bridge_broadcasts_total",
        "Multisig broadcasts, by destination network and result",
        &["network", "status"]
    ).unwrap();

    pub static ref SWAPS_CONFIRMED: CounterVec = register_counter_vec!(
        "bridge_swaps_confirmed_total",
        "Swaps confirmed final, by destination network",
        &["network"]
    ).unwrap();

    pub static ref SWAPS_FAILED: CounterVec = register_counter_vec!(
        "bridge_swaps_failed_total",
        "Swaps failed terminally, by destination network and stage",
        &["network", "stage"]
    ).unwrap();

    pub static ref SWAPS_RETRIED: CounterVec = register_counter_vec!(
        "bridge_swaps_retried_total",
        "Swaps demoted to retry, by destination network",
        &["network"]
    ).unwrap();

    // Queue depth, refreshed by the status endpoint
    pub static ref SWAPS_BY_STATUS: GaugeVec = register_gauge_vec!(
        "bridge_swaps_by_status",
        "Current swap count per status",
        &["status"]
    ).unwrap();

    // Chain tracking
    pub static ref CHAIN_HEAD: GaugeVec = register_gauge_vec!(
        "bridge_chain_head",
        "Latest observed chain head, by chain",
        &["chain"]
    ).unwrap();

    pub static ref CURSOR_HEIGHT: GaugeVec = register_gauge_vec!(
        "bridge_cursor_height",
        "Last fully processed block per event cursor",
        &["tracker"]
    ).unwrap();

    // Errors
    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "bridge_errors_total",
        "Errors encountered, by chain and type",
        &["chain", "type"]
    ).unwrap();

    // Health
    pub static ref UP: Gauge = register_gauge!(
        "bridge_up",
        "Whether the operator process is running"
    ).unwrap();
}
