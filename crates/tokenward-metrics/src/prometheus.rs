//! Prometheus text exposition format.
//!
//! Renders a single health snapshot for scraping by a Prometheus server or
//! compatible agent.

use std::fmt::Write;

use crate::aggregator::HealthSnapshot;

/// Content type for the text exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Render a health snapshot into Prometheus text format.
pub fn render_prometheus(snapshot: &HealthSnapshot) -> String {
    let mut out = String::new();

    metric(
        &mut out,
        "tokenward_uptime_seconds",
        "Seconds since the renewal daemon started.",
        "gauge",
        snapshot.uptime.as_secs(),
    );
    metric(
        &mut out,
        "tokenward_tokens_managed",
        "Credentials found in the store during the last check cycle.",
        "gauge",
        snapshot.tokens_managed,
    );
    metric(
        &mut out,
        "tokenward_last_check_timestamp_seconds",
        "Unix time of the last completed check cycle.",
        "gauge",
        snapshot.last_check_epoch_secs(),
    );
    metric(
        &mut out,
        "tokenward_renewals_total",
        "Successful credential renewals.",
        "counter",
        snapshot.renewals_total,
    );
    metric(
        &mut out,
        "tokenward_errors_total",
        "Errors encountered while checking or renewing credentials.",
        "counter",
        snapshot.errors_total,
    );

    out
}

fn metric(out: &mut String, name: &str, help: &str, kind: &str, value: u64) {
    // Writing into a String cannot fail.
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
    let _ = writeln!(out, "{name} {value}");
}
