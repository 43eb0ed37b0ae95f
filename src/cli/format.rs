//! Output formatting for CLI display.

use crate::config::BreakerSettings;
use crate::model::{AuditEntry, CircuitState, RunContext, Step};

/// One row of `pricewatch breakers`.
pub(super) fn format_circuit(class: &str, circuit: &CircuitState, settings: BreakerSettings) -> String {
    let opened = circuit
        .opened_at
        .map_or_else(|| "-".to_string(), |t| t.strftime("%Y-%m-%d %H:%M:%S").to_string());
    format!(
        "{class:<20} {:<10} failures {}/{}  opened {opened}  cooldown {}s",
        circuit.state.as_str(),
        circuit.consecutive_failures,
        settings.threshold,
        settings.cooldown_secs,
    )
}

/// One row of `pricewatch runs`: id, start, status, then each step's status.
pub(super) fn format_run(run: &RunContext) -> String {
    let status = run.status.map_or("UNFINISHED", |s| s.as_str());
    let exit = run
        .exit_code
        .map_or_else(|| "-".to_string(), |c| c.code().to_string());
    let steps: Vec<String> = Step::ALL
        .into_iter()
        .map(|step| {
            let mark = run.outcome(step).map_or("-", |o| o.status.as_str());
            format!("{}={mark}", step.key())
        })
        .collect();
    format!(
        "{}  {}  [{status}] exit {exit}  {}",
        run.short_id(),
        run.started_at.strftime("%Y-%m-%d %H:%M:%S"),
        steps.join(" ")
    )
}

/// One line of `pricewatch audit`, flagged when the digest does not verify.
pub(super) fn format_entry(entry: &AuditEntry) -> String {
    let flag = if entry.verify() { "" } else { "  !! digest mismatch" };
    format!(
        "{}  {:<12} {:<12} {:<24} {}{flag}",
        entry.timestamp.strftime("%H:%M:%S"),
        entry.status.as_str(),
        entry.actor,
        entry.action,
        entry.details,
    )
}
