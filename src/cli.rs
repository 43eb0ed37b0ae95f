//! CLI interface for pricewatch.
//!
//! `pricewatch` with no subcommand runs the pipeline once and exits with the
//! run's code. The other subcommands only read state; none of them change
//! how a run behaves.
//!
//! Exit codes of `run`: 0 success, 1 partial, 2 failed (the next run may
//! recover), 3 configuration or pre-flight failure.

mod format;

use std::collections::BTreeMap;
use std::thread;

use clap::{Parser, Subcommand};
use jiff::Timestamp;
use uuid::Uuid;

use crate::audit::{self, AuditRecorder};
use crate::breaker::CircuitBreaker;
use crate::clock::{CancelToken, SystemClock};
use crate::collab::{
    Collaborators, InboxCollector, KeywordExtractor, OutboxDeliverer, SqlitePriceStore,
    TextReportRenderer,
};
use crate::config::Config;
use crate::health::HealthChecker;
use crate::model::{AuditStatus, ExitCode, Step};
use crate::orchestrator::Orchestrator;
use crate::storage::Storage;

use format::{format_circuit, format_entry, format_run};

/// pricewatch: daily vendor price report.
#[derive(Debug, Parser)]
#[command(name = "pricewatch", version, after_long_help = EXIT_HELP)]
pub struct Cli {
    /// Config file. Defaults to `$PRICEWATCH_CONFIG`, then
    /// `~/.pricewatch/config.toml`.
    #[arg(long, global = true)]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

const EXIT_HELP: &str = r"Exit codes (run):
  0  every step succeeded
  1  partial: collection or delivery did not succeed
  2  failed: storage or reporting did not succeed, or the run was cancelled
  3  configuration or pre-flight failure; nothing was attempted";

#[derive(Debug, Default, Subcommand)]
pub enum Command {
    /// Run the pipeline once. The default.
    #[default]
    Run,

    /// Run the pre-flight checks only.
    Check,

    /// Show the persisted circuit breaker table.
    Breakers,

    /// List finished runs, oldest first.
    Runs,

    /// Replay a run's audit trail.
    Audit {
        /// Run ID: full UUID or unambiguous prefix (e.g. `a3b`).
        run: String,
    },
}

/// The file-based collaborators, owned for the length of a command.
struct Shipped {
    collector: InboxCollector,
    extractor: KeywordExtractor,
    store: SqlitePriceStore,
    renderer: TextReportRenderer,
    deliverer: OutboxDeliverer,
}

impl Shipped {
    fn from_config(config: &Config) -> Self {
        let messenger = &config.messenger;
        Self {
            collector: InboxCollector::new(&messenger.inbox_dir, &messenger.session_file),
            extractor: KeywordExtractor,
            store: SqlitePriceStore::new(config.paths.data_dir.join("prices.sqlite")),
            renderer: TextReportRenderer::new(&config.paths.output_dir),
            deliverer: OutboxDeliverer::new(&messenger.outbox_dir, &messenger.session_file),
        }
    }

    fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            collector: &self.collector,
            extractor: &self.extractor,
            store: &self.store,
            renderer: &self.renderer,
            deliverer: &self.deliverer,
        }
    }
}

/// Run a command, returning the process exit code or an error message.
pub fn run(command: Command, config: &Config) -> Result<ExitCode, String> {
    match command {
        Command::Run => cmd_run(config),
        Command::Check => cmd_check(config),
        Command::Breakers => cmd_breakers(config),
        Command::Runs => cmd_runs(config),
        Command::Audit { run } => cmd_audit(config, &run),
    }
}

fn open_storage(config: &Config) -> Result<Storage, String> {
    Storage::new(&config.paths.state_dir)
        .map_err(|e| format!("failed to open state directory: {e}"))
}

fn cmd_run(config: &Config) -> Result<ExitCode, String> {
    let recorder = AuditRecorder::open(&config.paths.audit_dir, Uuid::new_v4());

    let storage = open_storage(config).map_err(|e| preflight_failed(&recorder, e))?;
    let _lock = storage
        .lock_run()
        .map_err(|e| preflight_failed(&recorder, e.to_string()))?;

    let breakers = CircuitBreaker::from_config(config);
    breakers.restore(storage.load_circuits().map_err(|e| {
        preflight_failed(&recorder, format!("failed to load circuit state: {e}"))
    })?);

    let cancel = CancelToken::new();
    watch_interrupt(cancel.clone());

    let shipped = Shipped::from_config(config);
    let run = Orchestrator::new(
        config,
        shipped.collaborators(),
        &breakers,
        &recorder,
        &SystemClock,
        cancel,
    )
    .run();

    if let Err(e) = storage.save_circuits(&breakers.snapshot()) {
        tracing::error!(error = %e, "failed to persist circuit state");
    }
    if let Err(e) = storage.save_run(&run) {
        tracing::error!(error = %e, "failed to persist run snapshot");
    }

    let exit = run.exit_code.unwrap_or(ExitCode::Failed);
    eprintln!(
        "Run {} {} (exit {})",
        run.short_id(),
        run.status.map_or("UNFINISHED", |s| s.as_str()),
        exit.code()
    );
    if let Some(stored) = run.metric("prices_stored") {
        eprintln!("  {stored} price(s) stored");
    }
    for warning in &run.warnings {
        eprintln!("  warning: {warning}");
    }
    eprintln!("Audit: {} ({} entries)", recorder.path().display(), recorder.written());
    Ok(exit)
}

/// Record a failure to set up the run as its one audit entry.
fn preflight_failed(recorder: &AuditRecorder, error: String) -> String {
    recorder.log(
        Timestamp::now(),
        "health",
        "preflight",
        AuditStatus::Failed,
        error.as_str(),
    );
    recorder.flush();
    error
}

/// Cancel `token` on Ctrl-C. The watcher thread dies with the process.
fn watch_interrupt(token: CancelToken) {
    let spawned = thread::Builder::new()
        .name("interrupt".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_io()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::warn!(error = %e, "cannot listen for interrupts");
                    return;
                }
            };
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, cancelling run");
                    token.cancel();
                }
            });
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "cannot listen for interrupts");
    }
}

fn cmd_check(config: &Config) -> Result<ExitCode, String> {
    let shipped = Shipped::from_config(config);
    let report = HealthChecker::new(config, &shipped.store, &shipped.deliverer).pre_flight();

    for check in &report.checks {
        let mark = if check.passed { "ok" } else { "FAIL" };
        println!("[{mark:<4}] {:<12} {}", check.name, check.detail);
    }

    Ok(if report.passed() {
        ExitCode::Success
    } else {
        ExitCode::Precondition
    })
}

fn cmd_breakers(config: &Config) -> Result<ExitCode, String> {
    let storage = open_storage(config)?;
    let mut table = storage
        .load_circuits()
        .map_err(|e| format!("failed to load circuit state: {e}"))?;

    // Classes that never failed have no row yet; show them as CLOSED.
    for class in Step::ALL.into_iter().filter_map(Step::operation_class) {
        table.entry(class.to_string()).or_default();
    }

    for (class, circuit) in &table {
        println!("{}", format_circuit(class, circuit, config.breaker_settings(class)));
    }
    Ok(ExitCode::Success)
}

fn cmd_runs(config: &Config) -> Result<ExitCode, String> {
    let storage = open_storage(config)?;
    let runs = storage
        .list_runs()
        .map_err(|e| format!("failed to list runs: {e}"))?;

    if runs.is_empty() {
        println!("No runs");
        return Ok(ExitCode::Success);
    }

    for run in &runs {
        println!("{}", format_run(run));
    }
    Ok(ExitCode::Success)
}

fn cmd_audit(config: &Config, reference: &str) -> Result<ExitCode, String> {
    let audit_dir = &config.paths.audit_dir;
    let id = resolve_run(&audit::list_runs(audit_dir).map_err(|e| e.to_string())?, reference)?;

    let entries = audit::load(&AuditRecorder::path_for(audit_dir, id))
        .map_err(|e| format!("failed to read audit trail: {e}"))?;

    // The snapshot is missing if the process died mid-run.
    if let Ok(run) = open_storage(config)?.load_run(id) {
        let metrics: BTreeMap<&str, u64> = run
            .metrics
            .iter()
            .map(|(name, m)| (name.as_str(), m.value))
            .collect();
        println!("{}", format_run(&run));
        println!("metrics: {metrics:?}");
    }

    let mut mismatches = 0;
    for entry in &entries {
        if !entry.verify() {
            mismatches += 1;
        }
        println!("{}", format_entry(entry));
    }

    if mismatches > 0 {
        eprintln!("{mismatches} of {} entries failed verification", entries.len());
    }
    Ok(ExitCode::Success)
}

/// Resolve a run reference (full UUID or unambiguous prefix) against `ids`.
fn resolve_run(ids: &[Uuid], reference: &str) -> Result<Uuid, String> {
    if let Ok(id) = reference.parse::<Uuid>() {
        return if ids.contains(&id) {
            Ok(id)
        } else {
            Err(format!("no audit trail for run {id}"))
        };
    }

    let matches: Vec<&Uuid> = ids
        .iter()
        .filter(|id| id.to_string().starts_with(reference))
        .collect();

    match matches.len() {
        0 => Err(format!("no run matching '{reference}'")),
        1 => Ok(*matches[0]),
        n => {
            let shown: Vec<String> = matches
                .iter()
                .map(|id| id.to_string()[..8].to_string())
                .collect();
            Err(format!(
                "'{reference}' is ambiguous: matches {n} runs: {}",
                shown.join(", ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["pricewatch"]).unwrap();
        assert!(matches!(cli.command.unwrap_or_default(), Command::Run));
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["pricewatch", "runs", "--config", "/tmp/p.toml"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/tmp/p.toml")));
        assert!(matches!(cli.command, Some(Command::Runs)));
    }

    fn config_in(dir: &std::path::Path) -> Config {
        let mut config = Config::parse(
            r#"
            recipient = "+923001234567"
            vendors = ["+923001234567"]
            "#,
        )
        .unwrap();
        config.paths.data_dir = dir.join("data");
        config.paths.output_dir = dir.join("out");
        config.paths.audit_dir = dir.join("audit");
        config.paths.state_dir = dir.join("state");
        config
    }

    fn only_audit_trail(config: &Config) -> Vec<crate::model::AuditEntry> {
        let runs = audit::list_runs(&config.paths.audit_dir).unwrap();
        assert_eq!(runs.len(), 1);
        audit::load(&AuditRecorder::path_for(&config.paths.audit_dir, runs[0])).unwrap()
    }

    #[test]
    fn held_run_lock_is_audited_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = config_in(dir.path());
        let storage = Storage::new(&config.paths.state_dir).unwrap();
        let _held = storage.lock_run().unwrap();

        let err = cmd_run(&config).unwrap_err();
        assert!(err.contains("run.lock"), "{err}");

        let entries = only_audit_trail(&config);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "preflight");
        assert_eq!(entries[0].status, AuditStatus::Failed);
        assert_eq!(entries[0].details, err);
    }

    #[test]
    fn corrupt_circuit_state_is_audited_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = config_in(dir.path());
        std::fs::create_dir_all(&config.paths.state_dir).unwrap();
        std::fs::write(config.paths.state_dir.join("state.sqlite"), "not a database").unwrap();

        let err = cmd_run(&config).unwrap_err();
        assert!(err.starts_with("failed to load circuit state"), "{err}");

        let entries = only_audit_trail(&config);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "preflight");
        assert_eq!(entries[0].status, AuditStatus::Failed);
    }

    #[test]
    fn resolves_unique_prefix() {
        let a: Uuid = "a3b0fc12-0000-4000-8000-000000000001".parse().unwrap();
        let b: Uuid = "b7c1d2e3-0000-4000-8000-000000000002".parse().unwrap();
        assert_eq!(resolve_run(&[a, b], "a3b").unwrap(), a);
        assert_eq!(resolve_run(&[a, b], &b.to_string()).unwrap(), b);
    }

    #[test]
    fn ambiguous_or_unknown_prefix_fails() {
        let a: Uuid = "a3b0fc12-0000-4000-8000-000000000001".parse().unwrap();
        let b: Uuid = "a3b9aaaa-0000-4000-8000-000000000002".parse().unwrap();

        let err = resolve_run(&[a, b], "a3b").unwrap_err();
        assert!(err.contains("ambiguous"));
        assert!(resolve_run(&[a, b], "ff").unwrap_err().contains("no run"));
    }
}
