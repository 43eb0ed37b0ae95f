//! The run: pre-flight, then `COLLECT → EXTRACT → VALIDATE_STORE → REPORT →
//! DELIVER`, strictly in order.
//!
//! Each step goes through [`Orchestrator::step`], which consults the step's
//! breaker, runs the collaborator call under the step's retry policy, feeds
//! the final result back to the breaker, and records one [`StepOutcome`]
//! with a matching audit entry. A breaker sees one event per step, never
//! one per attempt.
//!
//! Nothing in here returns an error: every failure ends up as a recorded
//! outcome, and the finished [`RunContext`] carries the status and exit code.

use std::fmt;
use std::time::Instant;

use crate::audit::AuditRecorder;
use crate::breaker::{Admission, CircuitBreaker, Transition};
use crate::clock::{CancelToken, Clock};
use crate::collab::Collaborators;
use crate::config::Config;
use crate::health::HealthChecker;
use crate::model::{
    AuditStatus, BreakerState, ExitCode, PriceCandidate, ReportArtifact, RunContext, RunStatus,
    Step, StepOutcome, StepStatus, ValidatedPrice,
};
use crate::retry::{RetryFailure, RetryPolicy, Retryable};
use crate::validate::{self, Kind, Reason, Validator};

const ACTOR: &str = "orchestrator";

/// Why a step produced no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Failed,
    CircuitOpen,
    Cancelled,
}

/// Drives one run against a set of collaborators.
pub struct Orchestrator<'a> {
    config: &'a Config,
    collab: Collaborators<'a>,
    breakers: &'a CircuitBreaker,
    audit: &'a AuditRecorder,
    clock: &'a dyn Clock,
    cancel: CancelToken,
    validator: Validator,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a Config,
        collab: Collaborators<'a>,
        breakers: &'a CircuitBreaker,
        audit: &'a AuditRecorder,
        clock: &'a dyn Clock,
        cancel: CancelToken,
    ) -> Self {
        Self {
            config,
            collab,
            breakers,
            audit,
            clock,
            cancel,
            validator: Validator::new(config.validation),
        }
    }

    /// Run the health check and, if it passes, the whole pipeline.
    pub fn run(&self) -> RunContext {
        let mut run = RunContext::new(self.audit.run_id(), self.clock.now());
        tracing::info!(run = %run.short_id(), "run started");

        let health = HealthChecker::new(self.config, self.collab.store, self.collab.deliverer)
            .pre_flight();
        if !health.passed() {
            tracing::error!(run = %run.short_id(), %health, "pre-flight failed");
            let now = self.clock.now();
            self.audit
                .log(now, "health", "preflight", AuditStatus::Failed, health.to_string());
            self.audit.flush();
            run.finish(RunStatus::Failed, ExitCode::Precondition, now);
            return run;
        }

        let vendors = self.vendor_whitelist(&mut run);
        let cancelled = self.pipeline(&mut run, &vendors) == Some(Halt::Cancelled);

        let status = aggregate(&run.outcomes, cancelled);
        let exit = ExitCode::from(status);
        let now = self.clock.now();
        self.audit.log(
            now,
            ACTOR,
            "run",
            status.into(),
            format!("exit code {}", exit.code()),
        );
        self.audit.flush();
        if self.audit.failed() > 0 {
            run.add_warning(format!("{} audit entries could not be written", self.audit.failed()));
        }
        run.finish(status, exit, now);

        tracing::info!(
            run = %run.short_id(),
            status = status.as_str(),
            exit = exit.code(),
            "run finished"
        );
        run
    }

    /// The five steps. Returns why the pipeline stopped early, if it did.
    fn pipeline(&self, run: &mut RunContext, vendors: &[String]) -> Option<Halt> {
        let c = self.collab;

        let messages = match self.step(run, Step::Collect, || c.collector.collect(vendors)) {
            Ok(messages) => messages,
            Err(Halt::Cancelled) => return self.halt(run, Step::Collect, Halt::Cancelled),
            Err(_) => Vec::new(),
        };
        self.metric(run, "messages_collected", messages.len());

        let candidates = match self.step(run, Step::Extract, || c.extractor.extract(&messages)) {
            Ok(candidates) => candidates,
            Err(Halt::Cancelled) => return self.halt(run, Step::Extract, Halt::Cancelled),
            Err(_) => Vec::new(),
        };
        self.metric(run, "candidates_extracted", candidates.len());

        let prices = self.validate_candidates(run, &candidates);
        match self.step(run, Step::ValidateStore, || c.store.store(&prices)) {
            Ok(stored) => self.metric(run, "prices_stored", stored),
            Err(halt) => return self.halt(run, Step::ValidateStore, halt),
        }

        let artifact = match self.step(run, Step::Report, || c.renderer.render(&prices)) {
            Ok(artifact) => artifact,
            Err(halt) => return self.halt(run, Step::Report, halt),
        };
        self.metric(run, "report_summary_bytes", artifact.summary_text.len());
        self.metric(run, "report_detail_bytes", artifact.detail_text.len());
        self.post_flight(run, &artifact);

        let recipient = self.config.recipient.as_str();
        match self.step(run, Step::Deliver, || c.deliverer.deliver(&artifact, recipient)) {
            Ok(()) | Err(Halt::Failed | Halt::CircuitOpen) => None,
            Err(Halt::Cancelled) => Some(Halt::Cancelled),
        }
    }

    /// Run one step under its breaker and retry policy and record the outcome.
    fn step<T, E>(
        &self,
        run: &mut RunContext,
        step: Step,
        op: impl FnMut() -> Result<T, E>,
    ) -> Result<T, Halt>
    where
        E: Retryable + fmt::Display,
    {
        let started = Instant::now();
        let class = step.operation_class();

        if self.cancel.is_cancelled() {
            self.record(run, step, StepStatus::Failed, 0, started, Some("cancelled".into()));
            return Err(Halt::Cancelled);
        }

        if let Some(class) = class {
            let (admission, transition) = self.breakers.try_acquire(class, self.clock.now());
            self.transition(transition);
            if let Admission::Rejected { retry_in } = admission {
                let detail = format!(
                    "{class} breaker is open, next probe in {}s",
                    retry_in.as_secs()
                );
                self.record(run, step, StepStatus::CircuitOpen, 0, started, Some(detail));
                return Err(Halt::CircuitOpen);
            }
        }

        // Only breaker-guarded steps talk to something that can recover.
        let policy = if class.is_some() {
            self.config.retry_policy(step)
        } else {
            RetryPolicy::once()
        };
        let action = format!("{}.attempt", step.key());
        let max_attempts = policy.max_attempts.max(1);
        let outcome = policy.run(&self.cancel, op, |attempt, err: Option<&E>| {
            let (status, details) = match err {
                None => (AuditStatus::Success, format!("attempt {attempt}/{max_attempts}")),
                Some(e) => (
                    AuditStatus::Failed,
                    format!("attempt {attempt}/{max_attempts}: {e}"),
                ),
            };
            self.audit.log(self.clock.now(), ACTOR, &action, status, details);
        });

        match outcome.result {
            Ok(value) => {
                if let Some(class) = class {
                    self.transition(self.breakers.record_success(class));
                }
                self.record(run, step, StepStatus::Success, outcome.attempts, started, None);
                Ok(value)
            }
            Err(RetryFailure::Cancelled(_)) => {
                if let Some(class) = class {
                    self.breakers.release(class);
                }
                self.record(
                    run,
                    step,
                    StepStatus::Failed,
                    outcome.attempts,
                    started,
                    Some("cancelled".into()),
                );
                Err(Halt::Cancelled)
            }
            Err(failure) => {
                if let Some(class) = class {
                    let transition = self.breakers.record_failure(class, self.clock.now());
                    self.transition(transition);
                }
                let detail = match &failure {
                    RetryFailure::Permanent(e) => format!("{e} (permanent, attempt {})", outcome.attempts),
                    _ => match failure.error() {
                        Some(e) => format!("{e} (after {} attempts)", outcome.attempts),
                        None => format!("failed after {} attempts", outcome.attempts),
                    },
                };
                tracing::debug!(step = step.as_str(), elapsed = ?outcome.elapsed, "step exhausted");
                self.record(run, step, StepStatus::Failed, outcome.attempts, started, Some(detail));
                Err(Halt::Failed)
            }
        }
    }

    /// Append the outcome and its audit entry together.
    fn record(
        &self,
        run: &mut RunContext,
        step: Step,
        status: StepStatus,
        attempts: u32,
        started: Instant,
        error: Option<String>,
    ) {
        let finished_at = self.clock.now();
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match (&error, status) {
            (_, StepStatus::Success) => {
                tracing::info!(step = step.as_str(), attempts, duration_ms, "step succeeded");
            }
            (Some(e), _) => {
                tracing::warn!(step = step.as_str(), status = status.as_str(), error = %e, "step did not succeed");
            }
            (None, _) => {
                tracing::warn!(step = step.as_str(), status = status.as_str(), "step did not succeed");
            }
        }

        let details = error
            .clone()
            .unwrap_or_else(|| format!("{attempts} attempt(s), {duration_ms} ms"));
        self.audit
            .log(finished_at, ACTOR, step.key(), status.into(), details);
        run.push_outcome(StepOutcome {
            step,
            status,
            attempts,
            duration_ms,
            error,
            finished_at,
        });
    }

    /// Stop after `step`: every later step is recorded SKIPPED.
    fn halt(&self, run: &mut RunContext, step: Step, halt: Halt) -> Option<Halt> {
        let reason = match halt {
            Halt::Cancelled => "cancelled".to_string(),
            Halt::Failed | Halt::CircuitOpen => format!("{step} did not succeed"),
        };
        for later in Step::ALL.into_iter().skip_while(|s| *s != step).skip(1) {
            self.record(run, later, StepStatus::Skipped, 0, Instant::now(), Some(reason.clone()));
        }
        Some(halt)
    }

    fn transition(&self, transition: Option<Transition>) {
        let Some(t) = transition else {
            return;
        };
        tracing::warn!(class = %t.class, from = t.from.as_str(), to = t.to.as_str(), "breaker transition");
        let status = match t.to {
            BreakerState::Closed => AuditStatus::Success,
            BreakerState::Open | BreakerState::HalfOpen => AuditStatus::CircuitOpen,
        };
        self.audit.log(
            self.clock.now(),
            "breaker",
            &format!("breaker.{}", t.class),
            status,
            format!("{} -> {}", t.from.as_str(), t.to.as_str()),
        );
    }

    /// Normalize the configured vendor numbers; invalid ones are dropped.
    fn vendor_whitelist(&self, run: &mut RunContext) -> Vec<String> {
        let mut vendors = Vec::new();
        let mut rejected = 0;
        for raw in &self.config.vendors {
            match self.validator.validate(Kind::Phone, raw).into_result() {
                Ok(number) => {
                    if !vendors.contains(&number) {
                        vendors.push(number);
                    }
                }
                Err(reason) => {
                    rejected += 1;
                    let shown = validate::sanitize(raw, 32);
                    tracing::warn!(vendor = %shown, reason = reason.code(), "dropping vendor number");
                    run.add_warning(format!("vendor {shown:?} dropped: {}", reason.code()));
                    self.audit.log(
                        self.clock.now(),
                        "validator",
                        "vendor.reject",
                        AuditStatus::Skipped,
                        format!("{shown:?}: {}", reason.code()),
                    );
                }
            }
        }
        self.metric(run, "vendor_count", vendors.len());
        self.metric(run, "vendors_rejected", rejected);
        vendors
    }

    /// Candidates that pass validation. Each reject gets an audit entry.
    fn validate_candidates(
        &self,
        run: &mut RunContext,
        candidates: &[PriceCandidate],
    ) -> Vec<ValidatedPrice> {
        let mut prices = Vec::with_capacity(candidates.len());
        let mut rejected = 0;
        for candidate in candidates {
            match self.validate_candidate(candidate) {
                Ok(price) => prices.push(price),
                Err((field, reason)) => {
                    rejected += 1;
                    let product = self.validator.freetext(&candidate.product_text);
                    self.audit.log(
                        self.clock.now(),
                        "validator",
                        "price.reject",
                        AuditStatus::Skipped,
                        format!("{field} {}: {product:?}", reason.code()),
                    );
                }
            }
        }
        if rejected > 0 {
            tracing::info!(rejected, accepted = prices.len(), "price candidates rejected");
        }
        self.metric(run, "prices_rejected", rejected);
        prices
    }

    fn validate_candidate(
        &self,
        candidate: &PriceCandidate,
    ) -> Result<ValidatedPrice, (&'static str, Reason)> {
        let check = |field: &'static str, kind: Kind, input: &str| {
            self.validator
                .validate(kind, input)
                .into_result()
                .map_err(|reason| (field, reason))
        };

        let product = check("product", Kind::Freetext, &candidate.product_text)?;
        if product.is_empty() {
            return Err(("product", Reason::Empty));
        }
        let price = check("price", Kind::Price, &candidate.price_text)?
            .parse::<f64>()
            .map_err(|_| ("price", Reason::NotANumber))?;
        let vendor = check("sender", Kind::Phone, &candidate.source_sender)?;
        let date = candidate
            .received_at
            .to_zoned(jiff::tz::TimeZone::UTC)
            .date()
            .to_string();

        Ok(ValidatedPrice {
            product,
            vendor,
            price,
            date,
        })
    }

    fn post_flight(&self, run: &mut RunContext, artifact: &ReportArtifact) {
        let report = HealthChecker::post_flight(artifact);
        let status = if report.passed() {
            AuditStatus::Success
        } else {
            tracing::warn!(%report, "post-flight check failed");
            run.add_warning(format!("post-flight: {report}"));
            AuditStatus::Failed
        };
        self.audit
            .log(self.clock.now(), "health", "postflight", status, report.to_string());
    }

    fn metric(&self, run: &mut RunContext, name: &str, value: usize) {
        run.add_metric(name, u64::try_from(value).unwrap_or(u64::MAX), self.clock.now());
    }
}

/// SUCCESS when every step succeeded, FAILED when a fatal step did not or
/// the run was cancelled, PARTIAL otherwise.
fn aggregate(outcomes: &[StepOutcome], cancelled: bool) -> RunStatus {
    let fatal_failed = outcomes
        .iter()
        .any(|o| o.step.is_fatal() && o.status != StepStatus::Success);
    if cancelled || fatal_failed {
        return RunStatus::Failed;
    }
    if outcomes.iter().all(|o| o.status == StepStatus::Success) {
        RunStatus::Success
    } else {
        RunStatus::Partial
    }
}
