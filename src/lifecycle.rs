//! The state machine that carries one job from staging to teardown.
//!
//! `Idle → Staging → Building → Printing → TearingDown → Idle`. Jobs are
//! processed one at a time in arrival order, so the staging slot and the open
//! sandbox are only ever touched by the job that owns them.

use crate::builder::SandboxBuilder;
use crate::config::{PrintConfig, TimingConfig};
use crate::dispatch::JobReceiver;
use crate::error::PrintError;
use crate::job::PrintJob;
use crate::journal::JobJournal;
use crate::metrics::LifecycleMetrics;
use crate::sandbox::{LoadSignal, Sandbox, SandboxContext, SandboxId};
use crate::staging::{QrCodeRenderer, StagingArea};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Idle,
    Staging,
    Building,
    Printing,
    TearingDown,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Staging => "staging",
            LifecycleState::Building => "building",
            LifecycleState::Printing => "printing",
            LifecycleState::TearingDown => "tearing-down",
        }
    }
}

/// How the controller decides a suspension point is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SettleMode {
    /// Wait every configured delay in full, whatever the platform reports.
    #[default]
    FixedDelay,
    /// Move on as soon as the real signal arrives; the delays become
    /// deadlines.
    Signal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OverlapPolicy {
    #[default]
    Queue,
    /// Drop jobs that were submitted while an earlier job was in flight.
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleTiming {
    pub stage_settle: Duration,
    pub load_timeout: Duration,
    pub print_settle: Duration,
    pub teardown_grace: Duration,
    pub mode: SettleMode,
}

impl Default for LifecycleTiming {
    fn default() -> Self {
        TimingConfig::default().lifecycle_timing()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Printed {
        sandbox: SandboxId,
        acknowledged: bool,
    },
    Abandoned {
        reason: String,
    },
    Rejected,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Printed { .. } => "printed",
            JobOutcome::Abandoned { .. } => "abandoned",
            JobOutcome::Rejected => "rejected",
        }
    }
}

pub struct LifecycleController<S: Sandbox> {
    sandbox: S,
    staging: StagingArea,
    builder: SandboxBuilder,
    timing: LifecycleTiming,
    overlap: OverlapPolicy,
    journal: Option<JobJournal>,
    metrics: LifecycleMetrics,
    state: watch::Sender<LifecycleState>,
    last_finished: Option<Instant>,
}

impl<S: Sandbox> LifecycleController<S> {
    pub fn new(sandbox: S, config: &PrintConfig) -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        Self {
            sandbox,
            staging: StagingArea::new(QrCodeRenderer::from_config(&config.label)),
            builder: SandboxBuilder::from_config(config),
            timing: config.timing.lifecycle_timing(),
            overlap: config.timing.overlap,
            journal: None,
            metrics: LifecycleMetrics::default(),
            state,
            last_finished: None,
        }
    }

    pub fn with_staging(mut self, staging: StagingArea) -> Self {
        self.staging = staging;
        self
    }

    pub fn with_builder(mut self, builder: SandboxBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn with_timing(mut self, timing: LifecycleTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_overlap(mut self, overlap: OverlapPolicy) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn with_journal(mut self, journal: JobJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn sandbox(&self) -> &S {
        &self.sandbox
    }

    pub fn metrics(&self) -> &LifecycleMetrics {
        &self.metrics
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Processes jobs until every dispatcher handle is dropped.
    pub async fn run(&mut self, mut receiver: JobReceiver) -> LifecycleMetrics {
        while let Some(job) = receiver.next_job().await {
            self.process(job).await;
        }
        info!(
            printed = self.metrics.printed,
            abandoned = self.metrics.abandoned,
            rejected = self.metrics.rejected,
            "job stream closed"
        );
        if let Some(journal) = &self.journal {
            journal.emit_summary("run");
            journal.flush();
        }
        self.metrics.clone()
    }

    /// Runs one job to completion. Never fails: errors abandon the job and
    /// leave the controller idle with nothing attached.
    pub async fn process(&mut self, job: PrintJob) -> JobOutcome {
        self.metrics.received += 1;
        if self.overlap == OverlapPolicy::Reject
            && self
                .last_finished
                .is_some_and(|finished| job.submitted_at < finished)
        {
            warn!(job = %job.id, "job overlapped an earlier print; rejected");
            self.metrics.rejected += 1;
            self.record_outcome(&job, &JobOutcome::Rejected);
            return JobOutcome::Rejected;
        }

        let started = Instant::now();
        let outcome = match self.drive(&job).await {
            Ok((sandbox, acknowledged)) => {
                info!(job = %job.id, %sandbox, acknowledged, "job printed");
                self.metrics.printed += 1;
                if acknowledged {
                    self.metrics.acknowledged += 1;
                }
                JobOutcome::Printed {
                    sandbox,
                    acknowledged,
                }
            }
            Err(err) => {
                error!(job = %job.id, kind = %job.kind(), error = %err, "print job abandoned");
                self.metrics.abandoned += 1;
                JobOutcome::Abandoned {
                    reason: err.to_string(),
                }
            }
        };
        self.enter(&job, LifecycleState::Idle);
        self.record_outcome(&job, &outcome);
        self.metrics.busy_ms += started.elapsed().as_millis() as u64;
        self.last_finished = Some(Instant::now());
        outcome
    }

    async fn drive(&mut self, job: &PrintJob) -> Result<(SandboxId, bool), PrintError> {
        self.enter(job, LifecycleState::Staging);
        self.staging.clear();
        if let Err(err) = self.staging.stage(job) {
            self.staging.clear();
            return Err(err);
        }
        if self.timing.mode == SettleMode::FixedDelay {
            tokio::time::sleep(self.timing.stage_settle).await;
        }

        self.enter(job, LifecycleState::Building);
        let built = self
            .builder
            .build(&mut self.sandbox, job, self.staging.current_markup(job.id));
        let (mut context, load) = match built {
            Ok(built) => built,
            Err(err) => {
                self.staging.clear();
                return Err(err);
            }
        };

        let printed = self.print(job, &mut context, load).await;
        if printed.is_err() {
            self.enter(job, LifecycleState::TearingDown);
        }
        context.teardown(&mut self.sandbox);
        self.staging.clear();
        debug!(job = %job.id, sandbox = %context.id(), "sandbox detached");
        printed.map(|acknowledged| (context.id(), acknowledged))
    }

    async fn print(
        &mut self,
        job: &PrintJob,
        context: &mut SandboxContext,
        load: LoadSignal,
    ) -> Result<bool, PrintError> {
        load.wait(self.timing.load_timeout).await?;
        if self.timing.mode == SettleMode::FixedDelay {
            tokio::time::sleep(self.timing.print_settle).await;
        }

        self.enter(job, LifecycleState::Printing);
        let output = context.trigger_output(&mut self.sandbox)?;
        let grace = self.timing.teardown_grace;
        let acknowledged = match self.timing.mode {
            SettleMode::Signal => output.wait(grace).await,
            SettleMode::FixedDelay => {
                let deadline = Instant::now() + grace;
                let acknowledged = output.wait(grace).await;
                tokio::time::sleep_until(deadline).await;
                acknowledged
            }
        };
        self.enter(job, LifecycleState::TearingDown);
        Ok(acknowledged)
    }

    fn enter(&self, job: &PrintJob, state: LifecycleState) {
        self.state.send_replace(state);
        debug!(job = %job.id, state = state.as_str(), "lifecycle transition");
        if let Some(journal) = &self.journal {
            journal.transition(job, state);
        }
    }

    fn record_outcome(&self, job: &PrintJob, outcome: &JobOutcome) {
        if let Some(journal) = &self.journal {
            let detail = match outcome {
                JobOutcome::Abandoned { reason } => Some(reason.as_str()),
                _ => None,
            };
            journal.outcome(job, outcome.as_str(), detail);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::JobDispatcher;
    use crate::inspect::InspectedDocument;
    use crate::job::{JobId, JobKind, JobPayload, LabelPayload, ReportPayload};
    use crate::sandbox::{MemorySandbox, SandboxEvent};
    use crate::staging::CodeRenderer;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    fn assert_elapsed_ms(started: Instant, expected: u64) {
        let elapsed = started.elapsed();
        let expected = Duration::from_millis(expected);
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(5),
            "elapsed {elapsed:?}, expected {expected:?}"
        );
    }

    fn label_job(id: u64) -> PrintJob {
        PrintJob::new(
            JobId(id),
            JobPayload::Label(
                LabelPayload::default()
                    .with_title("생표고 1kg")
                    .with_date("2026-02-26")
                    .with_producer("관리자")
                    .with_code("B-001")
                    .with_encoded_value("HARVEST:B-001"),
            ),
        )
    }

    fn controller(sandbox: &MemorySandbox) -> LifecycleController<MemorySandbox> {
        LifecycleController::new(sandbox.clone(), &PrintConfig::default())
    }

    fn signal_timing() -> LifecycleTiming {
        LifecycleTiming {
            mode: SettleMode::Signal,
            ..LifecycleTiming::default()
        }
    }

    struct OfflineRenderer;

    impl CodeRenderer for OfflineRenderer {
        fn render_svg(&self, _value: &str) -> Result<String, PrintError> {
            Err(PrintError::Staging("code renderer offline".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_delays_add_up_before_teardown() {
        let sandbox = MemorySandbox::new();
        let mut controller = controller(&sandbox);
        let started = Instant::now();
        let outcome = controller.process(label_job(1)).await;
        assert_elapsed_ms(started, 300 + 500 + 3000);

        let JobOutcome::Printed { sandbox: id, acknowledged } = outcome else {
            panic!("expected a printed outcome");
        };
        assert!(!acknowledged);
        assert_eq!(
            sandbox.events(),
            vec![
                SandboxEvent::Created(id),
                SandboxEvent::Populated(id),
                SandboxEvent::OutputTriggered(id),
                SandboxEvent::Destroyed(id),
            ]
        );
        assert!(sandbox.attached().is_empty());
        assert_eq!(controller.state(), LifecycleState::Idle);

        let printed = InspectedDocument::parse(&sandbox.outputs()[0].document.html);
        let text = printed.text();
        for expected in ["생표고 1kg", "2026-02-26", "관리자", "B-001"] {
            assert!(text.contains(expected), "missing {expected} in {text}");
        }
        assert_eq!(
            printed.attr(".code-image", "data-encoded-value").as_deref(),
            Some("HARVEST:B-001")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_delay_waits_out_grace_even_when_acknowledged() {
        let sandbox = MemorySandbox::new().with_output_acknowledgement(true);
        let mut controller = controller(&sandbox);
        let started = Instant::now();
        let outcome = controller.process(label_job(1)).await;
        assert_elapsed_ms(started, 3800);
        assert!(matches!(outcome, JobOutcome::Printed { acknowledged: true, .. }));
        assert_eq!(controller.metrics().acknowledged, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn signal_mode_moves_on_when_signals_arrive() {
        let sandbox = MemorySandbox::new().with_output_acknowledgement(true);
        let mut controller = controller(&sandbox).with_timing(signal_timing());
        let started = Instant::now();
        let outcome = controller.process(label_job(1)).await;
        assert_elapsed_ms(started, 0);
        assert!(matches!(outcome, JobOutcome::Printed { acknowledged: true, .. }));
        assert!(sandbox.attached().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn signal_mode_without_acknowledgement_uses_grace_as_deadline() {
        let sandbox = MemorySandbox::new();
        let mut controller = controller(&sandbox).with_timing(signal_timing());
        let started = Instant::now();
        controller.process(label_job(1)).await;
        assert_elapsed_ms(started, 3000);
    }

    #[tokio::test(start_paused = true)]
    async fn staging_failure_abandons_without_a_sandbox() {
        let sandbox = MemorySandbox::new();
        let mut controller = controller(&sandbox).with_staging(StagingArea::new(OfflineRenderer));
        let outcome = controller.process(label_job(1)).await;
        let JobOutcome::Abandoned { reason } = outcome else {
            panic!("expected abandoned");
        };
        assert!(reason.contains("code renderer offline"));
        assert!(sandbox.events().is_empty());
        assert_eq!(controller.state(), LifecycleState::Idle);
        assert_eq!(controller.metrics().abandoned, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_sandbox_abandons_then_recovers() {
        let sandbox = MemorySandbox::new();
        sandbox.fail_next_create();
        let mut controller = controller(&sandbox);
        assert!(matches!(
            controller.process(label_job(1)).await,
            JobOutcome::Abandoned { .. }
        ));
        assert!(sandbox.attached().is_empty());
        assert!(matches!(
            controller.process(label_job(2)).await,
            JobOutcome::Printed { .. }
        ));
        assert_eq!(sandbox.outputs().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn load_timeout_tears_down_immediately() {
        let sandbox = MemorySandbox::new().with_held_loads(true);
        let mut controller = controller(&sandbox);
        let started = Instant::now();
        let outcome = controller.process(label_job(1)).await;
        assert_elapsed_ms(started, 300 + 5000);
        assert!(matches!(outcome, JobOutcome::Abandoned { .. }));
        assert!(sandbox.outputs().is_empty());
        assert!(sandbox.attached().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn journal_records_every_transition() {
        let sandbox = MemorySandbox::new();
        let journal = JobJournal::in_memory();
        let mut controller = controller(&sandbox).with_journal(journal.clone());
        controller.process(label_job(1)).await;

        let states: Vec<String> = journal
            .lines()
            .iter()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter(|entry| entry["type"] == "lifecycle.transition")
            .filter_map(|entry| entry["state"].as_str().map(str::to_string))
            .collect();
        assert_eq!(
            states,
            vec!["staging", "building", "printing", "tearing-down", "idle"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn state_is_observable_while_printing() {
        let sandbox = MemorySandbox::new();
        let mut controller = controller(&sandbox);
        let mut states = controller.subscribe_state();
        let handle = tokio::spawn(async move {
            controller.process(label_job(1)).await;
            controller
        });
        states
            .wait_for(|state| *state == LifecycleState::Printing)
            .await
            .expect("printing observed");
        let controller = handle.await.expect("join");
        assert_eq!(controller.state(), LifecycleState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_jobs_print_in_submission_order() {
        let sandbox = MemorySandbox::new();
        let dispatcher = JobDispatcher::new();
        let receiver = dispatcher.subscribe();
        dispatcher.submit(JobKind::Label, json!({"code": "B-001"}));
        dispatcher.submit(JobKind::Report, json!({"title": "일일 접수 현황 보고서", "content": "총 5건"}));
        dispatcher.submit_label(LabelPayload::default().with_code("B-002"));
        drop(dispatcher);

        let metrics = controller(&sandbox).run(receiver).await;
        assert_eq!(metrics.printed, 3);
        let titles: Vec<String> = sandbox
            .outputs()
            .iter()
            .map(|output| output.document.title.clone())
            .collect();
        assert_eq!(titles, vec!["-", "일일 접수 현황 보고서", "-"]);
        let codes: Vec<String> = sandbox
            .outputs()
            .iter()
            .filter(|output| output.document.kind == JobKind::Label)
            .flat_map(|output| InspectedDocument::parse(&output.document.html).texts(".label-code"))
            .collect();
        assert_eq!(codes, vec!["B-001", "B-002"]);
        assert!(sandbox.attached().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reject_policy_drops_overlapping_jobs() {
        let sandbox = MemorySandbox::new();
        let dispatcher = JobDispatcher::new();
        let receiver = dispatcher.subscribe();
        dispatcher.submit_label(LabelPayload::default().with_code("B-001"));
        dispatcher.submit_label(LabelPayload::default().with_code("B-002"));
        drop(dispatcher);

        let mut controller = controller(&sandbox).with_overlap(OverlapPolicy::Reject);
        let metrics = controller.run(receiver).await;
        assert_eq!(metrics.printed, 1);
        assert_eq!(metrics.rejected, 1);
        assert_eq!(metrics.finished(), 2);

        // A job submitted after the first one finished is accepted again.
        let later = PrintJob::new(
            JobId(10),
            JobPayload::Report(ReportPayload::new("월간 요약", "총 12건")),
        );
        assert!(matches!(
            controller.process(later).await,
            JobOutcome::Printed { .. }
        ));
    }
}
