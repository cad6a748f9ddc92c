mod assets;
mod builder;
mod config;
mod dispatch;
mod error;
mod escape;
mod inspect;
mod job;
mod journal;
mod lifecycle;
mod metrics;
mod portal;
mod print_css;
mod report;
mod sandbox;
mod spool;
mod staging;
mod types;

pub use assets::{AssetResolver, ImageRef, ResolvedImage, embed_bytes};
pub use builder::SandboxBuilder;
pub use config::{
    CodeErrorCorrection, DEFAULT_REPORT_FONT_IMPORT, LabelCaptions, LabelConfig, PortalConfig,
    PrintConfig, ReportConfig, TimingConfig,
};
pub use dispatch::{JobDispatcher, JobReceiver};
pub use error::PrintError;
pub use inspect::InspectedDocument;
pub use job::{
    JobId, JobKind, JobPayload, LabelPayload, PrintJob, ReportPayload, field_or_placeholder,
};
pub use journal::JobJournal;
pub use lifecycle::{
    JobOutcome, LifecycleController, LifecycleState, LifecycleTiming, OverlapPolicy, SettleMode,
};
pub use metrics::LifecycleMetrics;
pub use portal::{
    AppRoot, Attachment, AttachmentCategory, AttachmentInput, EnvReadings, FarmProfile, LogRecord,
    LogRow, LogSection, Material, PortalRenderer, PresentationMode, REPORT_TITLE, ReportDocument,
    RootNode,
};
pub use print_css::{
    PRESENTATION_ATTR, PageSetup, extract_page_setup, label_stylesheet, normalize,
    portal_stylesheet, report_stylesheet,
};
pub use report::{ReportBody, ReportSection, ReportTemplate, StaticReportRenderer, parse_sections};
pub use sandbox::{
    CapturedOutput, LoadNotifier, LoadSignal, MemorySandbox, OutputSignal, Sandbox,
    SandboxContext, SandboxDocument, SandboxEvent, SandboxId, SandboxPhase,
};
pub use spool::DirectorySandbox;
pub use staging::{CodeRenderer, QrCodeRenderer, RenderedMarkup, StagingArea, verify_svg};
pub use types::{Margins, Mm, PageSize};

use std::path::PathBuf;
use tokio::task::JoinHandle;
use tracing::info;

/// Entry point wiring configuration, dispatcher and renderers together.
pub struct PrintService {
    config: PrintConfig,
    journal: Option<JobJournal>,
    dispatcher: JobDispatcher,
}

#[derive(Clone, Default)]
pub struct PrintServiceBuilder {
    config: PrintConfig,
    journal_path: Option<PathBuf>,
}

impl PrintServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: PrintConfig) -> Self {
        self.config = config;
        self
    }

    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.config.timing = timing;
        self
    }

    pub fn farm(mut self, farm: FarmProfile) -> Self {
        self.config.portal.farm = farm;
        self
    }

    /// Writes a JSON-lines lifecycle journal to `path`.
    pub fn journal_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.journal_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<PrintService, PrintError> {
        self.config.validate()?;
        let journal = match &self.journal_path {
            Some(path) => Some(JobJournal::to_file(path)?),
            None => None,
        };
        Ok(PrintService {
            config: self.config,
            journal,
            dispatcher: JobDispatcher::new(),
        })
    }
}

impl PrintService {
    pub fn builder() -> PrintServiceBuilder {
        PrintServiceBuilder::new()
    }

    pub fn config(&self) -> &PrintConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> JobDispatcher {
        self.dispatcher.clone()
    }

    pub fn controller<S: Sandbox>(&self, sandbox: S) -> LifecycleController<S> {
        let controller = LifecycleController::new(sandbox, &self.config);
        match &self.journal {
            Some(journal) => controller.with_journal(journal.clone()),
            None => controller,
        }
    }

    /// Starts a lifecycle controller on the runtime. The task ends once this
    /// service and every dispatcher clone are dropped.
    pub fn spawn<S: Sandbox + 'static>(&self, sandbox: S) -> JoinHandle<LifecycleMetrics> {
        let receiver = self.dispatcher.subscribe();
        let mut controller = self.controller(sandbox);
        info!(overlap = ?self.config.timing.overlap, mode = ?self.config.timing.mode, "print lifecycle started");
        tokio::spawn(async move { controller.run(receiver).await })
    }

    pub fn report_renderer<S: Sandbox>(&self, sandbox: S) -> StaticReportRenderer<S> {
        StaticReportRenderer::new(sandbox, ReportTemplate::new(self.config.report.clone()))
            .with_settle(self.config.timing.report_settle())
            .with_load_timeout(self.config.timing.lifecycle_timing().load_timeout)
    }

    pub fn portal_renderer(&self) -> PortalRenderer {
        PortalRenderer::new(self.config.portal.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn submitted_jobs_flow_through_spawned_controller() {
        let service = PrintService::builder().build().expect("service");
        let sandbox = MemorySandbox::new();
        let handle = service.spawn(sandbox.clone());
        let dispatcher = service.dispatcher();
        dispatcher.submit(
            JobKind::Label,
            json!({
                "title": "생표고 1kg",
                "date": "2026-02-26",
                "producer": "관리자",
                "code": "B-001",
                "encodedValue": "HARVEST:B-001"
            }),
        );
        dispatcher.submit(
            JobKind::Report,
            json!({"title": "일일 접수 현황 보고서", "content": "===요약\n총 5건\n===상세\n항목별 내역"}),
        );
        drop(dispatcher);
        drop(service);

        let metrics = handle.await.expect("join");
        assert_eq!(metrics.printed, 2);
        let outputs = sandbox.outputs();
        let report = InspectedDocument::parse(&outputs[1].document.html);
        assert_eq!(report.texts(".section-title"), vec!["요약", "상세"]);
        assert_eq!(report.texts(".section-body"), vec!["총 5건", "항목별 내역"]);
        assert!(sandbox.attached().is_empty());
    }

    #[test]
    fn invalid_configuration_is_refused() {
        let mut config = PrintConfig::default();
        config.portal.blank_rows = 0;
        let err = PrintService::builder().config(config).build().err();
        assert!(matches!(err, Some(PrintError::InvalidConfiguration(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn report_renderer_uses_configured_settle() {
        let mut timing = TimingConfig::default();
        timing.report_settle_ms = 100;
        let service = PrintService::builder().timing(timing).build().expect("service");
        let sandbox = MemorySandbox::new();
        let started = tokio::time::Instant::now();
        service
            .report_renderer(sandbox.clone())
            .try_print("월간 요약", "총 12건")
            .await
            .expect("print");
        assert!(started.elapsed() < std::time::Duration::from_millis(105));
        assert_eq!(sandbox.outputs().len(), 1);
    }
}
