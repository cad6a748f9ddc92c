//! Turns a job plus its staged markup into a complete sandbox document.

use crate::config::{LabelConfig, PrintConfig};
use crate::error::PrintError;
use crate::escape::{escape_attr, escape_html};
use crate::job::{JobKind, JobPayload, LabelPayload, PrintJob, field_or_placeholder};
use crate::print_css;
use crate::report::ReportTemplate;
use crate::sandbox::{LoadSignal, Sandbox, SandboxContext, SandboxDocument};
use crate::staging::RenderedMarkup;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct SandboxBuilder {
    label: LabelConfig,
    report: ReportTemplate,
}

impl SandboxBuilder {
    pub fn new(label: LabelConfig, report: ReportTemplate) -> Self {
        Self { label, report }
    }

    pub fn from_config(config: &PrintConfig) -> Self {
        Self::new(config.label.clone(), ReportTemplate::new(config.report.clone()))
    }

    pub fn report_template(&self) -> &ReportTemplate {
        &self.report
    }

    /// Builds the document without touching any sandbox. Label jobs need the
    /// markup staged for that same job.
    pub fn compose(
        &self,
        job: &PrintJob,
        markup: Option<&RenderedMarkup>,
    ) -> Result<SandboxDocument, PrintError> {
        match &job.payload {
            JobPayload::Label(label) => {
                let markup = markup
                    .filter(|markup| markup.job == job.id)
                    .ok_or(PrintError::StagedMarkupMissing)?;
                let html = self.label_html(job, label, &markup.html)?;
                Ok(SandboxDocument {
                    kind: JobKind::Label,
                    title: field_or_placeholder(label.title.as_deref()).to_string(),
                    html,
                    page: self.label.page,
                    margins: self.label.margins,
                })
            }
            JobPayload::Report(report) => self.report.document(
                report.title.as_deref().unwrap_or_default(),
                report.content.as_deref().unwrap_or_default(),
            ),
        }
    }

    /// Composes the document and writes it into a fresh sandbox.
    pub fn build<S: Sandbox + ?Sized>(
        &self,
        sandbox: &mut S,
        job: &PrintJob,
        markup: Option<&RenderedMarkup>,
    ) -> Result<(SandboxContext, LoadSignal), PrintError> {
        let document = self.compose(job, markup)?;
        let opened = SandboxContext::open(sandbox, &document)?;
        debug!(job = %job.id, sandbox = %opened.0.id(), bytes = document.html.len(), "sandbox built");
        Ok(opened)
    }

    fn label_html(
        &self,
        job: &PrintJob,
        label: &LabelPayload,
        code_markup: &str,
    ) -> Result<String, PrintError> {
        let css = print_css::normalize(&print_css::label_stylesheet(&self.label))?;
        let captions = &self.label.captions;
        let row = |class: &str, field: &str, caption: &str, value: Option<&str>| {
            format!(
                "<div class=\"{class}\"><span class=\"data-label\">{}:</span><span class=\"data-value\" data-field=\"{field}\">{}</span></div>",
                escape_html(caption),
                escape_html(field_or_placeholder(value)),
            )
        };
        let badge = label
            .badge
            .as_deref()
            .map(|badge| format!("<div class=\"badge\">{}</div>", escape_html(badge)))
            .unwrap_or_default();
        let footer = self
            .label
            .footer
            .as_deref()
            .map(|footer| format!("<div class=\"footer\">{}</div>", escape_html(footer)))
            .unwrap_or_default();

        Ok(format!(
            r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
{css}
</style>
</head>
<body>
<div class="label-wrapper" data-job="{job}">
<div class="qr-section">
<div class="qr-box">{code_markup}</div>
{badge}
</div>
<div class="info-section">
{title_row}
{date_row}
{producer_row}
<div class="label-code" data-field="code">{code}</div>
{footer}
</div>
</div>
</body>
</html>
"#,
            title = escape_html(field_or_placeholder(label.title.as_deref())),
            job = escape_attr(&job.id.to_string()),
            title_row = row("data-row first", "title", &captions.title, label.title.as_deref()),
            date_row = row("data-row", "date", &captions.date, label.date.as_deref()),
            producer_row = row(
                "data-row",
                "producer",
                &captions.producer,
                label.producer.as_deref()
            ),
            code = escape_html(field_or_placeholder(label.code.as_deref())),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::InspectedDocument;
    use crate::job::{JobId, ReportPayload};
    use crate::sandbox::MemorySandbox;
    use crate::staging::StagingArea;
    use crate::types::{Margins, PageSize};
    use pretty_assertions::assert_eq;

    fn harvest_job(id: u64) -> PrintJob {
        PrintJob::new(
            JobId(id),
            JobPayload::Label(
                LabelPayload::default()
                    .with_title("생표고 1kg")
                    .with_date("2026-02-26")
                    .with_producer("마이셀륨 농장")
                    .with_code("B-001")
                    .with_encoded_value("HARVEST:B-001")
                    .with_badge("GAP 인증"),
            ),
        )
    }

    #[test]
    fn label_document_carries_fields_and_staged_code() {
        let job = harvest_job(1);
        let mut staging = StagingArea::default();
        staging.stage(&job).expect("stage");
        let builder = SandboxBuilder::default();
        let document = builder
            .compose(&job, staging.current_markup(job.id))
            .expect("compose");

        assert_eq!(document.kind, JobKind::Label);
        assert_eq!(document.page, PageSize::label_80x40());
        assert_eq!(document.margins, Margins::zero());

        let doc = InspectedDocument::parse(&document.html);
        assert_eq!(
            doc.texts(".data-value"),
            vec!["생표고 1kg", "2026-02-26", "마이셀륨 농장"]
        );
        assert_eq!(doc.texts(".label-code"), vec!["B-001"]);
        assert_eq!(doc.texts(".badge"), vec!["GAP 인증"]);
        assert_eq!(
            doc.attr(".code-image", "data-encoded-value").as_deref(),
            Some("HARVEST:B-001")
        );
        assert_eq!(doc.count(".qr-box svg"), 1);
        assert_eq!(doc.page_setup().size, Some(PageSize::label_80x40()));
    }

    #[test]
    fn missing_fields_render_placeholders() {
        let job = PrintJob::new(JobId(3), JobPayload::Label(LabelPayload::default()));
        let mut staging = StagingArea::default();
        staging.stage(&job).expect("stage");
        let document = SandboxBuilder::default()
            .compose(&job, staging.current_markup(job.id))
            .expect("compose");
        let doc = InspectedDocument::parse(&document.html);
        assert_eq!(doc.texts(".data-value"), vec!["-", "-", "-"]);
        assert_eq!(doc.texts(".label-code"), vec!["-"]);
        assert_eq!(doc.count(".badge"), 0);
        assert_eq!(doc.attr(".code-image", "data-encoded-value").as_deref(), Some("-"));
    }

    #[test]
    fn payload_text_is_escaped() {
        let job = PrintJob::new(
            JobId(4),
            JobPayload::Label(LabelPayload::default().with_title("<script>x</script>")),
        );
        let mut staging = StagingArea::default();
        staging.stage(&job).expect("stage");
        let document = SandboxBuilder::default()
            .compose(&job, staging.current_markup(job.id))
            .expect("compose");
        let doc = InspectedDocument::parse(&document.html);
        assert_eq!(doc.count("script"), 0);
        assert_eq!(doc.texts("[data-field=title]"), vec!["<script>x</script>"]);
    }

    #[test]
    fn markup_staged_for_another_job_is_refused() {
        let staged = harvest_job(1);
        let active = harvest_job(2);
        let mut staging = StagingArea::default();
        staging.stage(&staged).expect("stage");
        let builder = SandboxBuilder::default();
        let err = builder
            .compose(&active, staging.current_markup(staged.id))
            .expect_err("stale markup");
        assert!(matches!(err, PrintError::StagedMarkupMissing));
        assert!(matches!(
            builder.compose(&active, None),
            Err(PrintError::StagedMarkupMissing)
        ));
    }

    #[test]
    fn report_job_needs_no_markup() {
        let job = PrintJob::new(
            JobId(5),
            JobPayload::Report(ReportPayload::new("일일 접수 현황 보고서", "===요약\n총 5건")),
        );
        let document = SandboxBuilder::default().compose(&job, None).expect("compose");
        assert_eq!(document.kind, JobKind::Report);
        assert_eq!(document.page, PageSize::a4());
        let doc = InspectedDocument::parse(&document.html);
        assert_eq!(doc.texts(".section-title"), vec!["요약"]);
    }

    #[test]
    fn build_populates_a_sandbox() {
        let job = harvest_job(9);
        let mut staging = StagingArea::default();
        staging.stage(&job).expect("stage");
        let mut sandbox = MemorySandbox::new();
        let (context, _load) = SandboxBuilder::default()
            .build(&mut sandbox, &job, staging.current_markup(job.id))
            .expect("build");
        let document = sandbox.document(context.id()).expect("populated");
        assert_eq!(document.title, "생표고 1kg");
        assert!(sandbox.is_attached(context.id()));
    }
}
