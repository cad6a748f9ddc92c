//! Static reports: a title plus a pre-formatted content blob, printed in a
//! sandbox of their own without any staging step.

use crate::config::ReportConfig;
use crate::error::PrintError;
use crate::escape::escape_html;
use crate::job::{JobKind, field_or_placeholder};
use crate::print_css;
use crate::sandbox::{LoadSignal, Sandbox, SandboxContext, SandboxDocument, SandboxId};
use chrono::{Local, NaiveDateTime};
use isoprint_job_contract::SECTION_DELIMITER;
use std::time::Duration;
use tracing::{debug, error, info};

const REPORTED_ON_FORMAT: &str = "%Y. %m. %d. %H:%M";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSection {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportBody {
    /// Content without delimiters, passed through untouched.
    Opaque(String),
    Sectioned {
        preface: Option<String>,
        sections: Vec<ReportSection>,
    },
}

impl ReportBody {
    pub fn sections(&self) -> &[ReportSection] {
        match self {
            ReportBody::Opaque(_) => &[],
            ReportBody::Sectioned { sections, .. } => sections,
        }
    }
}

fn delimiter_name(line: &str) -> Option<&str> {
    line.trim_end_matches('\r').strip_prefix(SECTION_DELIMITER)
}

/// Splits `===Name` delimited content into named sections. The delimiter is
/// only recognised at the start of a line; text before the first delimiter
/// becomes the preface.
pub fn parse_sections(content: &str) -> ReportBody {
    if !content.lines().any(|line| delimiter_name(line).is_some()) {
        return ReportBody::Opaque(content.to_string());
    }

    let mut preface: Vec<&str> = Vec::new();
    let mut sections: Vec<ReportSection> = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in content.lines() {
        if let Some(name) = delimiter_name(line) {
            if let Some((title, body)) = current.take() {
                push_section(&mut sections, title, &body);
            }
            current = Some((name.trim().to_string(), Vec::new()));
            continue;
        }
        match current.as_mut() {
            Some((_, body)) => body.push(line),
            None => preface.push(line),
        }
    }
    if let Some((title, body)) = current.take() {
        push_section(&mut sections, title, &body);
    }

    let preface = preface.join("\n");
    let preface = preface.trim();
    ReportBody::Sectioned {
        preface: (!preface.is_empty()).then(|| preface.to_string()),
        sections,
    }
}

fn push_section(sections: &mut Vec<ReportSection>, title: String, body: &[&str]) {
    let body = body.join("\n").trim().to_string();
    if title.is_empty() && body.is_empty() {
        return;
    }
    sections.push(ReportSection { title, body });
}

fn render_body(body: &ReportBody) -> String {
    match body {
        ReportBody::Opaque(content) => format!("<div class=\"p-block\">{content}</div>"),
        ReportBody::Sectioned { preface, sections } => {
            let mut out = String::new();
            if let Some(preface) = preface {
                out.push_str(&format!("<div class=\"p-preface\">{preface}</div>"));
            }
            for section in sections {
                out.push_str("<div class=\"p-section\">");
                if !section.title.is_empty() {
                    out.push_str(&format!(
                        "<h2 class=\"section-title\">{}</h2>",
                        escape_html(&section.title)
                    ));
                }
                out.push_str(&format!(
                    "<div class=\"section-body\">{}</div></div>",
                    section.body
                ));
            }
            out
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReportTemplate {
    config: ReportConfig,
    reported_at: Option<NaiveDateTime>,
}

impl ReportTemplate {
    pub fn new(config: ReportConfig) -> Self {
        Self {
            config,
            reported_at: None,
        }
    }

    /// Pins the "reported on" stamp instead of reading the local clock.
    pub fn with_reported_at(mut self, reported_at: NaiveDateTime) -> Self {
        self.reported_at = Some(reported_at);
        self
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    pub fn render(&self, title: &str, content: &str) -> Result<String, PrintError> {
        let css = print_css::normalize(&print_css::report_stylesheet(&self.config))?;
        let reported_at = self
            .reported_at
            .unwrap_or_else(|| Local::now().naive_local())
            .format(REPORTED_ON_FORMAT);
        let title = escape_html(field_or_placeholder(Some(title)));
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
<div class="print-header">
<h1>{title}</h1>
<div class="date">REPORTED ON {reported_at}</div>
</div>
<div class="content">{body}</div>
<div class="footer">{footer}</div>
</body>
</html>
"#,
            body = render_body(&parse_sections(content)),
            footer = escape_html(&self.config.footer),
        ))
    }

    pub fn document(&self, title: &str, content: &str) -> Result<SandboxDocument, PrintError> {
        Ok(SandboxDocument {
            kind: JobKind::Report,
            title: field_or_placeholder(Some(title)).to_string(),
            html: self.render(title, content)?,
            page: self.config.page,
            margins: self.config.margins,
        })
    }
}

/// Prints ad-hoc reports. The sandbox is torn down right after the print
/// call is issued; no completion signal is awaited.
pub struct StaticReportRenderer<S: Sandbox> {
    sandbox: S,
    template: ReportTemplate,
    settle: Duration,
    load_timeout: Duration,
}

impl<S: Sandbox> StaticReportRenderer<S> {
    pub fn new(sandbox: S, template: ReportTemplate) -> Self {
        Self {
            sandbox,
            template,
            settle: Duration::from_millis(800),
            load_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_load_timeout(mut self, load_timeout: Duration) -> Self {
        self.load_timeout = load_timeout;
        self
    }

    pub fn sandbox(&self) -> &S {
        &self.sandbox
    }

    /// Fire and forget: failures are logged and the report is dropped.
    pub async fn print(&mut self, title: &str, content: &str) {
        if let Err(err) = self.try_print(title, content).await {
            error!(title, error = %err, "static report print failed");
        }
    }

    pub async fn try_print(&mut self, title: &str, content: &str) -> Result<SandboxId, PrintError> {
        let document = self.template.document(title, content)?;
        let (mut context, load) = SandboxContext::open(&mut self.sandbox, &document)?;
        let id = context.id();
        let outcome = self.trigger_after_settle(&mut context, load).await;
        context.teardown(&mut self.sandbox);
        outcome?;
        info!(sandbox = %id, title = %document.title, "static report sent to print");
        Ok(id)
    }

    async fn trigger_after_settle(
        &mut self,
        context: &mut SandboxContext,
        load: LoadSignal,
    ) -> Result<(), PrintError> {
        load.wait(self.load_timeout).await?;
        debug!(sandbox = %context.id(), settle_ms = self.settle.as_millis() as u64, "report settling");
        tokio::time::sleep(self.settle).await;
        context.trigger_output(&mut self.sandbox)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::InspectedDocument;
    use crate::sandbox::{MemorySandbox, SandboxEvent};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use tokio::time::Instant;

    fn template() -> ReportTemplate {
        let stamp = NaiveDate::from_ymd_opt(2026, 2, 26)
            .and_then(|d| d.and_hms_opt(9, 30, 0))
            .expect("valid stamp");
        ReportTemplate::new(ReportConfig {
            font_import: None,
            ..ReportConfig::default()
        })
        .with_reported_at(stamp)
    }

    #[test]
    fn two_delimiters_yield_two_sections_in_order() {
        let body = parse_sections("===요약\n총 5건\n===상세\n항목별 내역");
        assert_eq!(
            body,
            ReportBody::Sectioned {
                preface: None,
                sections: vec![
                    ReportSection {
                        title: "요약".to_string(),
                        body: "총 5건".to_string(),
                    },
                    ReportSection {
                        title: "상세".to_string(),
                        body: "항목별 내역".to_string(),
                    },
                ],
            }
        );
    }

    #[test]
    fn content_without_delimiters_is_opaque() {
        let content = "<table><tr><td>총 5건</td></tr></table>\n비고 없음";
        assert_eq!(parse_sections(content), ReportBody::Opaque(content.to_string()));
    }

    #[test]
    fn delimiter_must_open_a_line() {
        let content = "합계 === 5건";
        assert_eq!(parse_sections(content), ReportBody::Opaque(content.to_string()));
    }

    #[test]
    fn text_before_first_delimiter_becomes_preface() {
        let body = parse_sections("머리말\n\n===A\r\nbody a\n===\n\n===B");
        let ReportBody::Sectioned { preface, sections } = body else {
            panic!("expected sections");
        };
        assert_eq!(preface.as_deref(), Some("머리말"));
        let titles: Vec<&str> = sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B"]);
        assert_eq!(sections[0].body, "body a");
        assert_eq!(sections[1].body, "");
    }

    #[test]
    fn rendered_report_carries_sections_and_stamp() {
        let html = template()
            .render("일일 접수 현황 보고서", "===요약\n총 5건\n===상세\n항목별 내역")
            .expect("render");
        let doc = InspectedDocument::parse(&html);
        assert_eq!(doc.texts("h1"), vec!["일일 접수 현황 보고서"]);
        assert_eq!(doc.texts(".section-title"), vec!["요약", "상세"]);
        assert_eq!(doc.texts(".section-body"), vec!["총 5건", "항목별 내역"]);
        assert_eq!(doc.texts(".date"), vec!["REPORTED ON 2026. 02. 26. 09:30"]);
        let setup = doc.page_setup();
        assert_eq!(setup.size, Some(crate::types::PageSize::a4()));
    }

    #[test]
    fn opaque_content_is_a_single_unlabeled_block() {
        let html = template().render("월간 요약", "총 12건 처리").expect("render");
        let doc = InspectedDocument::parse(&html);
        assert_eq!(doc.count(".p-section"), 0);
        assert_eq!(doc.texts(".p-block"), vec!["총 12건 처리"]);
    }

    #[test]
    fn section_titles_are_escaped_but_bodies_keep_markup() {
        let html = template()
            .render("t", "===<b>A</b>\n<table><tr><td>1</td></tr></table>")
            .expect("render");
        let doc = InspectedDocument::parse(&html);
        assert_eq!(doc.texts(".section-title"), vec!["<b>A</b>"]);
        assert_eq!(doc.count(".section-body td"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn static_print_settles_then_tears_down_immediately() {
        let sandbox = MemorySandbox::new();
        let mut renderer = StaticReportRenderer::new(sandbox.clone(), template());
        let started = Instant::now();
        let id = renderer
            .try_print("일일 접수 현황 보고서", "총 5건")
            .await
            .expect("print");
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(800) && elapsed < Duration::from_millis(805));
        assert_eq!(
            sandbox.events(),
            vec![
                SandboxEvent::Created(id),
                SandboxEvent::Populated(id),
                SandboxEvent::OutputTriggered(id),
                SandboxEvent::Destroyed(id),
            ]
        );
        assert_eq!(sandbox.outputs().len(), 1);
        assert!(sandbox.attached().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn refused_sandbox_is_swallowed_by_print() {
        let sandbox = MemorySandbox::new();
        sandbox.fail_next_create();
        let mut renderer = StaticReportRenderer::new(sandbox.clone(), template());
        renderer.print("t", "c").await;
        assert!(sandbox.outputs().is_empty());
        assert!(sandbox.attached().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn load_timeout_still_tears_down() {
        let sandbox = MemorySandbox::new().with_held_loads(true);
        let mut renderer = StaticReportRenderer::new(sandbox.clone(), template())
            .with_load_timeout(Duration::from_millis(200));
        let err = renderer.try_print("t", "c").await.expect_err("never loads");
        assert!(matches!(err, PrintError::LoadTimedOut));
        assert!(sandbox.outputs().is_empty());
        assert!(sandbox.attached().is_empty());
    }
}
