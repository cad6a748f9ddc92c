//! Off-screen staging of markup the sandbox cannot produce on its own.
//!
//! The sandbox only receives a finished HTML string, so any sub-element that
//! needs real rendering logic (today the scannable code on labels) is
//! rendered here first. Exactly one job's markup is held at a time and the
//! slot is keyed by job identity: a reader asking for a job that is no longer
//! staged gets nothing instead of another job's markup.

use crate::config::{CodeErrorCorrection, LabelConfig};
use crate::error::PrintError;
use crate::escape::escape_attr;
use crate::job::{JobId, JobPayload, PrintJob};
use qrcode::render::svg;
use qrcode::{EcLevel, QrCode};
use tracing::debug;

pub trait CodeRenderer: Send + Sync {
    /// Renders `value` as a standalone `<svg>` element.
    fn render_svg(&self, value: &str) -> Result<String, PrintError>;
}

#[derive(Debug, Clone)]
pub struct QrCodeRenderer {
    size_px: u32,
    level: EcLevel,
}

impl QrCodeRenderer {
    pub fn new(size_px: u32, correction: CodeErrorCorrection) -> Self {
        let level = match correction {
            CodeErrorCorrection::L => EcLevel::L,
            CodeErrorCorrection::M => EcLevel::M,
            CodeErrorCorrection::Q => EcLevel::Q,
            CodeErrorCorrection::H => EcLevel::H,
        };
        Self { size_px, level }
    }

    pub fn from_config(config: &LabelConfig) -> Self {
        Self::new(config.code_size_px, config.error_correction)
    }
}

impl Default for QrCodeRenderer {
    fn default() -> Self {
        Self::from_config(&LabelConfig::default())
    }
}

impl CodeRenderer for QrCodeRenderer {
    fn render_svg(&self, value: &str) -> Result<String, PrintError> {
        let code = QrCode::with_error_correction_level(value.as_bytes(), self.level)
            .map_err(|err| PrintError::Staging(format!("cannot encode {value:?}: {err}")))?;
        let xml = code
            .render::<svg::Color>()
            .min_dimensions(self.size_px, self.size_px)
            .dark_color(svg::Color("#000000"))
            .light_color(svg::Color("#ffffff"))
            .build();
        // The renderer emits a standalone XML document; HTML wants the element.
        match xml.find("<svg") {
            Some(start) => Ok(xml[start..].to_string()),
            None => Err(PrintError::Staging("renderer produced no svg element".to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMarkup {
    pub job: JobId,
    pub html: String,
    pub width_px: Option<u32>,
    pub height_px: Option<u32>,
}

impl RenderedMarkup {
    pub fn is_empty(&self) -> bool {
        self.html.is_empty()
    }
}

pub struct StagingArea {
    renderer: Box<dyn CodeRenderer>,
    slot: Option<RenderedMarkup>,
}

impl StagingArea {
    pub fn new(renderer: impl CodeRenderer + 'static) -> Self {
        Self {
            renderer: Box::new(renderer),
            slot: None,
        }
    }

    /// Renders everything `job` needs and replaces whatever was staged.
    pub fn stage(&mut self, job: &PrintJob) -> Result<(), PrintError> {
        if let Some(previous) = self.slot.take() {
            if previous.job != job.id {
                debug!(previous = %previous.job, job = %job.id, "discarding staged markup");
            }
        }
        let markup = match &job.payload {
            JobPayload::Label(label) => {
                let value = label.scannable_value();
                let svg = self.renderer.render_svg(value)?;
                let (width_px, height_px) = verify_svg(&svg)?;
                RenderedMarkup {
                    job: job.id,
                    html: format!(
                        "<div class=\"code-image\" data-encoded-value=\"{}\">{}</div>",
                        escape_attr(value),
                        svg
                    ),
                    width_px,
                    height_px,
                }
            }
            JobPayload::Report(_) => RenderedMarkup {
                job: job.id,
                html: String::new(),
                width_px: None,
                height_px: None,
            },
        };
        debug!(job = %job.id, bytes = markup.html.len(), "markup staged");
        self.slot = Some(markup);
        Ok(())
    }

    pub fn current_markup(&self, job: JobId) -> Option<&RenderedMarkup> {
        self.slot.as_ref().filter(|markup| markup.job == job)
    }

    pub fn staged_job(&self) -> Option<JobId> {
        self.slot.as_ref().map(|markup| markup.job)
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }
}

impl Default for StagingArea {
    fn default() -> Self {
        Self::new(QrCodeRenderer::default())
    }
}

/// Checks that `markup` is a single well-formed `<svg>` element and returns
/// its declared pixel dimensions.
pub fn verify_svg(markup: &str) -> Result<(Option<u32>, Option<u32>), PrintError> {
    let doc = roxmltree::Document::parse(markup)
        .map_err(|err| PrintError::Staging(format!("staged svg is malformed: {err}")))?;
    let root = doc.root_element();
    if !root.tag_name().name().eq_ignore_ascii_case("svg") {
        return Err(PrintError::Staging(format!(
            "staged markup root is <{}>, expected <svg>",
            root.tag_name().name()
        )));
    }
    let dimension = |name: &str| {
        root.attribute(name)
            .map(|raw| raw.trim().trim_end_matches("px"))
            .and_then(|raw| raw.parse::<f32>().ok())
            .map(|value| value.round() as u32)
    };
    Ok((dimension("width"), dimension("height")))
}
