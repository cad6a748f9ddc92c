use crate::error::PrintError;
use crate::lifecycle::{LifecycleTiming, OverlapPolicy, SettleMode};
use crate::portal::FarmProfile;
use crate::types::{Margins, PageSize};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_REPORT_FONT_IMPORT: &str =
    "https://cdn.jsdelivr.net/gh/orioncactus/pretendard/dist/web/static/pretendard.css";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintConfig {
    pub timing: TimingConfig,
    pub label: LabelConfig,
    pub report: ReportConfig,
    pub portal: PortalConfig,
}

impl PrintConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, PrintError> {
        let config: PrintConfig = serde_json::from_str(raw)
            .map_err(|err| PrintError::InvalidConfiguration(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PrintError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_label(mut self, label: LabelConfig) -> Self {
        self.label = label;
        self
    }

    pub fn with_report(mut self, report: ReportConfig) -> Self {
        self.report = report;
        self
    }

    pub fn with_portal(mut self, portal: PortalConfig) -> Self {
        self.portal = portal;
        self
    }

    pub fn validate(&self) -> Result<(), PrintError> {
        for (name, page) in [
            ("label.page", self.label.page),
            ("report.page", self.report.page),
            ("portal.page", self.portal.page),
        ] {
            if page.is_empty() {
                return Err(PrintError::InvalidConfiguration(format!(
                    "{name} must have a positive width and height"
                )));
            }
        }
        if self.label.code_size_px == 0 {
            return Err(PrintError::InvalidConfiguration(
                "label.code_size_px must be positive".to_string(),
            ));
        }
        if self.portal.blank_rows == 0 {
            return Err(PrintError::InvalidConfiguration(
                "portal.blank_rows must be positive".to_string(),
            ));
        }
        if self.portal.node_id.trim().is_empty() {
            return Err(PrintError::InvalidConfiguration(
                "portal.node_id must not be empty".to_string(),
            ));
        }
        if self.timing.load_timeout_ms == 0 {
            return Err(PrintError::InvalidConfiguration(
                "timing.load_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Delays in milliseconds. The defaults are the settle times the print
/// pipeline has always used; none of them is confirmed by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub stage_settle_ms: u64,
    pub load_timeout_ms: u64,
    pub print_settle_ms: u64,
    pub teardown_grace_ms: u64,
    pub report_settle_ms: u64,
    pub mode: SettleMode,
    pub overlap: OverlapPolicy,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            stage_settle_ms: 300,
            load_timeout_ms: 5_000,
            print_settle_ms: 500,
            teardown_grace_ms: 3_000,
            report_settle_ms: 800,
            mode: SettleMode::FixedDelay,
            overlap: OverlapPolicy::Queue,
        }
    }
}

impl TimingConfig {
    pub fn lifecycle_timing(&self) -> LifecycleTiming {
        LifecycleTiming {
            stage_settle: Duration::from_millis(self.stage_settle_ms),
            load_timeout: Duration::from_millis(self.load_timeout_ms),
            print_settle: Duration::from_millis(self.print_settle_ms),
            teardown_grace: Duration::from_millis(self.teardown_grace_ms),
            mode: self.mode,
        }
    }

    pub fn report_settle(&self) -> Duration {
        Duration::from_millis(self.report_settle_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CodeErrorCorrection {
    L,
    #[default]
    M,
    Q,
    H,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelCaptions {
    pub title: String,
    pub date: String,
    pub producer: String,
}

impl Default for LabelCaptions {
    fn default() -> Self {
        Self {
            title: "품명".to_string(),
            date: "생산일".to_string(),
            producer: "생산자".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    pub page: PageSize,
    pub margins: Margins,
    pub code_size_px: u32,
    pub error_correction: CodeErrorCorrection,
    pub captions: LabelCaptions,
    pub footer: Option<String>,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            page: PageSize::label_80x40(),
            margins: Margins::zero(),
            code_size_px: 120,
            error_correction: CodeErrorCorrection::M,
            captions: LabelCaptions::default(),
            footer: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub page: PageSize,
    pub margins: Margins,
    /// Remote stylesheet for the decorative face. Layout never depends on it.
    pub font_import: Option<String>,
    pub font_family: String,
    pub accent_color: String,
    pub footer: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            page: PageSize::a4(),
            margins: Margins::symmetric(25.0, 20.0),
            font_import: Some(DEFAULT_REPORT_FONT_IMPORT.to_string()),
            font_family: "'Pretendard', -apple-system, sans-serif".to_string(),
            accent_color: "#4f46e5".to_string(),
            footer: "본 리포트는 시스템에 의해 자동 생성된 문서입니다.".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub page: PageSize,
    pub margins: Margins,
    pub blank_rows: usize,
    pub include_attachments: bool,
    pub node_id: String,
    pub farm: FarmProfile,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            page: PageSize::a4(),
            margins: Margins::all(15.0),
            blank_rows: 15,
            include_attachments: true,
            node_id: "printable-report".to_string(),
            farm: FarmProfile::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Mm;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_print_media() {
        let config = PrintConfig::default();
        assert_eq!(config.label.page, PageSize::label_80x40());
        assert_eq!(config.label.margins, Margins::zero());
        assert_eq!(config.report.page, PageSize::a4());
        assert_eq!(config.report.margins.top, Mm::new(25.0));
        assert_eq!(config.portal.blank_rows, 15);
        assert_eq!(config.timing.stage_settle_ms, 300);
        assert_eq!(config.timing.teardown_grace_ms, 3_000);
        config.validate().expect("defaults validate");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = PrintConfig::from_json_str(
            r#"{"timing": {"teardown_grace_ms": 1200, "mode": "Signal"}, "portal": {"blank_rows": 20}}"#,
        )
        .expect("parse config");
        assert_eq!(config.timing.teardown_grace_ms, 1200);
        assert_eq!(config.timing.stage_settle_ms, 300);
        assert_eq!(config.timing.mode, SettleMode::Signal);
        assert_eq!(config.portal.blank_rows, 20);
        assert_eq!(config.label.code_size_px, 120);
    }

    #[test]
    fn rejects_degenerate_values() {
        let err = PrintConfig::from_json_str(r#"{"portal": {"blank_rows": 0}}"#)
            .expect_err("zero blank rows");
        assert!(matches!(err, PrintError::InvalidConfiguration(_)));

        let err = PrintConfig::from_json_str(r#"{"label": {"page": {"width": 0, "height": 40}}}"#)
            .expect_err("zero width");
        assert!(err.to_string().contains("label.page"));

        let err = PrintConfig::from_json_str("{not json").expect_err("syntax");
        assert!(matches!(err, PrintError::InvalidConfiguration(_)));
    }

    #[test]
    fn timing_converts_to_durations() {
        let timing = TimingConfig::default().lifecycle_timing();
        assert_eq!(timing.stage_settle, Duration::from_millis(300));
        assert_eq!(timing.print_settle, Duration::from_millis(500));
        assert_eq!(TimingConfig::default().report_settle(), Duration::from_millis(800));
    }
}
