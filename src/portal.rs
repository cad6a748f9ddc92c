//! In-place compliance report.
//!
//! The report is rendered into an out-of-flow node of the live document and
//! printed from there. Whether the rest of the document is printed is decided
//! by one presentation flag on the [`AppRoot`]; the print stylesheet only
//! reacts to that flag.

use crate::assets::{AssetResolver, ImageRef, ResolvedImage};
use crate::config::PortalConfig;
use crate::error::PrintError;
use crate::escape::{escape_attr, escape_html};
use crate::print_css::{self, PRESENTATION_ATTR};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

pub const REPORT_TITLE: &str = "영농기록장 (농산물 우수관리 GAP)";
const ATTACHMENTS_TITLE: &str = "[별첨] 현장 증빙 자료 (GAP/HACCP 인증용)";
const SIGNATURE_LINE: &str = "확인자: ____________________________________ (인)";
const LOG_COLUMNS: [&str; 6] = [
    "월/일",
    "작업단계/종류",
    "작업 내용 및 특이사항",
    "투입 자재/환경 데이터",
    "작업자",
    "확인",
];

fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(text)) if !text.trim().is_empty() => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        Some(Value::Bool(flag)) => Some(flag.to_string()),
        _ => None,
    })
}

/// Accepts a list, skipping entries of the wrong shape; anything that is not
/// a list reads as empty.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

/// Reads an object field; any other shape reads as absent.
fn lenient_object<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(value @ Value::Object(_)) => serde_json::from_value(value).ok(),
        _ => None,
    })
}

/// Every entry becomes an attachment, even one that is not an object or
/// whose fields cannot be read, so gallery positions stay aligned with the
/// backend's list.
fn lenient_attachments<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<AttachmentInput>, D::Error> {
    let Some(Value::Array(items)) = Option::<Value>::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .enumerate()
        .map(|(position, item)| match item {
            Value::Object(_) => serde_json::from_value(item).unwrap_or_else(|err| {
                warn!(position, error = %err, "attachment entry unreadable; kept as blank photo");
                AttachmentInput::default()
            }),
            other => {
                warn!(position, entry = %other, "attachment entry is not an object; kept as blank photo");
                AttachmentInput::default()
            }
        })
        .collect())
}

fn lenient_category<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<AttachmentCategory, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(kind)) if kind == "receipt" => AttachmentCategory::Receipt,
        _ => AttachmentCategory::Photo,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Material {
    #[serde(deserialize_with = "lenient_text")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub quantity: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvReadings {
    #[serde(deserialize_with = "lenient_text")]
    pub temp: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub humidity: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub co2: Option<String>,
}

impl EnvReadings {
    /// CO2 alone is not worth a block; it is only listed next to
    /// temperature or humidity.
    pub fn is_reported(&self) -> bool {
        self.temp.is_some() || self.humidity.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentCategory {
    Receipt,
    #[default]
    #[serde(other)]
    Photo,
}

impl AttachmentCategory {
    pub fn caption(&self) -> &'static str {
        match self {
            AttachmentCategory::Receipt => "영수증",
            AttachmentCategory::Photo => "현장사진",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentInput {
    #[serde(deserialize_with = "lenient_text")]
    pub label: Option<String>,
    /// Storage path as recorded by the backend, shown when the image is
    /// unavailable.
    #[serde(deserialize_with = "lenient_text")]
    pub path: Option<String>,
    #[serde(rename = "type", deserialize_with = "lenient_category")]
    pub category: AttachmentCategory,
    #[serde(alias = "resolvedPath", deserialize_with = "lenient_text")]
    pub resolved_path: Option<String>,
}

impl AttachmentInput {
    pub fn image(&self) -> ImageRef {
        ImageRef::from_location(self.resolved_path.as_deref())
    }
}

/// One work log entry as delivered by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogRecord {
    #[serde(alias = "log_date", deserialize_with = "lenient_text")]
    pub date: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub work_type: Option<String>,
    #[serde(alias = "work_content", deserialize_with = "lenient_text")]
    pub content: Option<String>,
    #[serde(alias = "input_materials", deserialize_with = "lenient_list")]
    pub materials: Vec<Material>,
    #[serde(alias = "env_data", deserialize_with = "lenient_object")]
    pub environment: Option<EnvReadings>,
    #[serde(alias = "worker_name", deserialize_with = "lenient_text")]
    pub worker: Option<String>,
    #[serde(alias = "photos", deserialize_with = "lenient_attachments")]
    pub attachments: Vec<AttachmentInput>,
}

/// Static header metadata printed above the log table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FarmProfile {
    pub facility: String,
    pub crops: String,
    #[serde(alias = "representative_name")]
    pub farmer: String,
    pub address: String,
    pub company_name: String,
}

impl Default for FarmProfile {
    fn default() -> Self {
        Self {
            facility: "본사 재배동 및 부속 필지".to_string(),
            crops: "표고버섯, 송고버섯".to_string(),
            farmer: "관리자".to_string(),
            address: "농장 주소".to_string(),
            company_name: "마이셀륨 농업회사법인".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRow {
    pub date: Option<NaiveDate>,
    pub raw_date: Option<String>,
    pub work_type: Option<String>,
    pub content: Option<String>,
    pub materials: Vec<Material>,
    pub environment: EnvReadings,
    pub worker: Option<String>,
    /// Labels of the attachments filed with this entry.
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSection {
    pub header: Option<String>,
    pub rows: Vec<LogRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub label: String,
    pub captured_date: Option<NaiveDate>,
    pub category: AttachmentCategory,
    pub image: ImageRef,
    pub path: Option<String>,
    /// Index of the originating record and position within its list.
    pub record: usize,
    pub position: usize,
    pub work_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportDocument {
    pub title: String,
    pub farm: FarmProfile,
    pub sections: Vec<LogSection>,
    pub attachments: Vec<Attachment>,
}

impl ReportDocument {
    /// One log section with a row per record, plus every record's
    /// attachments flattened in (record, position) order.
    pub fn from_records(records: &[LogRecord], farm: FarmProfile) -> Self {
        let mut rows = Vec::with_capacity(records.len());
        let mut attachments = Vec::new();
        for (record_index, record) in records.iter().enumerate() {
            let date = record.date.as_deref().and_then(parse_log_date);
            for (position, input) in record.attachments.iter().enumerate() {
                attachments.push(Attachment {
                    label: input.label.clone().unwrap_or_default(),
                    captured_date: date,
                    category: input.category,
                    image: input.image(),
                    path: input.path.clone(),
                    record: record_index,
                    position,
                    work_type: record.work_type.clone(),
                });
            }
            rows.push(LogRow {
                date,
                raw_date: record.date.clone(),
                work_type: record.work_type.clone(),
                content: record.content.clone(),
                materials: record.materials.clone(),
                environment: record.environment.clone().unwrap_or_default(),
                worker: record.worker.clone(),
                evidence: record
                    .attachments
                    .iter()
                    .map(|input| input.label.clone().unwrap_or_default())
                    .collect(),
            });
        }
        debug!(rows = rows.len(), attachments = attachments.len(), "report document assembled");
        Self {
            title: REPORT_TITLE.to_string(),
            farm,
            sections: vec![LogSection { header: None, rows }],
            attachments,
        }
    }

    pub fn from_json(records: &Value, farm: FarmProfile) -> Result<Self, PrintError> {
        let records: Vec<LogRecord> = serde_json::from_value(records.clone())
            .map_err(|err| PrintError::Payload(format!("log records: {err}")))?;
        Ok(Self::from_records(&records, farm))
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn row_count(&self) -> usize {
        self.sections.iter().map(|section| section.rows.len()).sum()
    }
}

/// Dates arrive as plain dates or full timestamps.
fn parse_log_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(stamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(stamp.date_naive());
    }
    if let Ok(stamp) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(stamp.date());
    }
    raw.get(..10)
        .and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok())
}

#[derive(Debug, Clone, Default)]
pub struct PortalRenderer {
    config: PortalConfig,
    resolver: AssetResolver,
}

impl PortalRenderer {
    pub fn new(config: PortalConfig) -> Self {
        Self {
            config,
            resolver: AssetResolver::default(),
        }
    }

    pub fn with_resolver(mut self, resolver: AssetResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    /// Inner markup of the out-of-flow report node.
    pub fn render(&self, doc: &ReportDocument) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "<div class=\"report-title\"><h1>{}</h1></div>",
            escape_html(&doc.title)
        ));
        out.push_str(&farm_info(&doc.farm));
        for section in &doc.sections {
            out.push_str(&self.log_table(section));
        }
        out.push_str(&format!(
            "<div class=\"signature\">{SIGNATURE_LINE}</div><div class=\"company\">{}</div>",
            escape_html(&doc.farm.company_name)
        ));
        if self.config.include_attachments && !doc.attachments.is_empty() {
            out.push_str(&self.gallery(&doc.attachments));
        }
        out
    }

    /// Renders `doc` into the root's report node, replacing a previous one.
    pub fn mount(&self, root: &mut AppRoot, doc: &ReportDocument) -> Result<(), PrintError> {
        root.add_stylesheet(print_css::normalize(&print_css::portal_stylesheet(&self.config))?);
        root.mount_out_of_flow(&self.config.node_id, self.render(doc));
        info!(
            node = %self.config.node_id,
            rows = doc.row_count(),
            attachments = doc.attachments.len(),
            "report mounted"
        );
        Ok(())
    }

    pub fn enter_print_mode(&self, root: &mut AppRoot) -> Result<(), PrintError> {
        if root.node(&self.config.node_id).is_none() {
            return Err(PrintError::NodeNotMounted(self.config.node_id.clone()));
        }
        root.set_mode(PresentationMode::Print {
            node: self.config.node_id.clone(),
        });
        Ok(())
    }

    pub fn exit_print_mode(&self, root: &mut AppRoot) {
        root.set_mode(PresentationMode::Interactive);
    }

    /// Mounts the report, switches to print mode for the duration of
    /// `output`, then hides the report again.
    pub fn print_with<R>(
        &self,
        root: &mut AppRoot,
        doc: &ReportDocument,
        output: impl FnOnce(&AppRoot) -> R,
    ) -> Result<R, PrintError> {
        self.mount(root, doc)?;
        self.enter_print_mode(root)?;
        let result = output(root);
        self.exit_print_mode(root);
        Ok(result)
    }

    fn log_table(&self, section: &LogSection) -> String {
        let mut out = String::new();
        if let Some(header) = &section.header {
            out.push_str(&format!("<h3 class=\"section-header\">{}</h3>", escape_html(header)));
        }
        out.push_str("<table class=\"log-table\"><thead><tr>");
        for column in LOG_COLUMNS {
            out.push_str(&format!("<th>{column}</th>"));
        }
        out.push_str("</tr></thead><tbody>");
        if section.rows.is_empty() {
            for _ in 0..self.config.blank_rows {
                out.push_str("<tr class=\"blank\">");
                out.push_str(&"<td></td>".repeat(LOG_COLUMNS.len()));
                out.push_str("</tr>");
            }
        } else {
            for row in &section.rows {
                out.push_str(&self.log_row(row));
            }
        }
        out.push_str("</tbody></table>");
        out
    }

    fn log_row(&self, row: &LogRow) -> String {
        let date = match (row.date, &row.raw_date) {
            (Some(date), _) => date.format("%m / %d").to_string(),
            (None, Some(raw)) => escape_html(raw),
            (None, None) => String::new(),
        };
        let mut content = escape_html(row.content.as_deref().unwrap_or_default());
        if self.config.include_attachments && !row.evidence.is_empty() {
            content.push_str(&format!(
                "<div class=\"evidence-note\">[증빙: {}]</div>",
                escape_html(&row.evidence.join(", "))
            ));
        }
        format!(
            "<tr class=\"log-row\"><td class=\"date\">{date}</td><td class=\"work-type\">{}</td><td class=\"work-content\">{content}</td><td class=\"inputs\">{}</td><td class=\"worker\">{}</td><td class=\"check\"><div class=\"check-circle\"></div></td></tr>",
            escape_html(row.work_type.as_deref().unwrap_or_default()),
            inputs_cell(row),
            escape_html(row.worker.as_deref().unwrap_or_default()),
        )
    }

    fn gallery(&self, attachments: &[Attachment]) -> String {
        let images: Vec<ImageRef> = attachments.iter().map(|a| a.image.clone()).collect();
        let resolved = self.resolver.resolve_all(&images);
        let mut out = format!(
            "<div class=\"attachments page-break-before\"><h2 class=\"attachments-title\">{ATTACHMENTS_TITLE}</h2>"
        );
        let items: Vec<(&Attachment, &ResolvedImage)> =
            attachments.iter().zip(resolved.iter()).collect();
        for pair in items.chunks(2) {
            out.push_str("<div class=\"gallery-row\">");
            for (attachment, image) in pair {
                out.push_str(&gallery_item(attachment, image));
            }
            out.push_str("</div>");
        }
        out.push_str("</div>");
        out
    }
}

fn farm_info(farm: &FarmProfile) -> String {
    format!(
        "<table class=\"farm-info\"><tr><th>포장명/시설명</th><td colspan=\"3\">{}</td></tr><tr><th>재배 작물</th><td colspan=\"3\">{}</td></tr><tr><th>농업인 성명</th><td>{}</td><th>농장 소재지</th><td>{}</td></tr></table>",
        escape_html(&farm.facility),
        escape_html(&farm.crops),
        escape_html(&farm.farmer),
        escape_html(&farm.address),
    )
}

fn inputs_cell(row: &LogRow) -> String {
    let mut out = String::new();
    if !row.materials.is_empty() {
        out.push_str("<div class=\"materials\"><div class=\"sub-heading\">[투입자재]</div>");
        for material in &row.materials {
            out.push_str(&format!(
                "<div class=\"material\">• {}: {}{}</div>",
                escape_html(material.name.as_deref().unwrap_or_default()),
                escape_html(material.quantity.as_deref().unwrap_or_default()),
                escape_html(material.unit.as_deref().unwrap_or_default()),
            ));
        }
        out.push_str("</div>");
    }
    let env = &row.environment;
    if env.is_reported() {
        out.push_str("<div class=\"environment\"><div class=\"sub-heading\">[환경데이터]</div>");
        for (caption, value, unit) in [
            ("온도", &env.temp, "°C"),
            ("습도", &env.humidity, "%"),
            ("CO2", &env.co2, "ppm"),
        ] {
            if let Some(value) = value {
                out.push_str(&format!(
                    "<div class=\"reading\">• {caption}: {}{unit}</div>",
                    escape_html(value)
                ));
            }
        }
        out.push_str("</div>");
    }
    out
}

fn gallery_item(attachment: &Attachment, image: &ResolvedImage) -> String {
    let date = attachment
        .captured_date
        .map(|date| date.format("%Y. %m. %d").to_string())
        .unwrap_or_default();
    let body = match image.src() {
        Some(src) => format!(
            "<img src=\"{}\" alt=\"{}\">",
            escape_attr(src),
            escape_attr(&attachment.label)
        ),
        None => format!(
            "<div class=\"gallery-missing\">이미지를 불러올 수 없습니다 ({})</div>",
            escape_html(attachment.path.as_deref().unwrap_or_default())
        ),
    };
    format!(
        "<div class=\"gallery-item\" data-record=\"{}\" data-position=\"{}\"><div class=\"gallery-caption\"><span>{} - {}</span><span>{date}</span></div><div class=\"gallery-image\">{body}</div></div>",
        attachment.record,
        attachment.position,
        escape_html(&attachment.label),
        attachment.category.caption(),
    )
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PresentationMode {
    #[default]
    Interactive,
    /// Only `node` is printed; every other top-level node is suppressed.
    Print { node: String },
}

impl PresentationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresentationMode::Interactive => "interactive",
            PresentationMode::Print { .. } => "print",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootNode {
    pub id: String,
    pub html: String,
    /// Hidden unless print mode targets it.
    pub out_of_flow: bool,
}

/// Top level of the live document.
#[derive(Debug, Clone, Default)]
pub struct AppRoot {
    nodes: Vec<RootNode>,
    mode: PresentationMode,
    stylesheets: Vec<String>,
}

impl AppRoot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_node(&mut self, id: impl Into<String>, html: impl Into<String>) {
        self.nodes.push(RootNode {
            id: id.into(),
            html: html.into(),
            out_of_flow: false,
        });
    }

    pub fn mount_out_of_flow(&mut self, id: &str, html: String) {
        match self.nodes.iter_mut().find(|node| node.id == id) {
            Some(node) => {
                node.html = html;
                node.out_of_flow = true;
            }
            None => self.nodes.push(RootNode {
                id: id.to_string(),
                html,
                out_of_flow: true,
            }),
        }
    }

    pub fn add_stylesheet(&mut self, css: String) {
        if !self.stylesheets.contains(&css) {
            self.stylesheets.push(css);
        }
    }

    pub fn node(&self, id: &str) -> Option<&RootNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn nodes(&self) -> &[RootNode] {
        &self.nodes
    }

    pub fn mode(&self) -> &PresentationMode {
        &self.mode
    }

    pub fn set_mode(&mut self, mode: PresentationMode) {
        debug!(mode = mode.as_str(), "presentation mode changed");
        self.mode = mode;
    }

    /// Ids of the top-level nodes that end up on paper in the current mode.
    pub fn visible_in_print(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|node| match &self.mode {
                PresentationMode::Interactive => !node.out_of_flow,
                PresentationMode::Print { node: target } => &node.id == target,
            })
            .map(|node| node.id.as_str())
            .collect()
    }

    pub fn render_html(&self) -> String {
        let mut out = String::from("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
        for css in &self.stylesheets {
            out.push_str(&format!("<style>\n{css}\n</style>\n"));
        }
        out.push_str(&format!(
            "</head>\n<body {PRESENTATION_ATTR}=\"{}\">\n",
            self.mode.as_str()
        ));
        for node in &self.nodes {
            out.push_str(&format!(
                "<div id=\"{}\">{}</div>\n",
                escape_attr(&node.id),
                node.html
            ));
        }
        out.push_str("</body>\n</html>\n");
        out
    }
}
