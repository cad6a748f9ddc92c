use crate::config::{LabelConfig, PortalConfig, ReportConfig};
use crate::error::PrintError;
use crate::types::{Margins, Mm, PageSize};
use lightningcss::rules::{CssRule, CssRuleList};
use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};

/// Attribute on the live document root that carries the presentation mode.
pub const PRESENTATION_ATTR: &str = "data-presentation";

/// Rules that keep backgrounds and colours when the platform strips them.
const FORCE_COLORS: &str = "-webkit-print-color-adjust: exact !important; print-color-adjust: exact !important;";

pub fn label_stylesheet(config: &LabelConfig) -> String {
    let page = config.page;
    format!(
        r#"@page {{ size: {size}; margin: {margin}; }}
body {{ margin: 0; padding: 0; background: #ffffff !important; color: #000000 !important; font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, "Malgun Gothic", sans-serif; {force} }}
.label-wrapper {{ display: flex; flex-direction: row; width: {width}; height: {height}; padding: 4mm 6mm; box-sizing: border-box; align-items: center; background: #ffffff !important; }}
.qr-section {{ flex-shrink: 0; margin-right: 6mm; text-align: center; display: flex; flex-direction: column; align-items: center; justify-content: center; }}
.qr-box {{ border: 2px solid black; padding: 1.5mm; background: white !important; display: inline-block; line-height: 0; }}
.qr-box svg {{ width: 22mm !important; height: 22mm !important; }}
.badge {{ font-size: 8px; font-weight: 900; margin-top: 4px; line-height: 1; border: 1px solid black; padding: 2px 4px; white-space: nowrap; }}
.info-section {{ flex: 1; display: flex; flex-direction: column; justify-content: center; height: 100%; padding-left: 1mm; }}
.data-row {{ display: flex; align-items: center; padding: 3px 0; font-size: 11px; line-height: 1; }}
.data-row.first {{ border-top: 2px solid black; padding-top: 4px; }}
.data-label {{ color: #000000 !important; font-weight: 900; width: 12mm; flex-shrink: 0; }}
.data-value {{ font-weight: 900; flex: 1; color: #000000 !important; }}
.label-code {{ margin-top: 6px; border-top: 2px solid black; padding-top: 4px; font-size: 11px; font-weight: 900; letter-spacing: -0.2px; color: #000000 !important; }}
.footer {{ text-align: right; font-size: 7px; margin-top: 3px; font-weight: bold; opacity: 0.6; color: #666666 !important; }}
"#,
        size = page.to_css(),
        margin = config.margins.to_css(),
        force = FORCE_COLORS,
        width = page.width.to_css(),
        height = page.height.to_css(),
    )
}

pub fn report_stylesheet(config: &ReportConfig) -> String {
    let mut css = String::new();
    if let Some(url) = &config.font_import {
        css.push_str(&format!("@import url(\"{}\");\n", url.replace('"', "%22")));
    }
    css.push_str(&format!(
        r#"@page {{ size: {size}; margin: {margin}; }}
body {{ font-family: {font}; line-height: 1.7; color: #1e293b; word-break: keep-all; {force} }}
.print-header {{ margin-bottom: 40px; padding-bottom: 15px; border-bottom: 3px solid {accent}; display: flex; justify-content: space-between; align-items: flex-end; }}
h1 {{ font-size: 28px; font-weight: 900; margin: 0; color: #0f172a; }}
.date {{ font-size: 11px; color: #64748b; font-weight: 700; letter-spacing: 0.05em; }}
.p-section {{ margin-bottom: 30px; page-break-inside: avoid; }}
.section-title {{ font-size: 18px; font-weight: 900; color: {accent}; margin-bottom: 15px; padding-bottom: 8px; border-bottom: 1px solid #e2e8f0; }}
.section-body {{ white-space: pre-wrap; color: #334155; }}
.p-preface {{ margin-bottom: 30px; white-space: pre-wrap; }}
.p-block {{ white-space: pre-wrap; }}
table {{ width: 100%; border-collapse: collapse; margin: 20px 0; font-size: 13px; }}
th {{ background-color: #f1f5f9; color: #475569; font-weight: 800; text-align: left; padding: 12px; border: 1px solid #e2e8f0; }}
td {{ padding: 10px 12px; border: 1px solid #e2e8f0; color: #334155; }}
.footer {{ margin-top: 50px; padding-top: 20px; border-top: 1px solid #f1f5f9; text-align: center; font-size: 10px; color: #94a3b8; }}
"#,
        size = config.page.to_css(),
        margin = config.margins.to_css(),
        font = config.font_family,
        force = FORCE_COLORS,
        accent = config.accent_color,
    ));
    css
}

/// Print rules for the in-place report. Everything is scoped to the
/// presentation attribute on the root, so the live document is untouched
/// until print mode is switched on.
pub fn portal_stylesheet(config: &PortalConfig) -> String {
    let node = &config.node_id;
    let mode = format!("body[{PRESENTATION_ATTR}=\"print\"]");
    format!(
        r#"@page {{ size: {size}; margin: {margin}; }}
#{node} {{ display: none; }}
@media print {{
  {mode} {{ margin: 0; padding: 0; background: white !important; {force} }}
  {mode} > :not(#{node}) {{ display: none !important; }}
  {mode} > #{node} {{ display: block !important; position: absolute !important; left: 0 !important; top: 0 !important; width: 100% !important; margin: 0 !important; padding: 0 !important; background: white !important; }}
  #{node} thead {{ display: table-header-group; }}
  #{node} tr {{ page-break-inside: avoid; }}
  #{node} .page-break-before {{ page-break-before: always; margin-top: 20mm; }}
}}
#{node} .report-title {{ text-align: center; margin-bottom: 40px; border-bottom: 4px double black; padding-bottom: 24px; }}
#{node} .farm-info {{ width: 100%; border-collapse: collapse; margin-bottom: 32px; }}
#{node} .farm-info th {{ background: #f1f5f9; font-weight: bold; font-size: 14px; padding: 12px; border: 1px solid black; }}
#{node} .farm-info td {{ font-size: 14px; padding: 12px; border: 1px solid black; text-align: center; }}
#{node} .log-table {{ width: 100%; border-collapse: collapse; border: 1px solid black; font-size: 12px; line-height: 1.6; }}
#{node} .log-table th {{ background: #f1f5f9; border: 1px solid black; padding: 8px; }}
#{node} .log-table td {{ border: 1px solid black; padding: 8px; vertical-align: top; }}
#{node} .log-table tr.blank td {{ height: 16mm; }}
#{node} .evidence-note {{ margin-top: 8px; font-size: 8px; font-weight: bold; color: #94a3b8; }}
#{node} .sub-heading {{ font-weight: bold; display: inline-block; margin-bottom: 4px; }}
#{node} .signature {{ margin-top: 40px; text-align: right; font-weight: bold; }}
#{node} .company {{ text-align: center; font-size: 24px; font-weight: 900; letter-spacing: 0.5em; }}
#{node} .gallery-row {{ display: flex; gap: 40px; margin-bottom: 48px; }}
#{node} .gallery-item {{ flex: 1; border: 1px solid black; overflow: hidden; }}
#{node} .gallery-caption {{ display: flex; justify-content: space-between; background: #f8fafc; padding: 8px; border-bottom: 1px solid black; font-weight: bold; font-size: 14px; }}
#{node} .gallery-image {{ display: flex; align-items: center; justify-content: center; min-height: 300px; padding: 16px; }}
#{node} .gallery-image img {{ max-width: 100%; max-height: 400px; object-fit: contain; }}
#{node} .gallery-missing {{ color: #94a3b8; font-style: italic; }}
"#,
        node = node,
        mode = mode,
        size = config.page.to_css(),
        margin = config.margins.to_css(),
        force = FORCE_COLORS,
    )
}

/// Parses `css` and prints it back, rejecting stylesheets the engine cannot
/// read so a broken rule never reaches a sandbox.
pub fn normalize(css: &str) -> Result<String, PrintError> {
    let sheet = StyleSheet::parse(css, ParserOptions::default())
        .map_err(|err| PrintError::Stylesheet(err.to_string()))?;
    let printed = sheet
        .to_css(PrinterOptions::default())
        .map_err(|err| PrintError::Stylesheet(err.to_string()))?;
    Ok(printed.code)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageSetup {
    pub size: Option<PageSize>,
    pub margin_top: Option<Mm>,
    pub margin_right: Option<Mm>,
    pub margin_bottom: Option<Mm>,
    pub margin_left: Option<Mm>,
}

impl PageSetup {
    pub fn margins(&self) -> Option<Margins> {
        Some(Margins {
            top: self.margin_top?,
            right: self.margin_right?,
            bottom: self.margin_bottom?,
            left: self.margin_left?,
        })
    }
}

/// Reads the default `@page` rule, including one nested in `@media`.
pub fn extract_page_setup(css: &str) -> PageSetup {
    if css.trim().is_empty() {
        return PageSetup::default();
    }
    let Ok(sheet) = StyleSheet::parse(css, ParserOptions::default()) else {
        return PageSetup::default();
    };
    let mut setup = PageSetup::default();
    extract_page_setup_from_rules(&sheet.rules, &mut setup);
    setup
}

fn extract_page_setup_from_rules(rules: &CssRuleList, setup: &mut PageSetup) {
    for rule in &rules.0 {
        match rule {
            CssRule::Page(page_rule) => {
                if !page_rule.selectors.is_empty() {
                    continue;
                }
                let declarations = page_rule
                    .declarations
                    .declarations
                    .iter()
                    .map(|p| (p, false))
                    .chain(
                        page_rule
                            .declarations
                            .important_declarations
                            .iter()
                            .map(|p| (p, true)),
                    );
                for (property, important) in declarations {
                    if let Ok(text) = property.to_css_string(important, PrinterOptions::default())
                    {
                        apply_page_declaration(&text, setup);
                    }
                }
            }
            CssRule::Media(media) => extract_page_setup_from_rules(&media.rules, setup),
            _ => {}
        }
    }
}

fn apply_page_declaration(text: &str, setup: &mut PageSetup) {
    let Some((name, value)) = text.split_once(':') else {
        return;
    };
    let value = value.trim().trim_end_matches(';').trim_end_matches("!important").trim();
    match name.trim().to_ascii_lowercase().as_str() {
        "size" => {
            if let Some(size) = parse_page_size(value) {
                setup.size = Some(size);
            }
        }
        "margin" => apply_margin_shorthand(setup, value),
        "margin-top" => setup.margin_top = parse_length(value),
        "margin-right" => setup.margin_right = parse_length(value),
        "margin-bottom" => setup.margin_bottom = parse_length(value),
        "margin-left" => setup.margin_left = parse_length(value),
        _ => {}
    }
}

fn apply_margin_shorthand(setup: &mut PageSetup, raw: &str) {
    let values: Vec<Mm> = raw.split_whitespace().filter_map(parse_length).collect();
    if values.is_empty() {
        return;
    }
    let (top, right, bottom, left) = match values.len() {
        1 => (values[0], values[0], values[0], values[0]),
        2 => (values[0], values[1], values[0], values[1]),
        3 => (values[0], values[1], values[2], values[1]),
        _ => (values[0], values[1], values[2], values[3]),
    };
    setup.margin_top = Some(top);
    setup.margin_right = Some(right);
    setup.margin_bottom = Some(bottom);
    setup.margin_left = Some(left);
}

fn parse_page_size(raw: &str) -> Option<PageSize> {
    let mut landscape = false;
    let mut named: Option<PageSize> = None;
    let mut lengths: Vec<Mm> = Vec::new();
    for token in raw.split_whitespace() {
        match token.to_ascii_lowercase().as_str() {
            "landscape" => landscape = true,
            "portrait" | "auto" => {}
            other => {
                if let Some(size) = PageSize::from_keyword(other) {
                    named = Some(size);
                } else if let Some(length) = parse_length(other) {
                    lengths.push(length);
                }
            }
        }
    }
    let size = match (named, lengths.as_slice()) {
        (Some(size), _) => size,
        (None, [side]) => PageSize {
            width: *side,
            height: *side,
        },
        (None, [width, height, ..]) => PageSize {
            width: *width,
            height: *height,
        },
        (None, []) => return None,
    };
    Some(if landscape { size.landscape() } else { size })
}

fn parse_length(raw: &str) -> Option<Mm> {
    let raw = raw.trim().to_ascii_lowercase();
    if raw == "0" {
        return Some(Mm::ZERO);
    }
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let value: f32 = number.parse().ok()?;
    let mm = match unit {
        "mm" => value,
        "cm" => value * 10.0,
        "q" => value / 4.0,
        "in" => value * 25.4,
        "pt" => value * 25.4 / 72.0,
        "pc" => value * 25.4 / 6.0,
        "px" => value * 25.4 / 96.0,
        "" if value == 0.0 => 0.0,
        _ => return None,
    };
    Some(Mm::new(mm))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_stylesheet_declares_label_stock() {
        let css = normalize(&label_stylesheet(&LabelConfig::default())).expect("valid css");
        let setup = extract_page_setup(&css);
        assert_eq!(setup.size, Some(PageSize::label_80x40()));
        assert_eq!(setup.margins(), Some(Margins::zero()));
        assert!(css.contains("print-color-adjust"));
    }

    #[test]
    fn report_stylesheet_uses_a4_with_margins() {
        let css = normalize(&report_stylesheet(&ReportConfig::default())).expect("valid css");
        let setup = extract_page_setup(&css);
        assert_eq!(setup.size, Some(PageSize::a4()));
        assert_eq!(setup.margins(), Some(Margins::symmetric(25.0, 20.0)));
        assert!(css.contains("@import"));
    }

    #[test]
    fn portal_stylesheet_scopes_hiding_to_print_media() {
        let css = normalize(&portal_stylesheet(&PortalConfig::default())).expect("valid css");
        assert!(css.contains("@media print"));
        assert!(css.contains("data-presentation"));
        let setup = extract_page_setup(&css);
        assert_eq!(setup.size, Some(PageSize::a4()));
        assert_eq!(setup.margins(), Some(Margins::all(15.0)));
    }

    #[test]
    fn page_rule_nested_in_media_is_found() {
        let setup = extract_page_setup("@media print { @page { size: A4; margin: 10mm; } }");
        assert_eq!(setup.size, Some(PageSize::a4()));
        assert_eq!(setup.margins(), Some(Margins::all(10.0)));
    }

    #[test]
    fn named_page_rules_are_ignored() {
        let setup = extract_page_setup("@page :first { margin: 0; } @page { size: 100mm 50mm landscape; }");
        assert_eq!(setup.margins(), None);
        assert_eq!(setup.size, Some(PageSize::new(100.0, 50.0)));
    }

    #[test]
    fn lengths_convert_to_millimetres() {
        assert_eq!(parse_length("1in"), Some(Mm::new(25.4)));
        assert_eq!(parse_length("2cm"), Some(Mm::new(20.0)));
        assert_eq!(parse_length("0"), Some(Mm::ZERO));
        assert_eq!(parse_length("auto"), None);
        assert_eq!(parse_page_size("A4 landscape"), Some(PageSize::a4().landscape()));
    }
}
