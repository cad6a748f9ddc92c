//! Read-only view over a finished document, for callers that need to check
//! what a sandbox actually received.

use crate::print_css::{self, PageSetup};
use kuchiki::NodeRef;
use kuchiki::traits::TendrilSink;

pub struct InspectedDocument {
    root: NodeRef,
}

impl InspectedDocument {
    pub fn parse(html: &str) -> Self {
        Self {
            root: kuchiki::parse_html().one(html),
        }
    }

    /// Whitespace-collapsed text of the whole body.
    pub fn text(&self) -> String {
        match self.root.select_first("body") {
            Ok(body) => collapse(&body.text_contents()),
            Err(()) => collapse(&self.root.text_contents()),
        }
    }

    pub fn count(&self, selector: &str) -> usize {
        self.root
            .select(selector)
            .map(|matches| matches.count())
            .unwrap_or(0)
    }

    /// Collapsed text of every element matching `selector`, in document order.
    pub fn texts(&self, selector: &str) -> Vec<String> {
        let Ok(matches) = self.root.select(selector) else {
            return Vec::new();
        };
        matches.map(|element| collapse(&element.text_contents())).collect()
    }

    pub fn attr(&self, selector: &str, name: &str) -> Option<String> {
        let element = self.root.select_first(selector).ok()?;
        let attrs = element.attributes.borrow();
        attrs.get(name).map(str::to_string)
    }

    pub fn attrs(&self, selector: &str, name: &str) -> Vec<String> {
        let Ok(matches) = self.root.select(selector) else {
            return Vec::new();
        };
        matches
            .filter_map(|element| element.attributes.borrow().get(name).map(str::to_string))
            .collect()
    }

    /// All inline `<style>` text, concatenated.
    pub fn stylesheet(&self) -> String {
        self.texts_raw("style").join("\n")
    }

    pub fn page_setup(&self) -> PageSetup {
        print_css::extract_page_setup(&self.stylesheet())
    }

    fn texts_raw(&self, selector: &str) -> Vec<String> {
        let Ok(matches) = self.root.select(selector) else {
            return Vec::new();
        };
        matches.map(|element| element.text_contents()).collect()
    }
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<html><head><style>@page { size: 80mm 40mm; margin: 0 }</style></head>
<body><div class="row" data-field="title">  생표고
   1kg </div><div class="row" data-field="code">B-001</div></body></html>"#;

    #[test]
    fn reads_text_and_attributes() {
        let doc = InspectedDocument::parse(SAMPLE);
        assert_eq!(doc.count(".row"), 2);
        assert_eq!(doc.texts(".row"), vec!["생표고 1kg", "B-001"]);
        assert_eq!(doc.attr(".row", "data-field").as_deref(), Some("title"));
        assert_eq!(doc.attrs(".row", "data-field"), vec!["title", "code"]);
        assert_eq!(doc.text(), "생표고 1kg B-001");
    }

    #[test]
    fn invalid_selector_matches_nothing() {
        let doc = InspectedDocument::parse(SAMPLE);
        assert_eq!(doc.count("[[["), 0);
        assert!(doc.texts("[[[").is_empty());
        assert_eq!(doc.attr("[[[", "id"), None);
    }

    #[test]
    fn page_setup_comes_from_inline_styles() {
        let setup = InspectedDocument::parse(SAMPLE).page_setup();
        assert_eq!(setup.size, Some(crate::types::PageSize::label_80x40()));
        assert_eq!(setup.margins(), Some(crate::types::Margins::zero()));
    }
}
