//! HTML parsing for the HTTP engine
//!
//! Extracts the title, followable links, visible text, and a light markdown
//! rendering from a fetched document, plus CSS-selector extraction.

use super::FetchError;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use url::Url;

/// Elements whose text never counts as page content
const INVISIBLE: &[&str] = &["script", "style", "noscript", "template", "head"];

/// Extracted information from an HTML page
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    pub title: Option<String>,

    /// Absolute http(s) URLs, in document order, duplicates kept
    pub links: Vec<String>,

    pub text: String,
    pub markdown: String,
}

/// Parses HTML content and extracts links and metadata
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` and `data:` links
/// - Fragment-only links
///
/// # Example
///
/// ```
/// use tidecrawl::engine::parse_html;
/// use url::Url;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
/// let base_url = Url::parse("https://example.com/").unwrap();
/// let parsed = parse_html(html, &base_url);
/// assert_eq!(parsed.title, Some("Test".to_string()));
/// assert_eq!(parsed.links, vec!["https://example.com/page".to_string()]);
/// ```
pub fn parse_html(html: &str, base_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html);

    ParsedPage {
        title: extract_title(&document),
        links: extract_links(&document, base_url),
        text: extract_text(&document),
        markdown: render_markdown(&document),
    }
}

/// Runs named CSS selectors over `html`
///
/// The result is a JSON object mapping each name to the array of trimmed
/// text values of its matches.
pub fn extract_css(html: &str, selectors: &BTreeMap<String, String>) -> Result<Value, FetchError> {
    let document = Html::parse_document(html);
    let mut out = Map::new();

    for (name, raw) in selectors {
        let selector = Selector::parse(raw).map_err(|e| {
            FetchError::Extraction(format!("invalid selector '{}': {:?}", raw, e))
        })?;
        let values = document
            .select(&selector)
            .map(|element| Value::String(collapse_whitespace(&element_text(element))))
            .collect();
        out.insert(name.clone(), Value::Array(values));
    }

    Ok(Value::Object(out))
}

fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_links(document: &Html, base_url: &Url) -> Vec<String> {
    let mut links = Vec::new();

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }
            if let Some(absolute) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base_url))
            {
                links.push(absolute);
            }
        }
    }

    if let Ok(canonical_selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(absolute) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base_url))
            {
                links.push(absolute);
            }
        }
    }

    links
}

/// Resolves a link href to an absolute http(s) URL
///
/// Returns None for special schemes, fragment-only links, and hrefs that do
/// not resolve.
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
    {
        return None;
    }

    let absolute = base_url.join(href).ok()?;
    match absolute.scheme() {
        "http" | "https" => Some(absolute.to_string()),
        _ => None,
    }
}

/// Visible text of an element, skipping script/style subtrees
fn element_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .map(|el| INVISIBLE.contains(&el.name()))
                .unwrap_or(false)
        });
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    out
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_text(document: &Html) -> String {
    let root = Selector::parse("body")
        .ok()
        .and_then(|body| document.select(&body).next())
        .unwrap_or_else(|| document.root_element());
    collapse_whitespace(&element_text(root))
}

fn render_markdown(document: &Html) -> String {
    let Ok(blocks) = Selector::parse("h1, h2, h3, h4, h5, h6, p, li, pre, blockquote") else {
        return String::new();
    };

    let mut out: Vec<String> = Vec::new();
    for element in document.select(&blocks) {
        let name = element.value().name();

        // Paragraphs inside list items and quotes are rendered by the container
        let nested = element.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .map(|el| matches!(el.name(), "li" | "blockquote" | "pre"))
                .unwrap_or(false)
        });
        if nested {
            continue;
        }

        if name == "pre" {
            let code = element.text().collect::<String>();
            out.push(format!("```\n{}\n```", code.trim_end()));
            continue;
        }

        let text = collapse_whitespace(&element_text(element));
        if text.is_empty() {
            continue;
        }

        let block = match name {
            "h1" => format!("# {}", text),
            "h2" => format!("## {}", text),
            "h3" => format!("### {}", text),
            "h4" => format!("#### {}", text),
            "h5" => format!("##### {}", text),
            "h6" => format!("###### {}", text),
            "li" => format!("- {}", text),
            "blockquote" => format!("> {}", text),
            _ => text,
        };
        out.push(block);
    }

    out.join("\n\n")
}
