//! Content rendering and crawl reports
//!
//! This module handles:
//! - Rendering fetched pages in the caller's output format
//! - Generating markdown summaries of finished crawls

mod markdown;

pub use markdown::{format_markdown_report, write_markdown_report};

use crate::engine::FetchedPage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Format of `PageResult::content`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Markdown,
    Json,
    Html,
    Text,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Json => "json",
            Self::Html => "html",
            Self::Text => "text",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            "html" => Ok(Self::Html),
            "text" | "txt" => Ok(Self::Text),
            other => Err(format!(
                "unknown output format '{}' (expected markdown, json, html or text)",
                other
            )),
        }
    }
}

/// Renders a fetched page as the content payload for `format`
pub fn render(format: OutputFormat, page: &FetchedPage) -> String {
    match format {
        OutputFormat::Markdown => page.content.markdown.clone(),
        OutputFormat::Html => page.content.html.clone(),
        OutputFormat::Text => page.content.text.clone(),
        OutputFormat::Json => {
            let doc = serde_json::json!({
                "url": page.final_url.as_str(),
                "title": page.title,
                "text": page.content.text,
                "extracted": page.extracted,
            });
            // A json! value with string keys always serializes
            serde_json::to_string_pretty(&doc).unwrap_or_default()
        }
    }
}
