//! End-to-end tests of the HTTP engine against wiremock servers

use crate::common::fast_rule;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tidecrawl::engine::HttpEngine;
use tidecrawl::jobs::PageErrorKind;
use tidecrawl::output::write_markdown_report;
use tidecrawl::{
    CrawlRequest, CrawlRule, Crawler, ExtractionStrategy, FetchOptions, JobStatus, OutputFormat,
    Settings,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(
        format!("<html><head><title>Test</title></head><body>{}</body></html>", body),
        "text/html",
    )
}

fn http_crawler() -> Crawler {
    let engine = HttpEngine::new(None).unwrap();
    Crawler::new(Settings::default(), Arc::new(engine))
}

async fn mount(server: &MockServer, route: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_crawl_over_http_respects_robots_and_domain() {
    let server = MockServer::start().await;
    let external = MockServer::start().await;
    let external_url = external
        .uri()
        .replace("127.0.0.1", "localhost");

    mount(
        &server,
        "/robots.txt",
        ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /b\n"),
    )
    .await;
    mount(
        &server,
        "/",
        html(&format!(
            r#"<a href="/a">A</a> <a href="/b">B</a> <a href="{}/x">X</a>"#,
            external_url
        )),
    )
    .await;
    mount(&server, "/a", html(r#"<a href="/c">C</a> <a href="/">Home</a>"#)).await;
    mount(&server, "/b", html("forbidden")).await;
    mount(&server, "/c", html("leaf")).await;

    let crawler = http_crawler();
    let rule = CrawlRule {
        max_depth: 2,
        ..fast_rule()
    };
    let job_id = crawler
        .start_crawl(CrawlRequest::new(server.uri()).with_rule(rule))
        .await
        .unwrap();

    let status = crawler.get_crawl_status(&job_id).unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.counters.pages_crawled, 3);
    assert_eq!(status.counters.pages_successful, 3);
    assert_eq!(status.counters.urls_rejected, 2);
    assert_eq!(status.counters.current_depth, 2);

    let requested: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect();
    assert!(!requested.contains(&"/b".to_string()));
    assert!(requested.contains(&"/c".to_string()));

    let external_pages: Vec<String> = external
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_string())
        .filter(|p| p != "/robots.txt")
        .collect();
    assert!(external_pages.is_empty());

    let results = crawler.get_crawl_results(&job_id);
    assert_eq!(results[0].metadata.title.as_deref(), Some("Test"));

    let dir = TempDir::new().unwrap();
    let report = dir.path().join("report.md");
    write_markdown_report(&status, &results, &report).unwrap();
    let written = std::fs::read_to_string(&report).unwrap();
    assert!(written.contains("| Pages Crawled | 3 |"));
}

#[tokio::test]
async fn test_scrape_http_error_is_failed_result() {
    let server = MockServer::start().await;
    mount(&server, "/gone", ResponseTemplate::new(404)).await;

    let crawler = http_crawler();
    let result = crawler
        .scrape_single(
            &format!("{}/gone", server.uri()),
            &FetchOptions::default(),
            &ExtractionStrategy::None,
            OutputFormat::Markdown,
            None,
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.status_code(), Some(404));
    assert_eq!(result.error.unwrap().kind, PageErrorKind::Http);
}

#[tokio::test]
async fn test_scrape_with_css_extraction() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/product",
        html(r#"<h1>Widget</h1><p class="price">10</p><p class="price">20</p>"#),
    )
    .await;

    let crawler = http_crawler();
    let extraction = ExtractionStrategy::css([("price", ".price"), ("name", "h1")]).unwrap();
    let result = crawler
        .scrape_single(
            &format!("{}/product", server.uri()),
            &FetchOptions::default(),
            &extraction,
            OutputFormat::Text,
            None,
        )
        .await
        .unwrap();

    assert!(result.success);
    let extracted = result.extracted.unwrap();
    assert_eq!(extracted["price"], serde_json::json!(["10", "20"]));
    assert_eq!(extracted["name"], serde_json::json!(["Widget"]));
    assert!(result.content.unwrap().contains("Widget"));
}

#[tokio::test]
async fn test_scrape_timeout_is_classified() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/slow",
        html("slow").set_delay(Duration::from_secs(3)),
    )
    .await;

    let crawler = http_crawler();
    let options = FetchOptions {
        timeout: 1,
        ..FetchOptions::default()
    };
    let result = crawler
        .scrape_single(
            &format!("{}/slow", server.uri()),
            &options,
            &ExtractionStrategy::None,
            OutputFormat::Markdown,
            None,
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.error.unwrap().kind, PageErrorKind::Timeout);
}

#[tokio::test]
async fn test_custom_user_agent_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ua"))
        .and(header("user-agent", "tidecrawl-test/1.0"))
        .respond_with(html("hello"))
        .mount(&server)
        .await;

    let crawler = http_crawler();
    let options = FetchOptions {
        user_agent: Some("tidecrawl-test/1.0".to_string()),
        ..FetchOptions::default()
    };
    let result = crawler
        .scrape_single(
            &format!("{}/ua", server.uri()),
            &options,
            &ExtractionStrategy::None,
            OutputFormat::Html,
            None,
        )
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.content.unwrap().contains("hello"));
}

#[tokio::test]
async fn test_non_html_body_returned_as_text() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/data.json",
        ResponseTemplate::new(200).set_body_raw(r#"{"ok":true}"#, "application/json"),
    )
    .await;

    let crawler = http_crawler();
    let result = crawler
        .scrape_single(
            &format!("{}/data.json", server.uri()),
            &FetchOptions::default(),
            &ExtractionStrategy::None,
            OutputFormat::Text,
            None,
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.content.as_deref(), Some(r#"{"ok":true}"#));
    assert!(result.links.is_empty());
}
