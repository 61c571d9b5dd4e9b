//! Batch processing tests against the scripted engine

use crate::common::{crawler, MockEngine};
use std::sync::Arc;
use std::time::Duration;
use tidecrawl::storage::SqliteStorage;
use tidecrawl::{
    BatchRequest, CrawlError, Crawler, ExtractionStrategy, FetchError, FetchOptions, OutputFormat,
    Settings,
};

fn urls(list: &[&str]) -> Vec<String> {
    list.iter().map(|u| u.to_string()).collect()
}

#[tokio::test]
async fn test_batch_returns_one_result_per_url_in_order() {
    let engine = MockEngine::new()
        .page("https://example.com/1", &[])
        .fail(
            "https://example.com/2",
            FetchError::Timeout { seconds: 30 },
        )
        .page("https://example.com/3", &[])
        .page("https://example.com/5", &[])
        .with_latency(Duration::from_millis(5));
    let (crawler, _engine) = crawler(engine);

    let batch = urls(&[
        "https://example.com/1",
        "https://example.com/2",
        "https://example.com/3",
        "https://example.com/4",
        "https://example.com/5",
    ]);
    let results = crawler
        .scrape_batch(&batch, BatchRequest::default().with_concurrency(2))
        .await
        .unwrap();

    assert_eq!(results.len(), 5);
    for (result, url) in results.iter().zip(&batch) {
        assert_eq!(&result.url, url);
    }
    let successes: Vec<bool> = results.iter().map(|r| r.success).collect();
    assert_eq!(successes, vec![true, false, true, false, true]);
}

#[tokio::test]
async fn test_batch_concurrency_bounded() {
    let mut engine = MockEngine::new().with_latency(Duration::from_millis(10));
    let batch: Vec<String> = (0..12)
        .map(|i| format!("https://example.com/{}", i))
        .collect();
    for url in &batch {
        engine = engine.page(url, &[]);
    }
    let (crawler, engine) = crawler(engine);

    let results = crawler
        .scrape_batch(&batch, BatchRequest::default().with_concurrency(3))
        .await
        .unwrap();

    assert_eq!(results.len(), 12);
    assert!(engine.peak_concurrency() <= 3);
    assert!(engine.peak_concurrency() >= 1);
}

#[tokio::test]
async fn test_batch_fail_fast_surfaces_first_failure() {
    let engine = MockEngine::new()
        .page("https://example.com/1", &[])
        .page("https://example.com/3", &[])
        .page("https://example.com/4", &[]);
    let (crawler, engine) = crawler(engine);

    let batch = urls(&[
        "https://example.com/1",
        "https://example.com/2",
        "https://example.com/3",
        "https://example.com/4",
    ]);
    let request = BatchRequest::default()
        .with_concurrency(1)
        .with_continue_on_error(false);
    let err = crawler.scrape_batch(&batch, request).await.unwrap_err();

    match err {
        CrawlError::Fetch { url, source } => {
            assert_eq!(url, "https://example.com/2");
            assert_eq!(source, FetchError::Http { status: 404 });
        }
        other => panic!("expected fetch error, got {:?}", other),
    }
    assert_eq!(engine.fetched().len(), 2);
}

#[tokio::test]
async fn test_batch_skips_invalid_urls() {
    let engine = MockEngine::new().page("https://example.com/ok", &[]);
    let (crawler, engine) = crawler(engine);

    let batch = urls(&["not a url", "https://example.com/ok", "mailto:me@example.com"]);
    let results = crawler
        .scrape_batch(&batch, BatchRequest::default())
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(engine.fetched().len(), 1);
}

#[tokio::test]
async fn test_batch_with_no_valid_urls_is_rejected() {
    let (crawler, _engine) = crawler(MockEngine::new());
    let err = crawler
        .scrape_batch(&urls(&["", "ftp://example.com/"]), BatchRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CrawlError::Validation(_)));
}

#[tokio::test]
async fn test_batch_renders_requested_format() {
    let engine = MockEngine::new().page("https://example.com/doc", &[]);
    let (crawler, _engine) = crawler(engine);

    let results = crawler
        .scrape_batch(
            &urls(&["https://example.com/doc"]),
            BatchRequest::default().with_output_format(OutputFormat::Json),
        )
        .await
        .unwrap();

    let doc: serde_json::Value =
        serde_json::from_str(results[0].content.as_deref().unwrap()).unwrap();
    assert_eq!(doc["url"], "https://example.com/doc");
}

#[tokio::test]
async fn test_batch_rejects_bad_options() {
    let (crawler, _engine) = crawler(MockEngine::new());
    let options = FetchOptions {
        timeout: 0,
        ..FetchOptions::default()
    };
    let err = crawler
        .scrape_batch(
            &urls(&["https://example.com/"]),
            BatchRequest::default().with_options(options),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), tidecrawl::CrawlErrorKind::Validation);
}

fn cached_crawler(settings: Settings, engine: MockEngine) -> (Crawler, Arc<MockEngine>) {
    let engine = Arc::new(engine);
    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let crawler = Crawler::with_storage(settings, engine.clone(), storage);
    (crawler, engine)
}

async fn scrape(crawler: &Crawler, url: &str, format: OutputFormat, session: Option<&str>) -> bool {
    crawler
        .scrape_single(
            url,
            &FetchOptions::default(),
            &ExtractionStrategy::None,
            format,
            session,
        )
        .await
        .unwrap()
        .success
}

#[tokio::test]
async fn test_repeat_scrape_served_from_cache() {
    let (crawler, engine) = cached_crawler(
        Settings::default(),
        MockEngine::new().page("https://example.com/doc", &[]),
    );

    assert!(scrape(&crawler, "https://example.com/doc", OutputFormat::Markdown, None).await);
    assert!(scrape(&crawler, "https://example.com/doc", OutputFormat::Markdown, None).await);
    assert_eq!(engine.fetched().len(), 1);

    // A different output format is a different cache entry
    assert!(scrape(&crawler, "https://example.com/doc", OutputFormat::Json, None).await);
    assert_eq!(engine.fetched().len(), 2);
}

#[tokio::test]
async fn test_failed_and_session_bound_fetches_bypass_cache() {
    let (crawler, engine) = cached_crawler(
        Settings::default(),
        MockEngine::new()
            .page("https://example.com/doc", &[])
            .fail("https://example.com/down", FetchError::Timeout { seconds: 30 }),
    );

    for _ in 0..2 {
        assert!(scrape(&crawler, "https://example.com/doc", OutputFormat::Markdown, Some("s1")).await);
        assert!(!scrape(&crawler, "https://example.com/down", OutputFormat::Markdown, None).await);
    }
    assert_eq!(engine.fetched().len(), 4);
}

#[tokio::test]
async fn test_cache_disabled_always_fetches() {
    let mut settings = Settings::default();
    settings.scrape.cache_enabled = false;
    let (crawler, engine) =
        cached_crawler(settings, MockEngine::new().page("https://example.com/doc", &[]));

    assert!(scrape(&crawler, "https://example.com/doc", OutputFormat::Markdown, None).await);
    assert!(scrape(&crawler, "https://example.com/doc", OutputFormat::Markdown, None).await);
    assert_eq!(engine.fetched().len(), 2);
    assert_eq!(crawler.cleanup_expired_cache(), 0);
}
