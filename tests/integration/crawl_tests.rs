//! Crawl traversal tests against the scripted engine

use crate::common::{crawler, fast_rule, MockEngine};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tidecrawl::storage::SqliteStorage;
use tidecrawl::{
    CrawlError, CrawlRequest, CrawlRule, Crawler, FetchError, FetchOptions, JobStatus, Settings,
};
use tidecrawl::jobs::PageErrorKind;

fn request(url: &str, rule: CrawlRule) -> CrawlRequest {
    CrawlRequest::new(url).with_rule(rule)
}

#[tokio::test]
async fn test_internal_links_followed_external_discarded() {
    let engine = MockEngine::new()
        .page(
            "https://example.com/",
            &[
                "https://example.com/a",
                "https://example.com/b",
                "https://example.com/c",
                "https://external.org/page",
            ],
        )
        .page("https://example.com/a", &[])
        .page("https://example.com/b", &[])
        .page("https://example.com/c", &[]);
    let (crawler, engine) = crawler(engine);

    let rule = CrawlRule {
        max_depth: 1,
        max_pages: 5,
        ..fast_rule()
    };
    let job_id = crawler
        .start_crawl(request("https://example.com", rule))
        .await
        .unwrap();

    let status = crawler.get_crawl_status(&job_id).unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.counters.pages_crawled, 4);
    assert_eq!(status.counters.pages_successful, 4);
    assert_eq!(status.counters.urls_rejected, 1);
    assert_eq!(status.counters.urls_discovered, 4);
    assert_eq!(status.counters.urls_queued, 0);
    assert!(engine.fetched().iter().all(|u| !u.contains("external.org")));

    let results = crawler.get_crawl_results(&job_id);
    assert_eq!(results.len(), 4);
    assert_eq!(results[0].url, "https://example.com/");
    assert_eq!(results[0].depth(), 0);
    assert!(results[1..].iter().all(|r| r.depth() == 1));
    assert!(results[1..]
        .iter()
        .all(|r| r.metadata.discovered_from.as_deref() == Some("https://example.com/")));
}

#[tokio::test(start_paused = true)]
async fn test_seed_timeout_completes_with_failure() {
    let engine = MockEngine::new().hang("https://example.com/");
    let (crawler, _engine) = crawler(engine);

    let options = FetchOptions {
        timeout: 1,
        ..FetchOptions::default()
    };
    let job_id = crawler
        .start_crawl(request("https://example.com/", fast_rule()).with_options(options))
        .await
        .unwrap();

    let status = crawler.get_crawl_status(&job_id).unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.counters.pages_crawled, 1);
    assert_eq!(status.counters.pages_failed, 1);
    assert_eq!(status.counters.pages_successful, 0);
    assert_eq!(status.counters.urls_queued, 0);

    let results = crawler.get_crawl_results(&job_id);
    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert_eq!(results[0].error.as_ref().unwrap().kind, PageErrorKind::Timeout);
}

#[tokio::test]
async fn test_max_depth_zero_fetches_only_seed() {
    let engine = MockEngine::new()
        .page(
            "https://example.com/",
            &["https://example.com/a", "https://example.com/b"],
        )
        .page("https://example.com/a", &[])
        .page("https://example.com/b", &[]);
    let (crawler, engine) = crawler(engine);

    let rule = CrawlRule {
        max_depth: 0,
        ..fast_rule()
    };
    let job_id = crawler
        .start_crawl(request("https://example.com/", rule))
        .await
        .unwrap();

    assert_eq!(crawler.get_crawl_results(&job_id).len(), 1);
    assert_eq!(engine.fetched(), vec!["https://example.com/".to_string()]);
    let status = crawler.get_crawl_status(&job_id).unwrap();
    assert_eq!(status.counters.urls_rejected, 2);
}

#[tokio::test]
async fn test_max_pages_bounds_attempted_fetches() {
    let links: Vec<String> = (0..10)
        .map(|i| format!("https://example.com/p{}", i))
        .collect();
    let link_refs: Vec<&str> = links.iter().map(String::as_str).collect();
    let mut engine = MockEngine::new().page("https://example.com/", &link_refs);
    for link in &links {
        engine = engine.page(link, &[]);
    }
    let (crawler, engine) = crawler(engine);

    let rule = CrawlRule {
        max_pages: 3,
        concurrent_requests: 4,
        ..fast_rule()
    };
    let job_id = crawler
        .start_crawl(request("https://example.com/", rule))
        .await
        .unwrap();

    let status = crawler.get_crawl_status(&job_id).unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.counters.pages_crawled, 3);
    assert_eq!(engine.fetched().len(), 3);
}

#[tokio::test]
async fn test_no_url_fetched_twice() {
    let engine = MockEngine::new()
        .page(
            "https://example.com/",
            &["https://example.com/a", "https://example.com/b"],
        )
        .page(
            "https://example.com/a",
            &["https://example.com/c", "https://example.com/b/", "https://example.com/"],
        )
        .page(
            "https://example.com/b",
            &["https://example.com/c#top", "https://example.com/a"],
        )
        .page("https://example.com/c", &["https://example.com/a"])
        .with_latency(Duration::from_millis(5));
    let (crawler, engine) = crawler(engine);

    let rule = CrawlRule {
        concurrent_requests: 4,
        ..fast_rule()
    };
    let job_id = crawler
        .start_crawl(request("https://example.com/", rule))
        .await
        .unwrap();

    let fetched = engine.fetched();
    let unique: HashSet<&String> = fetched.iter().collect();
    assert_eq!(fetched.len(), unique.len());
    assert_eq!(fetched.len(), 4);
    assert_eq!(
        crawler.get_crawl_status(&job_id).unwrap().counters.pages_crawled,
        4
    );
}

#[tokio::test]
async fn test_breadth_first_order() {
    let engine = MockEngine::new()
        .page(
            "https://example.com/",
            &["https://example.com/a", "https://example.com/b"],
        )
        .page("https://example.com/a", &["https://example.com/a/deep"])
        .page("https://example.com/b", &["https://example.com/b/deep"])
        .page("https://example.com/a/deep", &[])
        .page("https://example.com/b/deep", &[]);
    let (crawler, engine) = crawler(engine);

    let rule = CrawlRule {
        concurrent_requests: 1,
        ..fast_rule()
    };
    crawler
        .start_crawl(request("https://example.com/", rule))
        .await
        .unwrap();

    assert_eq!(
        engine.fetched(),
        vec![
            "https://example.com/",
            "https://example.com/a",
            "https://example.com/b",
            "https://example.com/a/deep",
            "https://example.com/b/deep",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_late_shallow_links_run_before_deeper_work() {
    // /b answers slowly, so /a's subtree reaches depth 3 before /b's links arrive
    let engine = MockEngine::new()
        .page(
            "https://example.com/",
            &["https://example.com/a", "https://example.com/b"],
        )
        .page("https://example.com/a", &["https://example.com/c"])
        .page(
            "https://example.com/c",
            &["https://example.com/y1", "https://example.com/y2"],
        )
        .page("https://example.com/b", &["https://example.com/z"])
        .page("https://example.com/y1", &[])
        .page("https://example.com/y2", &[])
        .page("https://example.com/z", &[])
        .slow("https://example.com/b", Duration::from_millis(300))
        .slow("https://example.com/y1", Duration::from_millis(500));
    let (crawler, engine) = crawler(engine);

    let rule = CrawlRule {
        max_depth: 3,
        concurrent_requests: 2,
        ..fast_rule()
    };
    let job_id = crawler
        .start_crawl(request("https://example.com/", rule))
        .await
        .unwrap();

    let status = crawler.get_crawl_status(&job_id).unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert!(status.error.is_none());
    assert_eq!(status.counters.pages_crawled, 7);

    let fetched = engine.fetched();
    let position = |path: &str| {
        fetched
            .iter()
            .position(|u| u == &format!("https://example.com{}", path))
            .unwrap()
    };
    assert!(position("/z") < position("/y2"));

    let results = crawler.get_crawl_results(&job_id);
    let z = results
        .iter()
        .find(|r| r.url == "https://example.com/z")
        .unwrap();
    assert_eq!(z.depth(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_depth_rejected_link_crawled_when_found_shallower() {
    let engine = MockEngine::new()
        .page(
            "https://example.com/",
            &["https://example.com/a", "https://example.com/b"],
        )
        .page("https://example.com/a", &["https://example.com/c"])
        .page("https://example.com/c", &["https://example.com/x"])
        .page("https://example.com/b", &["https://example.com/x"])
        .page("https://example.com/x", &[])
        .slow("https://example.com/b", Duration::from_millis(300));
    let (crawler, engine) = crawler(engine);

    let rule = CrawlRule {
        max_depth: 2,
        concurrent_requests: 2,
        ..fast_rule()
    };
    let job_id = crawler
        .start_crawl(request("https://example.com/", rule))
        .await
        .unwrap();

    assert!(engine
        .fetched()
        .contains(&"https://example.com/x".to_string()));

    let status = crawler.get_crawl_status(&job_id).unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.counters.pages_crawled, 5);
    assert_eq!(status.counters.urls_discovered, 4);
    assert_eq!(status.counters.urls_rejected, 0);

    let results = crawler.get_crawl_results(&job_id);
    let x = results
        .iter()
        .find(|r| r.url == "https://example.com/x")
        .unwrap();
    assert_eq!(x.depth(), 2);
    assert_eq!(
        x.metadata.discovered_from.as_deref(),
        Some("https://example.com/b")
    );
}

#[tokio::test]
async fn test_exclusion_wins_over_inclusion() {
    let engine = MockEngine::new()
        .page(
            "https://example.com/",
            &[
                "https://example.com/docs/guide",
                "https://example.com/docs/private/keys",
                "https://example.com/blog/post",
            ],
        )
        .page("https://example.com/docs/guide", &[]);
    let (crawler, engine) = crawler(engine);

    let rule = CrawlRule {
        include_patterns: vec!["/docs/".to_string()],
        exclude_patterns: vec!["/private/".to_string()],
        ..fast_rule()
    };
    let job_id = crawler
        .start_crawl(request("https://example.com/", rule))
        .await
        .unwrap();

    assert_eq!(
        engine.fetched(),
        vec!["https://example.com/", "https://example.com/docs/guide"]
    );
    let status = crawler.get_crawl_status(&job_id).unwrap();
    assert_eq!(status.counters.urls_rejected, 2);
}

#[tokio::test]
async fn test_page_failures_do_not_fail_crawl() {
    let engine = MockEngine::new()
        .page(
            "https://example.com/",
            &[
                "https://example.com/ok",
                "https://example.com/missing",
                "https://example.com/down",
            ],
        )
        .page("https://example.com/ok", &[])
        .fail(
            "https://example.com/down",
            FetchError::Network("connection reset".to_string()),
        );
    let (crawler, _engine) = crawler(engine);

    let job_id = crawler
        .start_crawl(request("https://example.com/", fast_rule()))
        .await
        .unwrap();

    let status = crawler.get_crawl_status(&job_id).unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.counters.pages_crawled, 4);
    assert_eq!(status.counters.pages_failed, 2);
    assert!(status.error.is_none());

    let results = crawler.get_crawl_results(&job_id);
    let missing = results
        .iter()
        .find(|r| r.url == "https://example.com/missing")
        .unwrap();
    assert_eq!(missing.status_code(), Some(404));
    assert_eq!(missing.error.as_ref().unwrap().kind, PageErrorKind::Http);
}

#[tokio::test]
async fn test_robots_disallowed_links_skipped() {
    let engine = MockEngine::new()
        .page(
            "https://example.com/",
            &["https://example.com/private/x", "https://example.com/public"],
        )
        .page("https://example.com/public", &[])
        .robots(
            "https://example.com/robots.txt",
            "User-agent: *\nDisallow: /private\n",
        );
    let (crawler, engine) = crawler(engine);

    let job_id = crawler
        .start_crawl(request("https://example.com/", fast_rule()))
        .await
        .unwrap();

    assert!(!engine.fetched().iter().any(|u| u.contains("/private")));
    let status = crawler.get_crawl_status(&job_id).unwrap();
    assert_eq!(status.counters.pages_crawled, 2);
    assert_eq!(status.counters.urls_rejected, 1);
}

#[tokio::test]
async fn test_store_results_disabled_keeps_counters() {
    let engine = MockEngine::new()
        .page("https://example.com/", &["https://example.com/a"])
        .page("https://example.com/a", &[]);
    let (crawler, _engine) = crawler(engine);

    let job_id = crawler
        .start_crawl(request("https://example.com/", fast_rule()).with_store_results(false))
        .await
        .unwrap();

    assert!(crawler.get_crawl_results(&job_id).is_empty());
    let status = crawler.get_crawl_status(&job_id).unwrap();
    assert_eq!(status.counters.pages_crawled, 2);
    assert_eq!(status.results_stored, 0);
}

#[tokio::test]
async fn test_invalid_input_rejected_before_job_exists() {
    let (crawler, engine) = crawler(MockEngine::new());

    let err = crawler
        .start_crawl(request("ftp://example.com/", fast_rule()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), tidecrawl::CrawlErrorKind::Validation);

    let bad_rule = CrawlRule {
        include_patterns: vec!["(unclosed".to_string()],
        ..fast_rule()
    };
    let err = crawler
        .start_crawl(request("https://example.com/", bad_rule))
        .await
        .unwrap_err();
    assert!(matches!(err, CrawlError::Validation(_)));

    assert!(crawler.list_jobs().is_empty());
    assert!(engine.fetched().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_dispatch_and_keeps_in_flight_results() {
    let links: Vec<String> = (0..20)
        .map(|i| format!("https://example.com/p{}", i))
        .collect();
    let link_refs: Vec<&str> = links.iter().map(String::as_str).collect();
    let mut engine = MockEngine::new()
        .page("https://example.com/", &link_refs)
        .with_latency(Duration::from_secs(1));
    for link in &links {
        engine = engine.page(link, &[]);
    }
    let (crawler, _engine) = crawler(engine);

    let rule = CrawlRule {
        concurrent_requests: 1,
        max_pages: 100,
        ..fast_rule()
    };
    let job_id = crawler
        .start_crawl_async(request("https://example.com/", rule))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert!(crawler.cancel_crawl(&job_id));

    let snapshot = crawler.wait_for_crawl(&job_id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Cancelled);
    assert!(snapshot.counters.pages_crawled >= 1);
    assert!(snapshot.counters.pages_crawled < 21);
    assert_eq!(
        crawler.get_crawl_results(&job_id).len() as u64,
        snapshot.counters.pages_crawled
    );
    assert!(!crawler.cancel_crawl(&job_id));
}

#[tokio::test(start_paused = true)]
async fn test_max_duration_stops_dispatch() {
    let links: Vec<String> = (0..20)
        .map(|i| format!("https://example.com/p{}", i))
        .collect();
    let link_refs: Vec<&str> = links.iter().map(String::as_str).collect();
    let mut engine = MockEngine::new()
        .page("https://example.com/", &link_refs)
        .with_latency(Duration::from_secs(10));
    for link in &links {
        engine = engine.page(link, &[]);
    }
    let (crawler, _engine) = crawler(engine);

    let rule = CrawlRule {
        concurrent_requests: 1,
        max_duration: 25,
        ..fast_rule()
    };
    let job_id = crawler
        .start_crawl(request("https://example.com/", rule))
        .await
        .unwrap();

    let status = crawler.get_crawl_status(&job_id).unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.counters.pages_crawled, 3);
}

#[tokio::test(start_paused = true)]
async fn test_delay_applies_between_dispatches() {
    let engine = MockEngine::new()
        .page(
            "https://example.com/",
            &["https://example.com/a", "https://example.com/b"],
        )
        .page("https://example.com/a", &[])
        .page("https://example.com/b", &[]);
    let (crawler, _engine) = crawler(engine);

    let rule = CrawlRule {
        concurrent_requests: 1,
        delay: 2.0,
        respect_robots: false,
        ..CrawlRule::default()
    };
    let started = tokio::time::Instant::now();
    crawler
        .start_crawl(request("https://example.com/", rule))
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_secs(4));
}

#[tokio::test]
async fn test_async_submission_reaches_terminal_state() {
    let engine = MockEngine::new()
        .page("https://example.com/", &["https://example.com/a"])
        .page("https://example.com/a", &[])
        .with_latency(Duration::from_millis(10));
    let (crawler, _engine) = crawler(engine);

    let job_id = crawler
        .start_crawl_async(request("https://example.com/", fast_rule()))
        .unwrap();
    assert!(crawler.get_crawl_status(&job_id).is_some());

    let snapshot = crawler.wait_for_crawl(&job_id).await.unwrap();
    assert!(snapshot.status.is_terminal());
    assert_eq!(snapshot.status, JobStatus::Completed);
    assert!(snapshot.completed_at.is_some());
    assert_eq!(crawler.list_jobs().len(), 1);
}

#[tokio::test]
async fn test_results_survive_in_sqlite() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("jobs.db");

    let job_id = {
        let engine = Arc::new(
            MockEngine::new()
                .page("https://example.com/", &["https://example.com/a"])
                .page("https://example.com/a", &[]),
        );
        let storage = Arc::new(SqliteStorage::new(&db_path).unwrap());
        let crawler = Crawler::with_storage(Settings::default(), engine, storage);
        crawler
            .start_crawl(request("https://example.com/", fast_rule()))
            .await
            .unwrap()
    };

    let storage = Arc::new(SqliteStorage::new(&db_path).unwrap());
    let reopened = Crawler::with_storage(Settings::default(), Arc::new(MockEngine::new()), storage);

    let status = reopened.get_crawl_status(&job_id).unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.counters.pages_crawled, 2);

    let results = reopened.get_crawl_results(&job_id);
    assert_eq!(results.len(), 2);
    assert_eq!(results[1].url, "https://example.com/a");
    assert_eq!(reopened.list_jobs().len(), 1);
}

#[tokio::test]
async fn test_repeat_crawl_reuses_cached_pages() {
    let engine = Arc::new(
        MockEngine::new()
            .page("https://example.com/", &["https://example.com/a"])
            .page("https://example.com/a", &[]),
    );
    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let crawler = Crawler::with_storage(Settings::default(), engine.clone(), storage);

    let first = crawler
        .start_crawl(request("https://example.com/", fast_rule()))
        .await
        .unwrap();
    let second = crawler
        .start_crawl(request("https://example.com/", fast_rule()))
        .await
        .unwrap();

    assert_eq!(engine.fetched().len(), 2);
    let results = crawler.get_crawl_results(&second);
    assert_eq!(results.len(), 2);
    assert_eq!(results[1].url, "https://example.com/a");
    assert_eq!(results[1].depth(), 1);
    assert_eq!(
        results[1].metadata.discovered_from.as_deref(),
        Some("https://example.com/")
    );

    let stats = crawler.get_job_statistics();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.pages_crawled, 4);
    assert_eq!(crawler.get_crawl_status(&first).unwrap().counters.pages_crawled, 2);

    assert_eq!(crawler.cleanup_completed_jobs(None), 0);
    assert_eq!(crawler.cleanup_completed_jobs(Some(chrono::Duration::seconds(-1))), 2);
    assert!(crawler.get_crawl_status(&first).is_none());
}
