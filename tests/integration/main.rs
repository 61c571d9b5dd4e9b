//! Integration tests for Tidecrawl
//!
//! Traversal, batch and session behaviour is driven through a scripted
//! in-memory engine; `http_tests` exercises the bundled HTTP engine against
//! wiremock servers.

mod batch_tests;
mod common;
mod crawl_tests;
mod http_tests;
