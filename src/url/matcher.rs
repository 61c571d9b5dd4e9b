use super::domain::registrable_domain;

/// Checks whether `candidate` is `base` itself or one of its subdomains
///
/// Both hosts are first reduced to the comparison point: `candidate` must end
/// with `.` followed by the registrable domain of `base`, or equal it.
/// `blog.example.com` and `www.example.com` therefore both belong to a crawl
/// started at `example.com` or at `www.example.com`.
///
/// # Examples
///
/// ```
/// use tidecrawl::url::is_same_or_subdomain;
///
/// assert!(is_same_or_subdomain("blog.example.com", "example.com"));
/// assert!(is_same_or_subdomain("blog.example.com", "www.example.com"));
/// assert!(!is_same_or_subdomain("example.org", "example.com"));
/// assert!(!is_same_or_subdomain("notexample.com", "example.com"));
/// ```
pub fn is_same_or_subdomain(candidate: &str, base: &str) -> bool {
    let candidate = candidate.trim_end_matches('.').to_lowercase();
    let root = registrable_domain(base);
    candidate == root || candidate.ends_with(&format!(".{}", root))
}
