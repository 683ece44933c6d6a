use crate::{UrlError, UrlResult};
use url::Url;

/// Extracts the domain from a URL
///
/// This function retrieves the host portion of a URL and converts it to lowercase.
/// If the URL has no host, it returns None.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_mirror::url::extract_domain;
///
/// let url = Url::parse("https://EXAMPLE.COM/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Returns the host of a URL including a non-default port (`host[:port]`)
///
/// This is the form used when comparing against the `filter_host` option and
/// when building the on-disk mirror layout.
pub fn host_with_port(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    match url.port() {
        Some(port) => Some(format!("{}:{}", host, port)),
        None => Some(host.to_string()),
    }
}

/// Returns the host URL (scheme + host only) of a page URL
///
/// Root-relative references (`/path`) are always resolved against this URL,
/// never against a `<base>` tag.
///
/// ```
/// use url::Url;
/// use sumi_mirror::url::host_url;
///
/// let page = Url::parse("http://example.com:8080/a/b?q=1").unwrap();
/// assert_eq!(host_url(&page).unwrap().as_str(), "http://example.com:8080/");
/// ```
pub fn host_url(url: &Url) -> UrlResult<Url> {
    if url.host_str().is_none() {
        return Err(UrlError::MissingDomain);
    }
    url.join("/").map_err(|e| UrlError::Parse(e.to_string()))
}
