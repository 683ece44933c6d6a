use crate::url::domain::host_url;
use crate::{UrlError, UrlResult};
use url::Url;

/// Returns true if an `href`/`src` value should be followed or rewritten
///
/// Empty values, fragment-only anchors, `mailto:` links and `javascript:` /
/// `data:` URIs are filtered out. This is a filtering decision, not an error.
pub fn is_valid_link(href: &str) -> bool {
    !(href.is_empty()
        || href.starts_with('#')
        || href.contains("mailto:")
        || href.starts_with("javascript:")
        || href.starts_with("data:"))
}

/// Parses a page URL, requiring it to carry a host
pub fn parse_page_url(page_url: &str) -> UrlResult<Url> {
    let url = Url::parse(page_url).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }
    if url.host_str().is_none() {
        return Err(UrlError::MissingDomain);
    }

    Ok(url)
}

/// Resolves references found in one page
///
/// A resolver is built once per page from the page URL and its optional
/// `<base href>` and then applied to every link and image of that page.
///
/// # Resolution Rules
///
/// 1. Invalid references (see [`is_valid_link`]) resolve to `None`
/// 2. A leading `http:///` artifact is turned into a root-relative path
/// 3. Protocol-relative references (`//host/path`) take the page's scheme
/// 4. Absolute references are re-serialized in canonical form
/// 5. Root-relative references (`/path`) resolve against the page's host URL,
///    even when the page has a `<base>` tag
/// 6. Document-relative references resolve against the base URL if present,
///    otherwise against the page URL
#[derive(Debug, Clone)]
pub struct LinkResolver {
    page: Url,
    host: Url,
    base: Url,
}

impl LinkResolver {
    /// Creates a resolver for a page
    ///
    /// A `<base href>` that is itself relative is resolved against the page URL;
    /// one that cannot be parsed at all is ignored.
    pub fn new(page_url: &str, base_url: Option<&str>) -> UrlResult<Self> {
        let page = parse_page_url(page_url)?;
        let host = host_url(&page)?;

        let base = base_url
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .and_then(|b| page.join(b).ok())
            .unwrap_or_else(|| page.clone());

        Ok(Self { page, host, base })
    }

    /// The page URL this resolver was built for
    pub fn page(&self) -> &Url {
        &self.page
    }

    /// Scheme + host of the page
    pub fn host(&self) -> &Url {
        &self.host
    }

    /// Effective base for document-relative references
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Resolves a raw reference to an absolute URL
    pub fn resolve(&self, raw: &str) -> Option<Url> {
        let raw = raw.trim();
        if !is_valid_link(raw) {
            return None;
        }

        let mut href = raw.replacen("http:///", "/", 1);

        if href.starts_with("//") {
            href = format!("{}:{}", self.page.scheme(), href);
        }

        if let Ok(absolute) = Url::parse(&href) {
            return Some(absolute);
        }

        let anchor = if href.starts_with('/') {
            &self.host
        } else {
            &self.base
        };

        anchor.join(&href).ok()
    }

    /// Returns true if the reference has no host of its own
    ///
    /// Such references inherit the page host, which matters for `filter_host`.
    pub fn is_relative(&self, raw: &str) -> bool {
        let href = raw.trim().replacen("http:///", "/", 1);
        !href.starts_with("//") && Url::parse(&href).is_err()
    }
}

/// Resolves a single reference against a page URL and optional base URL
///
/// Returns `None` for references that are never followed (see [`is_valid_link`])
/// or that cannot be resolved.
///
/// # Examples
///
/// ```
/// use sumi_mirror::url::normalize_link;
///
/// let page = "http://example.com/a/b";
/// let base = Some("http://example.com/base/");
///
/// let root = normalize_link("/x", page, base).unwrap();
/// assert_eq!(root.as_str(), "http://example.com/x");
///
/// let relative = normalize_link("x", page, base).unwrap();
/// assert_eq!(relative.as_str(), "http://example.com/base/x");
/// ```
pub fn normalize_link(raw: &str, page_url: &str, base_url: Option<&str>) -> Option<Url> {
    LinkResolver::new(page_url, base_url).ok()?.resolve(raw)
}
