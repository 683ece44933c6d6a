//! Per-visit page data and the on-disk layout of the mirror
//!
//! A page `http://host[:port]/a/b?q` is stored as
//! `{output_dir}/host[:port]/a/b/index-q.html`, and its images live in the
//! same directory.

use crate::crawler::CrawlOptions;
use crate::state::PageState;
use crate::url::{host_with_port, parse_page_url, LinkResolver};
use crate::UrlResult;
use std::path::{Path, PathBuf};
use url::Url;

/// A page being processed
///
/// Derived fresh on every visit (or from the cached HTML) and never persisted.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// URL the page was requested as; keys its crawl state and its place in
    /// the mirror
    pub key: String,
    /// Page URL after redirects
    pub url: String,
    /// `<base href>` of the document
    pub base_url: Option<String>,
    pub title: String,
    /// Directory of the page's `index.html` and images
    pub output_dir: PathBuf,
    pub html: String,
    /// True when the HTML came from the local cache
    pub html_cached: bool,
    pub state: PageState,
    /// Links collected for the next crawl round
    pub links: Vec<String>,
}

impl Page {
    /// Builds the link resolver for this page
    pub fn resolver(&self) -> UrlResult<LinkResolver> {
        LinkResolver::new(&self.url, self.base_url.as_deref())
    }
}

fn push_url_path(dir: &mut PathBuf, url: &Url) {
    if let Some(host) = host_with_port(url) {
        dir.push(host);
    }
    if let Some(segments) = url.path_segments() {
        for segment in segments.filter(|s| !s.is_empty() && *s != "." && *s != "..") {
            dir.push(segment);
        }
    }
}

/// Directory a page is mirrored into
pub fn page_output_dir(page_url: &str, output_dir: &Path) -> UrlResult<PathBuf> {
    let url = parse_page_url(page_url)?;
    let mut dir = output_dir.to_path_buf();
    push_url_path(&mut dir, &url);
    Ok(dir)
}

/// Path of a page's saved HTML
///
/// Pages with a query string get `index-{query}.html`, with path separators in
/// the query replaced by `_`. With `html_file_root` set, HTML files go below
/// `{output_dir}/{html_file_root}` instead of `output_dir`.
pub fn index_html_path(page_url: &str, options: &CrawlOptions) -> UrlResult<PathBuf> {
    let url = parse_page_url(page_url)?;

    let mut dir = options.output_dir.clone();
    if let Some(root) = &options.html_file_root {
        dir.push(root);
    }
    push_url_path(&mut dir, &url);

    let file = match url.query().filter(|q| !q.is_empty()) {
        Some(query) => format!("index-{}.html", query.replace(['/', '\\'], "_")),
        None => "index.html".to_string(),
    };
    Ok(dir.join(file))
}

/// Appends `(n)` to a file name's stem
pub fn numbered_file_name(name: &str, n: usize) -> String {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match path.extension() {
        Some(ext) => format!("{}({}).{}", stem, n, ext.to_string_lossy()),
        None => format!("{}({})", stem, n),
    }
}

/// Returns a path that does not exist yet
///
/// `dir/a.jpg` becomes `dir/a(1).jpg`, `dir/a(2).jpg`, ... until a free name is found.
pub fn unique_file_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut candidate = path.to_path_buf();
    let mut n = 0;
    while candidate.exists() {
        n += 1;
        candidate = path.with_file_name(numbered_file_name(&name, n));
    }
    candidate
}
