//! Link and image extraction, and in-page reference rewriting
//!
//! All functions resolve references with the page's [`LinkResolver`], so
//! root-relative references always go to the page host and document-relative
//! ones go to the `<base href>` when present.

use crate::crawler::{Dom, ImageOptions, LinkEditor, LinkOptions};
use crate::download::url_file_name;
use crate::storage::ImageRef;
use crate::url::{host_with_port, is_valid_link, strip_fragment, LinkResolver};
use crate::MirrorError;
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// Assigns file names that are unique within one extraction batch
///
/// The first `photo.jpg` keeps its name, the next ones become `photo(1).jpg`,
/// `photo(2).jpg`, ..., skipping any name already handed out.
#[derive(Debug, Default)]
pub struct UniqueNames {
    counts: HashMap<String, usize>,
    taken: HashSet<String>,
}

impl UniqueNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, name: &str) -> String {
        if self.taken.insert(name.to_string()) {
            self.counts.entry(name.to_string()).or_insert(0);
            return name.to_string();
        }

        let count = self.counts.entry(name.to_string()).or_insert(0);
        loop {
            *count += 1;
            let candidate = super::numbered_file_name(name, *count);
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

fn blacklisted(url: &str, blacklist: &[String]) -> bool {
    blacklist.iter().any(|b| url.contains(b.as_str()))
}

fn filtered_out(url: &str, filters: &[String]) -> bool {
    !filters.is_empty() && !filters.iter().any(|f| url.contains(f.as_str()))
}

/// Extracts the followable links of a page
///
/// For every `<a href>` inside `options.selector`, in document order:
///
/// 1. Invalid references (empty, `#...`, `mailto:`, `javascript:`, `data:`) are skipped
/// 2. The reference is resolved to an absolute URL
/// 3. With `filter_host`, links on another host are dropped (relative links
///    count as being on the page host)
/// 4. The fragment is removed and links to the page itself are dropped
/// 5. With `exclude_visited_links`, visited links are dropped; `is_visited` is
///    consulted unless `visited_links` is given
/// 6. `blacklist` and `filters` are applied as substring matches
/// 7. Duplicates are dropped, then `validator` has the last word
pub fn get_links(
    dom: &Dom,
    resolver: &LinkResolver,
    options: &LinkOptions,
    is_visited: impl Fn(&str) -> bool,
) -> Result<Vec<String>, MirrorError> {
    let page_host = host_with_port(resolver.page());
    let page_url = resolver.page().as_str();

    let mut links: Vec<String> = Vec::new();
    let mut seen = HashSet::new();

    for id in dom.select_in(&options.selector, "a")? {
        let Some(href) = dom.attr(id, "href") else {
            continue;
        };
        if !is_valid_link(href.trim()) {
            continue;
        }
        let Some(url) = resolver.resolve(href) else {
            trace!("Unresolvable link: {}", href);
            continue;
        };

        if let Some(filter_host) = &options.filter_host {
            let host = if resolver.is_relative(href) {
                page_host.clone()
            } else {
                host_with_port(&url)
            };
            if host.as_deref() != Some(filter_host.as_str()) {
                continue;
            }
        }

        let link = strip_fragment(url.as_str());
        if link == page_url {
            continue;
        }

        if options.exclude_visited_links {
            let visited = match &options.visited_links {
                Some(visited_links) => visited_links.contains(link),
                None => is_visited(link),
            };
            if visited {
                continue;
            }
        }

        if blacklisted(link, &options.blacklist) || filtered_out(link, &options.filters) {
            continue;
        }

        if seen.contains(link) {
            continue;
        }
        if let Some(validator) = &options.validator {
            if !validator(link) {
                continue;
            }
        }

        seen.insert(link.to_string());
        links.push(link.to_string());
    }

    Ok(links)
}

/// Extracts the images of a page
///
/// `data:` images are skipped, duplicates (by resolved URL) are dropped before
/// `blacklist` and `filters` are applied, and each image gets a file name that
/// is unique within the page.
pub fn get_images(
    dom: &Dom,
    resolver: &LinkResolver,
    options: &ImageOptions,
) -> Result<Vec<ImageRef>, MirrorError> {
    let mut images = Vec::new();
    let mut seen = HashSet::new();
    let mut names = UniqueNames::new();

    for id in dom.select_in(&options.selector, "img")? {
        let Some(src) = dom.attr(id, "src").map(str::trim) else {
            continue;
        };
        if src.is_empty() || src.starts_with("data:") {
            continue;
        }
        let Some(url) = resolver.resolve(src) else {
            continue;
        };

        let url = url.to_string();
        if !seen.insert(url.clone()) {
            continue;
        }
        if blacklisted(&url, &options.blacklist) || filtered_out(&url, &options.filters) {
            continue;
        }

        let file = names.assign(&url_file_name(&url));
        let mut image = ImageRef::new(url, file);
        image.alt = dom
            .attr(id, "alt")
            .filter(|alt| !alt.is_empty())
            .map(str::to_string);
        images.push(image);
    }

    Ok(images)
}

/// Rewrites every valid `<a href>` inside `selector` to its absolute URL
///
/// The optional `link_editor` gets the final say on each rewritten link.
/// Returns the number of rewritten links.
pub fn fix_links(
    dom: &mut Dom,
    resolver: &LinkResolver,
    selector: &str,
    link_editor: Option<&LinkEditor>,
) -> Result<usize, MirrorError> {
    let mut rewrites = Vec::new();
    for id in dom.select_in(selector, "a")? {
        let Some(href) = dom.attr(id, "href") else {
            continue;
        };
        let Some(url) = resolver.resolve(href) else {
            continue;
        };
        let link = match link_editor {
            Some(editor) => editor(url.as_str()),
            None => url.to_string(),
        };
        if link != href {
            rewrites.push((id, link));
        }
    }

    let count = rewrites.len();
    for (id, link) in rewrites {
        dom.set_attr(id, "href", link);
    }
    Ok(count)
}

/// Rewrites every `<img src>` inside `selector` to its absolute URL
pub fn fix_images(
    dom: &mut Dom,
    resolver: &LinkResolver,
    selector: &str,
) -> Result<usize, MirrorError> {
    let mut rewrites = Vec::new();
    for id in dom.select_in(selector, "img")? {
        let Some(src) = dom.attr(id, "src") else {
            continue;
        };
        if src.starts_with("data:") {
            continue;
        }
        if let Some(url) = resolver.resolve(src) {
            if url.as_str() != src {
                rewrites.push((id, url.to_string()));
            }
        }
    }

    let count = rewrites.len();
    for (id, url) in rewrites {
        dom.set_attr(id, "src", url);
    }
    Ok(count)
}

/// Points `<img src>` at the local copies of successfully downloaded images
///
/// Images whose download failed get their absolute remote URL. Elements that
/// match none of `images` are left alone.
pub fn localize_images(
    dom: &mut Dom,
    resolver: &LinkResolver,
    selector: &str,
    images: &[ImageRef],
) -> Result<usize, MirrorError> {
    let known: HashMap<&str, Option<&str>> = images
        .iter()
        .map(|image| {
            let local = (!image.is_failed() && !image.file.is_empty())
                .then_some(image.file.as_str());
            (image.src.as_str(), local)
        })
        .collect();

    let mut rewrites = Vec::new();
    for id in dom.select_in(selector, "img")? {
        let Some(src) = dom.attr(id, "src") else {
            continue;
        };
        let Some(url) = resolver.resolve(src) else {
            continue;
        };
        let target = match known.get(url.as_str()) {
            Some(Some(file)) => file.to_string(),
            Some(None) => url.to_string(),
            None => continue,
        };
        if target != src {
            rewrites.push((id, target));
        }
    }

    let count = rewrites.len();
    for (id, target) in rewrites {
        dom.set_attr(id, "src", target);
    }
    Ok(count)
}
