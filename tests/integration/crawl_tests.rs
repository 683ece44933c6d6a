//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and test
//! the full mirror cycle end-to-end.

use std::path::{Path, PathBuf};
use std::time::Duration;
use sumi_mirror::config::parse_config;
use sumi_mirror::crawler::{
    index_html_path, run_crawl, CrawlOptions, Coordinator, MirrorHandler, Saver,
};
use sumi_mirror::storage::{JsonStateStore, StateStore};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STATE_FILE: &str = "saver.json";

/// Crawl options for a scratch output directory, without delays
fn test_options(output_dir: &Path) -> CrawlOptions {
    let mut options = CrawlOptions::new(output_dir);
    options.page_delay = Duration::ZERO;
    options.download.backoff_delay = Duration::from_millis(10);
    options.download.request_timeout = Duration::from_secs(5);
    options
}

/// A coordinator with the mirror handler and a state file in the output directory
fn mirror(options: CrawlOptions) -> Coordinator {
    let saver = Saver::open(&options, STATE_FILE)
        .expect("Failed to open saver")
        .with_handler(MirrorHandler);
    Coordinator::new(saver, options)
}

fn host_dir(output_dir: &Path, server: &MockServer) -> PathBuf {
    let address = server.address();
    output_dir.join(format!("{}:{}", address.ip(), address.port()))
}

async fn mount_html(server: &MockServer, route: &str, html: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(html, "text/html"))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_image(server: &MockServer, route: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0xFF, 0xD8, 0xFF], "image/jpeg"))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_mirror_saves_page_and_images() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_html(
        &server,
        "/",
        r#"<html><head><title>
Home
</title></head><body>
<img src="/a/photo.jpg" alt="first">
<img src="b/photo.jpg">
<a href="/about">About</a>
</body></html>"#
            .to_string(),
    )
    .await;
    mount_image(&server, "/a/photo.jpg").await;
    mount_image(&server, "/b/photo.jpg").await;

    let dir = TempDir::new().unwrap();
    let coordinator = mirror(test_options(dir.path()));
    let seed = format!("{}/", base);

    let page = coordinator
        .saver()
        .process_page(&seed, coordinator.options())
        .await
        .expect("Page should be mirrored");

    assert_eq!(page.title, "Home");
    assert!(!page.html_cached);
    assert_eq!(page.links, vec![format!("{}/about", base)]);

    let site = host_dir(dir.path(), &server);
    assert_eq!(page.output_dir, site);
    assert!(site.join("photo.jpg").is_file());
    assert!(site.join("photo(1).jpg").is_file());

    let html = std::fs::read_to_string(site.join("index.html")).unwrap();
    assert!(html.contains(r#"src="photo.jpg""#));
    assert!(html.contains(r#"src="photo(1).jpg""#));
    assert!(html.contains(r#"alt="first""#));
    assert!(html.contains(&format!(r#"href="{}/about""#, base)));

    let record = coordinator.saver().record(&seed).unwrap();
    assert!(record.visited);
    assert!(record.done);
    assert_eq!(record.images.len(), 2);
    assert_eq!(record.images[1].file, "photo(1).jpg");
    assert_eq!(record.images[0].alt.as_deref(), Some("first"));
}

#[tokio::test]
async fn test_recrawl_makes_no_requests() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_html(
        &server,
        "/",
        r#"<html><body><img src="/logo.jpg"></body></html>"#.to_string(),
    )
    .await;
    mount_image(&server, "/logo.jpg").await;

    let dir = TempDir::new().unwrap();
    let links = vec![format!("{}/", base)];

    let first = mirror(test_options(dir.path()));
    let report = first.process_pages(&links).await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.downloaded(), 1);
    assert!(first.finish().unwrap());
    assert!(dir.path().join(STATE_FILE).is_file());

    // A second run over the same links finds them done in the state file.
    let second = mirror(test_options(dir.path()));
    let report = second.process_pages(&links).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.processed, 0);
    second.finish().unwrap();

    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_forced_run_uses_cache() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_html(
        &server,
        "/docs",
        r#"<html><body><img src="/img/diagram.jpg"></body></html>"#.to_string(),
    )
    .await;
    mount_image(&server, "/img/diagram.jpg").await;

    let dir = TempDir::new().unwrap();
    let links = vec![format!("{}/docs", base)];

    let first = mirror(test_options(dir.path()));
    first.process_pages(&links).await.unwrap();
    first.finish().unwrap();

    let mut options = test_options(dir.path());
    options.force = true;
    let second = mirror(options);
    let report = second.process_pages(&links).await.unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.cached, 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);

    let html_path = index_html_path(&links[0], second.options()).unwrap();
    let html = std::fs::read_to_string(html_path).unwrap();
    assert!(html.contains(r#"src="diagram.jpg""#));
}

#[tokio::test]
async fn test_failed_page_is_marked_visited() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data.json"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
        .expect(1)
        .mount(&server)
        .await;
    mount_html(&server, "/ok", "<html><body>ok</body></html>".to_string()).await;

    let dir = TempDir::new().unwrap();
    let coordinator = mirror(test_options(dir.path()));
    let gone = format!("{}/gone", base);
    let json = format!("{}/data.json", base);
    let ok = format!("{}/ok", base);

    let report = coordinator
        .process_pages(&[gone.clone(), json.clone(), ok.clone()])
        .await
        .expect("Only the last page decides the result");

    assert_eq!(report.processed, 1);
    assert_eq!(report.failed.len(), 2);
    assert_eq!(report.failed[0].url, gone);

    let saver = coordinator.saver();
    assert!(saver.is_visited(&gone));
    assert!(!saver.is_done(&gone));
    assert!(saver.is_visited(&json));
    assert!(saver.is_done(&ok));
    coordinator.finish().unwrap();

    // Later runs skip the broken page instead of fetching it again.
    for _ in 0..2 {
        let rerun = mirror(test_options(dir.path()));
        let report = rerun.process_pages(&[gone.clone()]).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert!(report.failed.is_empty());
        rerun.finish().unwrap();
    }
}

#[tokio::test]
async fn test_redirected_page_recrawl_makes_no_requests() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/new"))
        .expect(1)
        .mount(&server)
        .await;
    mount_html(
        &server,
        "/new",
        r#"<html><body><a href="/other">Other</a></body></html>"#.to_string(),
    )
    .await;

    let dir = TempDir::new().unwrap();
    let old = format!("{}/old", base);
    let links = vec![old.clone()];

    let first = mirror(test_options(dir.path()));
    let report = first.process_pages(&links).await.unwrap();
    assert_eq!(report.downloaded(), 1);
    assert_eq!(report.discovered, vec![format!("{}/other", base)]);

    let record = first.saver().record(&old).unwrap();
    assert!(record.visited);
    assert!(record.done);
    assert!(index_html_path(&old, first.options()).unwrap().is_file());
    first.finish().unwrap();
    assert_eq!(server.received_requests().await.unwrap().len(), 2);

    let second = mirror(test_options(dir.path()));
    let report = second.process_pages(&links).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.processed, 0);
    second.finish().unwrap();
    assert_eq!(server.received_requests().await.unwrap().len(), 2);

    // A forced run is served from the cache written under the requested URL.
    let mut options = test_options(dir.path());
    options.force = true;
    let third = mirror(options);
    let report = third.process_pages(&links).await.unwrap();
    assert_eq!(report.cached, 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_failed_images_are_recorded() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_html(
        &server,
        "/",
        r#"<html><body><img src="/ok.jpg"><img src="/missing.jpg"></body></html>"#
            .to_string(),
    )
    .await;
    mount_image(&server, "/ok.jpg").await;
    Mock::given(method("GET"))
        .and(path("/missing.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let coordinator = mirror(test_options(dir.path()));
    let seed = format!("{}/", base);
    coordinator.process_pages(&[seed.clone()]).await.unwrap();

    let record = coordinator.saver().record(&seed).unwrap();
    assert!(record.done);
    let missing = record
        .images
        .iter()
        .find(|i| i.src.ends_with("/missing.jpg"))
        .unwrap();
    assert_eq!(missing.error, Some(true));
    assert_eq!(missing.error_code.as_deref(), Some("404"));

    // The broken image keeps pointing at the site.
    let html = std::fs::read_to_string(host_dir(dir.path(), &server).join("index.html")).unwrap();
    assert!(html.contains(&format!(r#"src="{}/missing.jpg""#, base)));
    assert!(html.contains(r#"src="ok.jpg""#));
}

#[tokio::test]
async fn test_run_crawl_follows_same_host_links() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_html(
        &server,
        "/",
        format!(
            r#"<html><body>
<a href="/page1">Page 1</a>
<a href="{}/page2#top">Page 2</a>
<a href="http://other.invalid/page">Elsewhere</a>
<a href="mailto:someone@example.com">Mail</a>
</body></html>"#,
            base
        ),
    )
    .await;
    mount_html(
        &server,
        "/page1",
        r#"<html><body><a href="/deeper">Deeper</a></body></html>"#.to_string(),
    )
    .await;
    mount_html(&server, "/page2", "<html><body>two</body></html>".to_string()).await;

    let dir = TempDir::new().unwrap();
    let config = parse_config(&format!(
        r#"
seeds = ["{base}/"]

[crawler]
output-dir = "{out}"
max-depth = 1
page-delay = 0
backoff-delay = 10
"#,
        base = base,
        out = dir.path().display()
    ))
    .unwrap();

    let report = run_crawl(&config, config.crawl_options()).await.unwrap();

    assert_eq!(report.processed, 3);
    assert!(report.failed.is_empty());
    assert!(report.discovered.contains(&format!("{}/deeper", base)));
    assert!(!report
        .discovered
        .iter()
        .any(|link| link.contains("other.invalid")));

    let state = JsonStateStore::open(dir.path().join(STATE_FILE));
    assert_eq!(state.entries().len(), 3);
    assert!(state.is_done(&format!("{}/page2", base)));
    assert!(host_dir(dir.path(), &server)
        .join("page1")
        .join("index.html")
        .is_file());
}

#[tokio::test]
async fn test_scrape_page_metadata() {
    use sumi_mirror::crawler::{scrape, ScrapeOptions};
    use sumi_mirror::download::Downloader;

    let server = MockServer::start().await;
    let base = server.uri();

    mount_html(
        &server,
        "/article",
        r#"<html><head>
<title>An
Article</title>
<meta property="og:title" content="OG Article">
<meta property="og:description" content="Shared text">
<meta property="og:image" content="http://cdn.example.net/cover.jpg">
</head><body>
<img src="/img/one.jpg" alt="One">
<a href="/next#comments">Next</a>
<a href="/logout">Log out</a>
</body></html>"#
            .to_string(),
    )
    .await;

    let options = ScrapeOptions {
        include_images: true,
        include_links: true,
        include_og: true,
        link_blacklist: vec!["/logout".to_string()],
        ..Default::default()
    };
    let downloader = Downloader::with_user_agent("TestMirror/1.0").unwrap();
    let info = scrape(&downloader, &format!("{}/article", base), &options, &[])
        .await
        .unwrap();

    assert_eq!(info.title.as_deref(), Some("AnArticle"));
    assert_eq!(info.description.as_deref(), Some("Shared text"));
    assert_eq!(info.image.as_deref(), Some("http://cdn.example.net/cover.jpg"));
    assert_eq!(info.og.unwrap().title.as_deref(), Some("OG Article"));

    let images = info.images.unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].src, format!("{}/img/one.jpg", base));

    let links = info.links.unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].url, format!("{}/next", base));
    assert_eq!(links[0].title, "Next");
}

#[tokio::test]
async fn test_scrape_runs_matching_scrapers_in_order() {
    use std::sync::Arc;
    use sumi_mirror::crawler::{scrape, Dom, PageInfo, ScrapeOptions, Scraper};
    use sumi_mirror::download::Downloader;

    struct Suffix {
        name: &'static str,
        path: &'static str,
    }

    impl Scraper for Suffix {
        fn name(&self) -> &str {
            self.name
        }

        fn matches(&self, url: &str, _options: &ScrapeOptions) -> bool {
            url.ends_with(self.path)
        }

        fn scrape(&self, dom: &Dom, info: &mut PageInfo, _options: &ScrapeOptions) {
            let title = info.title.clone().or_else(|| dom.title()).unwrap_or_default();
            info.title = Some(format!("{}+{}", title, self.name));
        }
    }

    let server = MockServer::start().await;
    mount_html(
        &server,
        "/post",
        "<html><head><title>Post</title></head><body></body></html>".to_string(),
    )
    .await;

    let scrapers: Vec<Arc<dyn Scraper>> = vec![
        Arc::new(Suffix { name: "first", path: "/post" }),
        Arc::new(Suffix { name: "other", path: "/elsewhere" }),
        Arc::new(Suffix { name: "second", path: "/post" }),
    ];
    let downloader = Downloader::with_user_agent("TestMirror/1.0").unwrap();
    let info = scrape(
        &downloader,
        &format!("{}/post", server.uri()),
        &ScrapeOptions::default(),
        &scrapers,
    )
    .await
    .unwrap();

    assert_eq!(info.title.as_deref(), Some("Post+first+second"));
}
