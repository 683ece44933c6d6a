//! HTML page fetches

use crate::download::{DownloadError, DownloadOptions, Downloader, DownloadTarget};
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use tracing::debug;
use url::form_urlencoded;

/// A fetched HTML document
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL the caller asked for
    pub requested_url: String,
    /// URL after redirects (the requested URL when fetched through a proxy)
    pub resolved_url: String,
    pub content_type: Option<String>,
    pub html: String,
}

/// Builds the proxy request URL for a page
pub fn proxied_url(proxy: &str, url: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(url.as_bytes()).collect();
    format!("{}?url={}", proxy, encoded)
}

impl Downloader {
    /// Fetches an HTML page into memory
    ///
    /// Uses the same retry policy as file downloads. Only status 200 is
    /// accepted, and a response whose content type does not mention `html`
    /// fails with [`DownloadError::NotHtml`].
    pub async fn download_page(
        &self,
        url: &str,
        options: &DownloadOptions,
    ) -> Result<FetchedPage, DownloadError> {
        let request_url = match &options.html_proxy {
            Some(proxy) => proxied_url(proxy, url),
            None => url.to_string(),
        };
        let request_url = request_url.as_str();

        let result = self
            .with_retries(url, None, options, move || {
                self.fetch_page(url, request_url, options)
            })
            .await;

        if let Err(e) = &result {
            options.callbacks.failed(
                e,
                &DownloadTarget {
                    url,
                    local_file: None,
                },
            );
        }
        result
    }

    async fn fetch_page(
        &self,
        url: &str,
        request_url: &str,
        options: &DownloadOptions,
    ) -> Result<FetchedPage, DownloadError> {
        options.callbacks.start(&DownloadTarget {
            url,
            local_file: None,
        });

        let mut request = self.request(request_url, options);
        if options.request_headers.is_empty() {
            let agent = options
                .user_agent
                .as_deref()
                .unwrap_or(crate::download::DEFAULT_USER_AGENT);
            request = request.header(USER_AGENT, agent);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::from_reqwest(url, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(DownloadError::NotFound {
                url: url.to_string(),
            });
        }
        if status != StatusCode::OK {
            return Err(DownloadError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if let Some(ct) = &content_type {
            if !ct.to_ascii_lowercase().contains("html") {
                return Err(DownloadError::NotHtml {
                    url: url.to_string(),
                    content_type: ct.clone(),
                });
            }
        }

        let resolved_url = if options.html_proxy.is_some() {
            url.to_string()
        } else {
            response.url().to_string()
        };

        let html = response
            .text()
            .await
            .map_err(|e| DownloadError::from_reqwest(url, e))?;

        debug!("Fetched page {} ({} bytes)", resolved_url, html.len());

        Ok(FetchedPage {
            requested_url: url.to_string(),
            resolved_url,
            content_type,
            html,
        })
    }
}
