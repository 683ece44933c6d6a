use crate::config::types::{Config, CrawlerConfig, ImagesConfig, LinksConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_links_config(&config.links)?;
    validate_images_config(&config.images)?;
    validate_seeds(&config.seeds)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.output_dir.trim().is_empty() {
        return Err(ConfigError::Validation(
            "output-dir cannot be empty".to_string(),
        ));
    }

    validate_file_name(&config.state_file_name)?;

    if config.max_download_threads < 1 || config.max_download_threads > 64 {
        return Err(ConfigError::Validation(format!(
            "max-download-threads must be between 1 and 64, got {}",
            config.max_download_threads
        )));
    }

    if config.request_timeout == 0 {
        return Err(ConfigError::Validation(
            "request-timeout must be > 0ms".to_string(),
        ));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max-attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if let Some(root) = &config.html_file_root {
        if root.trim().is_empty() {
            return Err(ConfigError::Validation(
                "html-file-root cannot be empty when set".to_string(),
            ));
        }
    }

    if let Some(proxy) = &config.html_proxy {
        validate_http_url(proxy, "html-proxy")?;
    }

    Ok(())
}

/// Validates link extraction configuration
fn validate_links_config(config: &LinksConfig) -> Result<(), ConfigError> {
    validate_selector(&config.selector, "links")?;

    if let Some(host) = &config.filter_host {
        if host.is_empty() || host.contains('/') {
            return Err(ConfigError::Validation(format!(
                "links.filter-host must be a bare host name, got '{}'",
                host
            )));
        }
    }

    Ok(())
}

/// Validates image extraction configuration
fn validate_images_config(config: &ImagesConfig) -> Result<(), ConfigError> {
    validate_selector(&config.selector, "images")
}

/// Validates seed URLs
fn validate_seeds(seeds: &[String]) -> Result<(), ConfigError> {
    for seed in seeds {
        validate_http_url(seed, "seed")?;
    }
    Ok(())
}

/// Validates a CSS selector
fn validate_selector(selector: &str, section: &str) -> Result<(), ConfigError> {
    scraper::Selector::parse(selector).map_err(|e| {
        ConfigError::Validation(format!(
            "{}.selector '{}' is not a valid CSS selector: {:?}",
            section, selector, e
        ))
    })?;
    Ok(())
}

/// Validates that a name is a plain file name
fn validate_file_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(ConfigError::Validation(format!(
            "state-file-name must be a plain file name, got '{}'",
            name
        )));
    }
    Ok(())
}

/// Validates an absolute http(s) URL with a host
fn validate_http_url(value: &str, what: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", what, value, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} '{}' must use http or https",
            what, value
        )));
    }

    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "{} '{}' has no host",
            what, value
        )));
    }

    Ok(())
}
