//! Raw file acquisition.
//!
//! Public datasets publish an HTML directory listing per module; every
//! `.csv.gz` link in it is downloaded into `raw_files/<dataset>/<module>/`.

use crate::error::CatalogError;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Absolute URLs of the raw files linked from `listing_url`.
    async fn list(&self, listing_url: &str) -> Result<Vec<String>, CatalogError>;

    /// Download `url` to `dest`; returns the bytes written.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, CatalogError>;
}

static HREF: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?i)href\s*=\s*["']([^"']+)["']"#).ok());

/// Links to `.csv.gz` files in an HTML listing, resolved against `base`.
///
/// Query strings, fragments and parent-relative links are skipped.
pub fn scrape_links(base: &Url, html: &str) -> Vec<String> {
    let Some(href) = HREF.as_ref() else {
        return Vec::new();
    };
    let mut links: Vec<String> = href
        .captures_iter(html)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .filter(|h| !h.starts_with('?') && !h.starts_with('#') && !h.contains(".."))
        .filter(|h| h.to_ascii_lowercase().ends_with(".csv.gz"))
        .filter_map(|h| base.join(h).ok())
        .map(|u| u.to_string())
        .collect();
    links.sort();
    links.dedup();
    links
}

/// Fetches over HTTP(S).
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("m3/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn list(&self, listing_url: &str) -> Result<Vec<String>, CatalogError> {
        let base = Url::parse(listing_url)
            .map_err(|e| CatalogError::Fetch(format!("bad listing URL {listing_url}: {e}")))?;
        let html = self
            .client
            .get(base.clone())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let links = scrape_links(&base, &html);
        tracing::debug!(listing = %listing_url, files = links.len(), "Scraped listing");
        Ok(links)
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64, CatalogError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(dest);

        let result = async {
            let mut response = self.client.get(url).send().await?.error_for_status()?;
            let mut file = tokio::fs::File::create(&partial).await?;
            let mut written = 0u64;
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok::<u64, CatalogError>(written)
        }
        .await;

        match result {
            Ok(written) => {
                tokio::fs::rename(&partial, dest).await?;
                Ok(written)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                Err(e)
            }
        }
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Last path segment of a file URL.
pub(crate) fn file_name_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .next_back()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_scrape_keeps_csv_gz_only() {
        let base = Url::parse("https://example.org/files/demo/2.2/hosp/").unwrap();
        let html = r##"
            <a href="../">Parent</a>
            <a href="?C=N;O=D">Name</a>
            <a href="#top">top</a>
            <a href="admissions.csv.gz">admissions.csv.gz</a>
            <A HREF='patients.csv.gz'>patients</A>
            <a href="index.html">index</a>
            <a href="../icu/icustays.csv.gz">sneaky</a>
            <a href="admissions.csv.gz">dup</a>
        "##;
        assert_eq!(
            scrape_links(&base, html),
            vec![
                "https://example.org/files/demo/2.2/hosp/admissions.csv.gz".to_string(),
                "https://example.org/files/demo/2.2/hosp/patients.csv.gz".to_string(),
            ]
        );
    }

    #[test]
    fn test_file_name_of() {
        assert_eq!(
            file_name_of("https://x.org/a/hosp/labevents.csv.gz").as_deref(),
            Some("labevents.csv.gz")
        );
        assert_eq!(file_name_of("https://x.org/a/"), None);
        assert_eq!(file_name_of("not a url"), None);
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/raw/hosp/a.csv.gz")),
            PathBuf::from("/raw/hosp/a.csv.gz.part")
        );
    }
}
