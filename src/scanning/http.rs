use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::PlatformScanner;
use crate::models::{Platform, RawItem};

/// Scanner backed by a search gateway exposing
/// `GET {gateway}/{platform}/search?q=<term>&limit=<n>`.
pub struct HttpScanner {
    client: Client,
    endpoint: Url,
    platform: Platform,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SearchResponse {
    Wrapped { items: Vec<RawItem> },
    Bare(Vec<RawItem>),
}

impl HttpScanner {
    pub fn new(gateway: &str, platform: Platform, timeout: Duration) -> anyhow::Result<Self> {
        let mut base = Url::parse(gateway).context("SCANNER_GATEWAY_URL must be a valid URL")?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join(&format!("{}/search", platform.as_str()))
            .context("failed to build scanner endpoint")?;
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hotdog-pipeline/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            endpoint,
            platform,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl PlatformScanner for HttpScanner {
    async fn search(&self, term: &str, limit: usize) -> anyhow::Result<Vec<RawItem>> {
        let limit_param = limit.to_string();
        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[("q", term), ("limit", limit_param.as_str())])
            .send()
            .await
            .map_err(|err| anyhow!("{} search request failed: {err}", self.platform))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            bail!("{} rate limit exceeded (429 Too Many Requests)", self.platform);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("{} search failed with status {status}: {body}", self.platform);
        }

        let items = match response
            .json::<SearchResponse>()
            .await
            .with_context(|| format!("{} returned an unreadable search payload", self.platform))?
        {
            SearchResponse::Wrapped { items } | SearchResponse::Bare(items) => items,
        };
        debug!(platform = %self.platform, term, count = items.len(), "search returned items");
        Ok(items.into_iter().take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_endpoint_under_gateway_path() {
        let scanner =
            HttpScanner::new("http://gateway.local/api", Platform::Reddit, Duration::from_secs(5))
                .unwrap();
        assert_eq!(
            scanner.endpoint().as_str(),
            "http://gateway.local/api/reddit/search"
        );

        let scanner =
            HttpScanner::new("http://gateway.local/", Platform::Bluesky, Duration::from_secs(5))
                .unwrap();
        assert_eq!(
            scanner.endpoint().as_str(),
            "http://gateway.local/bluesky/search"
        );
    }

    #[test]
    fn accepts_wrapped_and_bare_payloads() {
        let wrapped: SearchResponse =
            serde_json::from_str(r#"{"items":[{"original_url":"https://x/1","text":"hotdog"}]}"#)
                .unwrap();
        let bare: SearchResponse =
            serde_json::from_str(r#"[{"original_url":"https://x/2"}]"#).unwrap();
        assert!(matches!(wrapped, SearchResponse::Wrapped { items } if items.len() == 1));
        assert!(matches!(
            bare,
            SearchResponse::Bare(items) if items[0].original_url == "https://x/2"
        ));
    }
}
