//! Shared HTTP client.

use reqwest::{Client, Proxy, RequestBuilder};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ProxyConfig;

/// Browser-like user agent for sources that refuse obvious bots on the
/// plain GET path.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Shared reqwest client with crate-wide defaults.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Arc<Client>,
}

/// Errors building the shared client (bad proxy URL, TLS setup).
#[derive(Debug, thiserror::Error)]
#[error("failed to build HTTP client: {0}")]
pub struct HttpClientError(String);

impl HttpClient {
    /// Create a client with the default crate user agent and no proxy.
    pub fn new() -> Result<Self, HttpClientError> {
        Self::with_proxy(&ProxyConfig::default())
    }

    /// Create a client honoring the `[proxy]` configuration section.
    pub fn with_proxy(proxy: &ProxyConfig) -> Result<Self, HttpClientError> {
        let mut builder = Client::builder()
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90));

        let no_proxy = proxy
            .no_proxy
            .as_deref()
            .and_then(reqwest::NoProxy::from_string);
        if let Some(url) = &proxy.http {
            let p = Proxy::http(url).map_err(|e| HttpClientError(e.to_string()))?;
            builder = builder.proxy(p.no_proxy(no_proxy.clone()));
        }
        if let Some(url) = &proxy.https {
            let p = Proxy::https(url).map_err(|e| HttpClientError(e.to_string()))?;
            builder = builder.proxy(p.no_proxy(no_proxy));
        }

        let client = builder
            .build()
            .map_err(|e| HttpClientError(e.to_string()))?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    /// Start a GET request.
    pub fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url)
    }

    /// Start a GET request masquerading as a desktop browser.
    pub fn get_as_browser(&self, url: &str) -> RequestBuilder {
        self.client
            .get(url)
            .header(reqwest::header::USER_AGENT, BROWSER_USER_AGENT)
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/pdf,*/*;q=0.8",
            )
    }

    /// The underlying reqwest client.
    pub fn client(&self) -> &Client {
        &self.client
    }
}
