//! Publisher landing-page source with a bot-protection fallback.
//!
//! Resolves the DOI redirect to the publisher's landing page and reads
//! the `citation_pdf_url` meta tag. The fetch is two-phase: a plain
//! HTTP GET first, and on a challenge signal the landing page is
//! re-rendered through a headless browser and the PDF link extracted
//! from the rendered DOM. The second phase is invisible to the
//! retriever; it only ever sees `Blocked` when both phases fail.

use async_trait::async_trait;
use bytes::Bytes;
use scraper::{Html, Selector};
use tracing::debug;

use crate::models::{Identifier, IdentifierKind, LookupBasis, PaperMeta};
use crate::sources::{ensure_pdf, looks_blocked, LookupHint, SourceClient, SourceError, SourceKind};
use crate::utils::{BrowserRenderer, HttpClient};

#[derive(Debug, Clone)]
pub struct PublisherSource {
    client: HttpClient,
    renderer: Option<BrowserRenderer>,
}

impl PublisherSource {
    pub fn new(client: HttpClient, renderer: Option<BrowserRenderer>) -> Self {
        Self { client, renderer }
    }

    /// Pull `citation_pdf_url` (or an `<a>` ending in .pdf) out of a
    /// landing page.
    fn extract_pdf_url(html: &str, base: &str) -> Option<String> {
        let doc = Html::parse_document(html);

        let meta_sel = Selector::parse(r#"meta[name="citation_pdf_url"]"#).ok()?;
        if let Some(content) = doc
            .select(&meta_sel)
            .filter_map(|el| el.value().attr("content"))
            .next()
        {
            return absolutize(content, base);
        }

        let link_sel = Selector::parse("a[href]").ok()?;
        doc.select(&link_sel)
            .filter_map(|el| el.value().attr("href"))
            .find(|href| href.to_lowercase().ends_with(".pdf"))
            .and_then(|href| absolutize(href, base))
    }

    fn extract_title(html: &str) -> Option<String> {
        let doc = Html::parse_document(html);
        let sel = Selector::parse(r#"meta[name="citation_title"]"#).ok()?;
        doc.select(&sel)
            .filter_map(|el| el.value().attr("content"))
            .next()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    async fn get_pdf(&self, url: &str) -> Result<Bytes, SourceError> {
        let response = self.client.get_as_browser(url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if looks_blocked(status, &body) {
                return Err(SourceError::Blocked(format!("status {status}")));
            }
            return Err(SourceError::Network(format!("status {status}")));
        }
        ensure_pdf(response.bytes().await?)
    }

    /// Second phase: render the landing page in a real browser engine
    /// and retry the PDF link it exposes.
    async fn fetch_via_browser(&self, landing: &str) -> Result<Bytes, SourceError> {
        let Some(renderer) = &self.renderer else {
            return Err(SourceError::Blocked(
                "challenge page and no browser configured".to_string(),
            ));
        };

        let html = renderer
            .render(landing)
            .await
            .map_err(|e| SourceError::Blocked(format!("browser render failed: {e}")))?;
        let pdf_url = Self::extract_pdf_url(&html, landing)
            .ok_or_else(|| SourceError::Blocked("no PDF link in rendered page".to_string()))?;
        debug!(pdf_url, "browser render exposed PDF link");
        self.get_pdf(&pdf_url).await
    }
}

fn absolutize(href: &str, base: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    let base = url::Url::parse(base).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

#[async_trait]
impl SourceClient for PublisherSource {
    fn id(&self) -> &str {
        "publisher"
    }

    fn name(&self) -> &str {
        "Publisher landing page"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Direct
    }

    fn accepts(&self, identifier: &Identifier) -> bool {
        identifier.kind == IdentifierKind::Doi
    }

    async fn lookup(
        &self,
        identifier: &Identifier,
        _hint: &LookupHint<'_>,
    ) -> Result<PaperMeta, SourceError> {
        if identifier.kind != IdentifierKind::Doi {
            return Err(SourceError::InvalidRequest(identifier.normalized.clone()));
        }

        let doi_url = format!("https://doi.org/{}", identifier.normalized);
        let response = self.client.get_as_browser(&doi_url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound);
        }
        let landing = response.url().to_string();
        let body = response.text().await.unwrap_or_default();

        let mut meta = PaperMeta::new(self.id(), LookupBasis::Id)
            .doi(identifier.normalized.clone())
            .landing_url(landing.clone());

        if looks_blocked(status, &body) {
            // The landing page itself is challenged; leave pdf_url
            // unset so fetch goes straight to the browser phase.
            return Ok(meta);
        }
        if !status.is_success() {
            return Err(SourceError::Network(format!("status {status}")));
        }

        if let Some(title) = Self::extract_title(&body) {
            meta = meta.title(title);
        }
        if let Some(pdf_url) = Self::extract_pdf_url(&body, &landing) {
            meta = meta.pdf_url(pdf_url);
        }
        Ok(meta)
    }

    async fn fetch(&self, meta: &PaperMeta) -> Result<Bytes, SourceError> {
        let landing = meta.landing_url.as_deref().ok_or(SourceError::NotFound)?;

        // Phase one: plain GET of the PDF link found at lookup time.
        if let Some(pdf_url) = meta.pdf_url.as_deref() {
            match self.get_pdf(pdf_url).await {
                Ok(bytes) => return Ok(bytes),
                Err(SourceError::Blocked(reason)) => {
                    debug!(source = self.id(), reason, "direct fetch blocked, trying browser");
                }
                Err(other) => return Err(other),
            }
        }

        // Phase two: headless browser render.
        self.fetch_via_browser(landing).await
    }
}
