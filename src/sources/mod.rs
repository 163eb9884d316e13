//! Source clients: one implementation per upstream provider.
//!
//! Every provider implements the same two-operation [`SourceClient`]
//! contract: `lookup` resolves an identifier to a provider record,
//! `fetch` retrieves the PDF bytes. Provider quirks stay inside the
//! client: pattern-constructed providers make `lookup` a pure function
//! of the identifier, the publisher client hides its browser-render
//! fallback inside `fetch`, and the retriever never inspects provider
//! identity except for logging.

mod acl;
mod arxiv;
mod crossref;
mod ezproxy;
mod mdpi;
mod openalex;
mod publisher;
mod registry;
mod scihub;
mod semantic;
mod unpaywall;

pub mod mock;

pub use acl::AclSource;
pub use arxiv::ArxivSource;
pub use crossref::CrossrefSource;
pub use ezproxy::EzproxySource;
pub use mdpi::MdpiSource;
pub use mock::MockSource;
pub use openalex::OpenAlexSource;
pub use publisher::PublisherSource;
pub use registry::{RegisteredSource, RegistryError, SourceDescriptor, SourceRegistry};
pub use scihub::SciHubSource;
pub use semantic::SemanticScholarSource;
pub use unpaywall::UnpaywallSource;

use async_trait::async_trait;
use bytes::Bytes;

use crate::models::{Identifier, PaperMeta};

/// Broad provider category, used for chain ordering and operator
/// display only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Constructs the PDF URL from the identifier pattern alone.
    Direct,
    /// Resolves identifiers through a metadata API first.
    Metadata,
    /// Legal-gray-area source, always ordered last and opt-in.
    LastResort,
}

/// Extra context the retriever passes into `lookup`, beyond the
/// identifier itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct LookupHint<'a> {
    /// Best-known title for the work, from the identifier itself or
    /// from an earlier metadata lookup in the same chain.
    pub title: Option<&'a str>,
}

/// The uniform provider capability: lookup, then fetch.
#[async_trait]
pub trait SourceClient: Send + Sync + std::fmt::Debug {
    /// Stable source ID used in configuration and attempt trails.
    fn id(&self) -> &str;

    /// Human-readable name.
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Fast pattern gate: whether this source can possibly serve the
    /// identifier. Returning false costs no network round trip.
    fn accepts(&self, identifier: &Identifier) -> bool;

    /// Resolve the identifier to a provider record.
    async fn lookup(
        &self,
        identifier: &Identifier,
        hint: &LookupHint<'_>,
    ) -> Result<PaperMeta, SourceError>;

    /// Retrieve the PDF bytes for a record produced by `lookup`.
    async fn fetch(&self, meta: &PaperMeta) -> Result<Bytes, SourceError>;
}

/// Errors a source operation can produce. The retriever maps these
/// onto attempt outcomes; all of them advance the fallback chain.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("no record for identifier")]
    NotFound,

    #[error("blocked by bot protection: {0}")]
    Blocked(String),

    #[error("authentication required: {0}")]
    AuthRequired(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("identifier not usable by this source: {0}")]
    InvalidRequest(String),

    #[error("response was not a PDF")]
    NoPdf,
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Parse(format!("JSON: {err}"))
    }
}

/// Markers that a response is a bot challenge rather than content.
const CHALLENGE_MARKERS: &[&str] = &[
    "just a moment",
    "cf-chl",
    "cf_chl",
    "attention required",
    "captcha",
    "are you a robot",
];

/// Whether an HTTP response looks like an anti-scraping challenge.
pub(crate) fn looks_blocked(status: reqwest::StatusCode, body: &str) -> bool {
    if status == reqwest::StatusCode::FORBIDDEN
        || status == reqwest::StatusCode::SERVICE_UNAVAILABLE
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
    {
        return true;
    }
    let lower = body.to_lowercase();
    CHALLENGE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Reject HTML error pages masquerading as PDFs.
pub(crate) fn ensure_pdf(bytes: Bytes) -> Result<Bytes, SourceError> {
    if bytes.len() > 4 && bytes.starts_with(b"%PDF") {
        Ok(bytes)
    } else {
        Err(SourceError::NoPdf)
    }
}

/// Shared GET-a-PDF path used by the direct providers.
pub(crate) async fn fetch_pdf_url(
    client: &crate::utils::HttpClient,
    url: &str,
) -> Result<Bytes, SourceError> {
    let response = client.get_as_browser(url).send().await?;
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
    let bytes = response.bytes().await?;
    ensure_pdf(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looks_blocked_on_status() {
        assert!(looks_blocked(reqwest::StatusCode::FORBIDDEN, ""));
        assert!(looks_blocked(reqwest::StatusCode::TOO_MANY_REQUESTS, ""));
        assert!(!looks_blocked(reqwest::StatusCode::OK, "<html>paper</html>"));
    }

    #[test]
    fn test_looks_blocked_on_challenge_body() {
        assert!(looks_blocked(
            reqwest::StatusCode::OK,
            "<title>Just a moment...</title>"
        ));
        assert!(looks_blocked(reqwest::StatusCode::OK, "cf-chl-widget"));
    }

    #[test]
    fn test_ensure_pdf() {
        assert!(ensure_pdf(Bytes::from_static(b"%PDF-1.7 rest")).is_ok());
        assert!(matches!(
            ensure_pdf(Bytes::from_static(b"<html>404</html>")),
            Err(SourceError::NoPdf)
        ));
    }
}
