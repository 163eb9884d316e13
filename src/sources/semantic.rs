//! Semantic Scholar source: metadata provider with open-access PDF
//! links.
//!
//! Graph API: <https://api.semanticscholar.org/graph/v1>. An API key
//! raises the quota but is optional.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;

use crate::models::{Identifier, IdentifierKind, LookupBasis, PaperMeta};
use crate::sources::{fetch_pdf_url, LookupHint, SourceClient, SourceError, SourceKind};
use crate::utils::HttpClient;

const SEMANTIC_API_BASE: &str = "https://api.semanticscholar.org/graph/v1";
const PAPER_FIELDS: &str = "title,authors,year,externalIds,openAccessPdf";

#[derive(Debug, Clone)]
pub struct SemanticScholarSource {
    client: HttpClient,
    api_key: Option<String>,
    api_base: String,
}

impl SemanticScholarSource {
    pub fn new(client: HttpClient, api_key: Option<String>) -> Self {
        Self {
            client,
            api_key,
            api_base: SEMANTIC_API_BASE.to_string(),
        }
    }

    #[cfg(test)]
    fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.get(url);
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }
        req
    }

    fn to_meta(&self, paper: SemanticPaper, basis: LookupBasis) -> Result<PaperMeta, SourceError> {
        let pdf_url = paper
            .open_access_pdf
            .and_then(|p| p.url)
            .ok_or(SourceError::NotFound)?;

        let mut meta = PaperMeta::new(self.id(), basis).pdf_url(pdf_url);
        if let Some(title) = paper.title {
            meta = meta.title(title);
        }
        if let Some(year) = paper.year {
            meta = meta.year(year);
        }
        if let Some(doi) = paper.external_ids.and_then(|ids| ids.doi) {
            meta = meta.doi(doi.to_lowercase());
        }
        Ok(meta.authors(
            paper
                .authors
                .unwrap_or_default()
                .into_iter()
                .filter_map(|a| a.name)
                .collect(),
        ))
    }
}

#[async_trait]
impl SourceClient for SemanticScholarSource {
    fn id(&self) -> &str {
        "semantic"
    }

    fn name(&self) -> &str {
        "Semantic Scholar"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Metadata
    }

    fn accepts(&self, identifier: &Identifier) -> bool {
        matches!(
            identifier.kind,
            IdentifierKind::Doi | IdentifierKind::Arxiv | IdentifierKind::Title
        )
    }

    async fn lookup(
        &self,
        identifier: &Identifier,
        _hint: &LookupHint<'_>,
    ) -> Result<PaperMeta, SourceError> {
        match identifier.kind {
            IdentifierKind::Doi | IdentifierKind::Arxiv => {
                let paper_ref = match identifier.kind {
                    IdentifierKind::Doi => format!("DOI:{}", identifier.normalized),
                    _ => format!("ARXIV:{}", identifier.normalized),
                };
                let url = format!(
                    "{}/paper/{}?fields={}",
                    self.api_base,
                    urlencoding::encode(&paper_ref),
                    PAPER_FIELDS
                );
                let response = self.request(&url).send().await?;
                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    return Err(SourceError::NotFound);
                }
                if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    return Err(SourceError::Blocked("rate limited".to_string()));
                }
                if !response.status().is_success() {
                    return Err(SourceError::Network(format!(
                        "Semantic Scholar returned {}",
                        response.status()
                    )));
                }
                let paper: SemanticPaper = response
                    .json()
                    .await
                    .map_err(|e| SourceError::Parse(format!("Semantic Scholar response: {e}")))?;
                self.to_meta(paper, LookupBasis::Id)
            }
            IdentifierKind::Title => {
                let url = format!(
                    "{}/paper/search?query={}&limit=3&fields={}",
                    self.api_base,
                    urlencoding::encode(&identifier.normalized),
                    PAPER_FIELDS
                );
                let response = self.request(&url).send().await?;
                if !response.status().is_success() {
                    return Err(SourceError::Network(format!(
                        "Semantic Scholar returned {}",
                        response.status()
                    )));
                }
                let result: SemanticSearch = response
                    .json()
                    .await
                    .map_err(|e| SourceError::Parse(format!("Semantic Scholar response: {e}")))?;
                let paper = result
                    .data
                    .unwrap_or_default()
                    .into_iter()
                    .find(|p| p.open_access_pdf.as_ref().is_some_and(|p| p.url.is_some()))
                    .ok_or(SourceError::NotFound)?;
                self.to_meta(paper, LookupBasis::Title)
            }
        }
    }

    async fn fetch(&self, meta: &PaperMeta) -> Result<Bytes, SourceError> {
        let url = meta.pdf_url.as_deref().ok_or(SourceError::NotFound)?;
        fetch_pdf_url(&self.client, url).await
    }
}

#[derive(Debug, Deserialize)]
struct SemanticSearch {
    data: Option<Vec<SemanticPaper>>,
}

#[derive(Debug, Deserialize)]
struct SemanticPaper {
    title: Option<String>,
    year: Option<i32>,
    authors: Option<Vec<SemanticAuthor>>,
    #[serde(rename = "externalIds")]
    external_ids: Option<SemanticExternalIds>,
    #[serde(rename = "openAccessPdf")]
    open_access_pdf: Option<SemanticPdf>,
}

#[derive(Debug, Deserialize)]
struct SemanticAuthor {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SemanticExternalIds {
    #[serde(rename = "DOI")]
    doi: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SemanticPdf {
    url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_doi_lookup_with_open_access_pdf() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "title": "Attention Is All You Need",
            "year": 2017,
            "authors": [{"name": "Ashish Vaswani"}],
            "externalIds": {"DOI": "10.5555/3295222"},
            "openAccessPdf": {"url": "https://example.org/attention.pdf"}
        });
        let _m = server
            .mock("GET", mockito::Matcher::Regex("^/paper/".to_string()))
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;

        let source = SemanticScholarSource::new(HttpClient::new().unwrap(), None)
            .with_api_base(server.url());
        let ident = Identifier::resolve("10.5555/3295222").unwrap();
        let meta = source.lookup(&ident, &LookupHint::default()).await.unwrap();
        assert_eq!(meta.basis, LookupBasis::Id);
        assert_eq!(meta.year, Some(2017));
        assert_eq!(meta.pdf_url.as_deref(), Some("https://example.org/attention.pdf"));
    }

    #[tokio::test]
    async fn test_title_search_skips_entries_without_pdf() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "data": [
                {"title": "No PDF Here", "openAccessPdf": null},
                {
                    "title": "Attention Is All You Need",
                    "year": 2017,
                    "openAccessPdf": {"url": "https://example.org/attention.pdf"}
                }
            ]
        });
        let _m = server
            .mock("GET", mockito::Matcher::Regex("^/paper/search".to_string()))
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;

        let source = SemanticScholarSource::new(HttpClient::new().unwrap(), None)
            .with_api_base(server.url());
        let ident = Identifier::resolve("Attention Is All You Need").unwrap();
        let meta = source.lookup(&ident, &LookupHint::default()).await.unwrap();
        assert_eq!(meta.basis, LookupBasis::Title);
        assert_eq!(meta.title.as_deref(), Some("Attention Is All You Need"));
    }

    #[tokio::test]
    async fn test_rate_limit_reported_as_blocked() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", mockito::Matcher::Regex("^/paper/".to_string()))
            .match_query(mockito::Matcher::Any)
            .with_status(429)
            .create_async()
            .await;

        let source = SemanticScholarSource::new(HttpClient::new().unwrap(), None)
            .with_api_base(server.url());
        let ident = Identifier::resolve("10.5555/3295222").unwrap();
        let err = source.lookup(&ident, &LookupHint::default()).await.unwrap_err();
        assert!(matches!(err, SourceError::Blocked(_)));
    }
}
