//! OpenAlex source: metadata provider with open-access locations.
//!
//! API: <https://docs.openalex.org/>. DOIs resolve through
//! `/works/https://doi.org/{doi}`; titles go through a filtered search.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;

use crate::models::{Identifier, IdentifierKind, LookupBasis, PaperMeta};
use crate::sources::{fetch_pdf_url, LookupHint, SourceClient, SourceError, SourceKind};
use crate::utils::HttpClient;

const OPENALEX_API_BASE: &str = "https://api.openalex.org";

#[derive(Debug, Clone)]
pub struct OpenAlexSource {
    client: HttpClient,
    api_base: String,
}

impl OpenAlexSource {
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            api_base: OPENALEX_API_BASE.to_string(),
        }
    }

    #[cfg(test)]
    fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn to_meta(&self, work: OpenAlexWork, basis: LookupBasis) -> Result<PaperMeta, SourceError> {
        let pdf_url = work
            .best_oa_location
            .and_then(|loc| loc.pdf_url)
            .ok_or(SourceError::NotFound)?;

        let mut meta = PaperMeta::new(self.id(), basis).pdf_url(pdf_url);
        if let Some(title) = work.title {
            meta = meta.title(title);
        }
        if let Some(year) = work.publication_year {
            meta = meta.year(year);
        }
        if let Some(doi) = work.doi {
            meta = meta.doi(doi.trim_start_matches("https://doi.org/").to_lowercase());
        }
        Ok(meta.authors(
            work.authorships
                .unwrap_or_default()
                .into_iter()
                .filter_map(|a| a.author.and_then(|a| a.display_name))
                .collect(),
        ))
    }
}

#[async_trait]
impl SourceClient for OpenAlexSource {
    fn id(&self) -> &str {
        "openalex"
    }

    fn name(&self) -> &str {
        "OpenAlex"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Metadata
    }

    fn accepts(&self, identifier: &Identifier) -> bool {
        matches!(identifier.kind, IdentifierKind::Doi | IdentifierKind::Title)
    }

    async fn lookup(
        &self,
        identifier: &Identifier,
        _hint: &LookupHint<'_>,
    ) -> Result<PaperMeta, SourceError> {
        match identifier.kind {
            IdentifierKind::Doi => {
                let url = format!(
                    "{}/works/https://doi.org/{}",
                    self.api_base, identifier.normalized
                );
                let response = self.client.get(&url).send().await?;
                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    return Err(SourceError::NotFound);
                }
                if !response.status().is_success() {
                    return Err(SourceError::Network(format!(
                        "OpenAlex returned {}",
                        response.status()
                    )));
                }
                let work: OpenAlexWork = response
                    .json()
                    .await
                    .map_err(|e| SourceError::Parse(format!("OpenAlex response: {e}")))?;
                self.to_meta(work, LookupBasis::Id)
            }
            IdentifierKind::Title => {
                let url = format!(
                    "{}/works?filter=title.search:{}&per-page=3",
                    self.api_base,
                    urlencoding::encode(&identifier.normalized)
                );
                let response = self.client.get(&url).send().await?;
                if !response.status().is_success() {
                    return Err(SourceError::Network(format!(
                        "OpenAlex returned {}",
                        response.status()
                    )));
                }
                let list: OpenAlexList = response
                    .json()
                    .await
                    .map_err(|e| SourceError::Parse(format!("OpenAlex response: {e}")))?;
                let work = list
                    .results
                    .into_iter()
                    .find(|w| {
                        w.best_oa_location
                            .as_ref()
                            .is_some_and(|l| l.pdf_url.is_some())
                    })
                    .ok_or(SourceError::NotFound)?;
                self.to_meta(work, LookupBasis::Title)
            }
            IdentifierKind::Arxiv => {
                Err(SourceError::InvalidRequest(identifier.normalized.clone()))
            }
        }
    }

    async fn fetch(&self, meta: &PaperMeta) -> Result<Bytes, SourceError> {
        let url = meta.pdf_url.as_deref().ok_or(SourceError::NotFound)?;
        fetch_pdf_url(&self.client, url).await
    }
}

#[derive(Debug, Deserialize)]
struct OpenAlexList {
    #[serde(default)]
    results: Vec<OpenAlexWork>,
}

#[derive(Debug, Deserialize)]
struct OpenAlexWork {
    title: Option<String>,
    doi: Option<String>,
    publication_year: Option<i32>,
    authorships: Option<Vec<OpenAlexAuthorship>>,
    best_oa_location: Option<OpenAlexLocation>,
}

#[derive(Debug, Deserialize)]
struct OpenAlexAuthorship {
    author: Option<OpenAlexAuthor>,
}

#[derive(Debug, Deserialize)]
struct OpenAlexAuthor {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAlexLocation {
    pdf_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_doi_lookup() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "title": "Highly accurate protein structure prediction with AlphaFold",
            "doi": "https://doi.org/10.1038/s41586-021-03819-2",
            "publication_year": 2021,
            "authorships": [{"author": {"display_name": "John Jumper"}}],
            "best_oa_location": {"pdf_url": "https://example.org/alphafold.pdf"}
        });
        let _m = server
            .mock("GET", mockito::Matcher::Regex("^/works/".to_string()))
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;

        let source = OpenAlexSource::new(HttpClient::new().unwrap()).with_api_base(server.url());
        let ident = Identifier::resolve("10.1038/s41586-021-03819-2").unwrap();
        let meta = source.lookup(&ident, &LookupHint::default()).await.unwrap();
        assert_eq!(meta.doi.as_deref(), Some("10.1038/s41586-021-03819-2"));
        assert_eq!(meta.year, Some(2021));
        assert_eq!(meta.authors, vec!["John Jumper".to_string()]);
    }

    #[tokio::test]
    async fn test_title_search_requires_oa_pdf() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "results": [
                {"title": "Paywalled Variant", "best_oa_location": null}
            ]
        });
        let _m = server
            .mock("GET", mockito::Matcher::Regex("^/works".to_string()))
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;

        let source = OpenAlexSource::new(HttpClient::new().unwrap()).with_api_base(server.url());
        let ident = Identifier::resolve("Some Paywalled Paper").unwrap();
        let err = source.lookup(&ident, &LookupHint::default()).await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound));
    }
}
