//! Unpaywall source: metadata provider mapping a DOI to its best open
//! access location.
//!
//! API documentation: <https://unpaywall.org/api/v2>. The API wants a
//! contact email; a configured one is used when present.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;

use crate::models::{Identifier, IdentifierKind, LookupBasis, PaperMeta};
use crate::sources::{fetch_pdf_url, LookupHint, SourceClient, SourceError, SourceKind};
use crate::utils::HttpClient;

const UNPAYWALL_API_BASE: &str = "https://api.unpaywall.org/v2";

#[derive(Debug, Clone)]
pub struct UnpaywallSource {
    client: HttpClient,
    email: String,
    api_base: String,
}

impl UnpaywallSource {
    pub fn new(client: HttpClient, email: Option<String>) -> Self {
        Self {
            client,
            email: email.unwrap_or_else(|| "paperclaw@example.org".to_string()),
            api_base: UNPAYWALL_API_BASE.to_string(),
        }
    }

    #[cfg(test)]
    fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }
}

#[async_trait]
impl SourceClient for UnpaywallSource {
    fn id(&self) -> &str {
        "unpaywall"
    }

    fn name(&self) -> &str {
        "Unpaywall"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Metadata
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

        let url = format!(
            "{}/{}?email={}",
            self.api_base,
            urlencoding::encode(&identifier.normalized),
            urlencoding::encode(&self.email)
        );

        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound);
        }
        if !response.status().is_success() {
            return Err(SourceError::Network(format!(
                "Unpaywall returned {}",
                response.status()
            )));
        }

        let record: UnpaywallRecord = response.json().await.map_err(|e| {
            SourceError::Parse(format!("Unpaywall response: {e}"))
        })?;

        let pdf_url = record
            .best_oa_location
            .as_ref()
            .and_then(|loc| loc.url_for_pdf.clone())
            .ok_or(SourceError::NotFound)?;

        let mut meta = PaperMeta::new(self.id(), LookupBasis::Id)
            .doi(identifier.normalized.clone())
            .pdf_url(pdf_url);
        if let Some(title) = record.title {
            meta = meta.title(title);
        }
        if let Some(year) = record.year {
            meta = meta.year(year);
        }
        let authors: Vec<String> = record
            .z_authors
            .unwrap_or_default()
            .into_iter()
            .filter_map(|a| match (a.given, a.family) {
                (Some(g), Some(f)) => Some(format!("{g} {f}")),
                (None, Some(f)) => Some(f),
                _ => None,
            })
            .collect();
        Ok(meta.authors(authors))
    }

    async fn fetch(&self, meta: &PaperMeta) -> Result<Bytes, SourceError> {
        let url = meta.pdf_url.as_deref().ok_or(SourceError::NotFound)?;
        fetch_pdf_url(&self.client, url).await
    }
}

#[derive(Debug, Deserialize)]
struct UnpaywallRecord {
    title: Option<String>,
    year: Option<i32>,
    z_authors: Option<Vec<UnpaywallAuthor>>,
    best_oa_location: Option<UnpaywallLocation>,
}

#[derive(Debug, Deserialize)]
struct UnpaywallAuthor {
    given: Option<String>,
    family: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UnpaywallLocation {
    url_for_pdf: Option<String>,
}
