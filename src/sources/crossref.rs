//! CrossRef source: bibliographic metadata aggregator.
//!
//! Supports both DOI lookup (`/works/{doi}`) and title search
//! (`/works?query.bibliographic=`); the per-source `lookup_order`
//! setting decides which is tried first when both are usable.
//! Title-search results are validated by the title matcher downstream.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tracing::debug;

use crate::config::LookupField;
use crate::models::{Identifier, IdentifierKind, LookupBasis, PaperMeta};
use crate::sources::{fetch_pdf_url, LookupHint, SourceClient, SourceError, SourceKind};
use crate::utils::HttpClient;

const CROSSREF_API_BASE: &str = "https://api.crossref.org";

#[derive(Debug, Clone)]
pub struct CrossrefSource {
    client: HttpClient,
    lookup_order: Vec<LookupField>,
    api_base: String,
}

impl CrossrefSource {
    pub fn new(client: HttpClient, lookup_order: Option<Vec<LookupField>>) -> Self {
        Self {
            client,
            lookup_order: lookup_order
                .unwrap_or_else(|| vec![LookupField::Doi, LookupField::Title]),
            api_base: CROSSREF_API_BASE.to_string(),
        }
    }

    #[cfg(test)]
    fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    async fn lookup_doi(&self, doi: &str) -> Result<PaperMeta, SourceError> {
        let url = format!("{}/works/{}", self.api_base, urlencoding::encode(doi));
        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound);
        }
        if !response.status().is_success() {
            return Err(SourceError::Network(format!(
                "CrossRef returned {}",
                response.status()
            )));
        }
        let body: CrossrefSingle = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("CrossRef response: {e}")))?;
        Ok(self.to_meta(body.message, LookupBasis::Id))
    }

    async fn lookup_title(&self, title: &str) -> Result<PaperMeta, SourceError> {
        let url = format!(
            "{}/works?query.bibliographic={}&rows=3",
            self.api_base,
            urlencoding::encode(title)
        );
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(SourceError::Network(format!(
                "CrossRef returned {}",
                response.status()
            )));
        }
        let body: CrossrefList = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("CrossRef response: {e}")))?;
        let item = body
            .message
            .items
            .into_iter()
            .next()
            .ok_or(SourceError::NotFound)?;
        Ok(self.to_meta(item, LookupBasis::Title))
    }

    fn to_meta(&self, work: CrossrefWork, basis: LookupBasis) -> PaperMeta {
        let mut meta = PaperMeta::new(self.id(), basis);
        if let Some(title) = work.title.into_iter().next() {
            meta = meta.title(title);
        }
        if let Some(doi) = work.doi {
            meta = meta.doi(doi.to_lowercase());
        }
        if let Some(year) = work
            .published
            .and_then(|p| p.date_parts.into_iter().next())
            .and_then(|parts| parts.into_iter().next())
        {
            meta = meta.year(year);
        }
        let authors: Vec<String> = work
            .author
            .unwrap_or_default()
            .into_iter()
            .filter_map(|a| match (a.given, a.family) {
                (Some(g), Some(f)) => Some(format!("{g} {f}")),
                (None, Some(f)) => Some(f),
                _ => None,
            })
            .collect();
        meta = meta.authors(authors);

        // CrossRef link entries occasionally carry a real PDF URL.
        if let Some(link) = work
            .link
            .unwrap_or_default()
            .into_iter()
            .find(|l| l.content_type.as_deref() == Some("application/pdf"))
        {
            meta = meta.pdf_url(link.url);
        }
        meta
    }
}

#[async_trait]
impl SourceClient for CrossrefSource {
    fn id(&self) -> &str {
        "crossref"
    }

    fn name(&self) -> &str {
        "CrossRef"
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
        hint: &LookupHint<'_>,
    ) -> Result<PaperMeta, SourceError> {
        let doi = (identifier.kind == IdentifierKind::Doi).then_some(&identifier.normalized);
        let title = identifier.title().or(hint.title);

        let mut last_err = SourceError::InvalidRequest(identifier.normalized.clone());
        for field in &self.lookup_order {
            let attempt = match field {
                LookupField::Doi => match doi {
                    Some(doi) => self.lookup_doi(doi).await,
                    None => continue,
                },
                LookupField::Title => match title {
                    Some(title) => self.lookup_title(title).await,
                    None => continue,
                },
            };
            match attempt {
                Ok(meta) => return Ok(meta),
                Err(err) => {
                    debug!(source = self.id(), ?field, %err, "lookup leg failed");
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    async fn fetch(&self, meta: &PaperMeta) -> Result<Bytes, SourceError> {
        let url = meta.pdf_url.as_deref().ok_or(SourceError::NotFound)?;
        fetch_pdf_url(&self.client, url).await
    }
}

#[derive(Debug, Deserialize)]
struct CrossrefSingle {
    message: CrossrefWork,
}

#[derive(Debug, Deserialize)]
struct CrossrefList {
    message: CrossrefItems,
}

#[derive(Debug, Deserialize)]
struct CrossrefItems {
    items: Vec<CrossrefWork>,
}

#[derive(Debug, Deserialize)]
struct CrossrefWork {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(default)]
    title: Vec<String>,
    author: Option<Vec<CrossrefAuthor>>,
    #[serde(rename = "published-print", alias = "published")]
    published: Option<CrossrefDate>,
    link: Option<Vec<CrossrefLink>>,
}

#[derive(Debug, Deserialize)]
struct CrossrefAuthor {
    given: Option<String>,
    family: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrossrefDate {
    #[serde(rename = "date-parts", default)]
    date_parts: Vec<Vec<i32>>,
}

#[derive(Debug, Deserialize)]
struct CrossrefLink {
    #[serde(rename = "URL")]
    url: String,
    #[serde(rename = "content-type")]
    content_type: Option<String>,
}
