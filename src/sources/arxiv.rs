//! arXiv source: pattern-constructed direct provider.
//!
//! The PDF URL is a pure function of the arXiv ID; the export API is
//! queried only to enrich the record with bibliographic metadata for
//! filename derivation, and an API failure does not fail the lookup.

use async_trait::async_trait;
use bytes::Bytes;
use feed_rs::parser;
use tracing::debug;

use crate::models::{Identifier, IdentifierKind, LookupBasis, PaperMeta};
use crate::sources::{fetch_pdf_url, LookupHint, SourceClient, SourceError, SourceKind};
use crate::utils::HttpClient;

const ARXIV_API_URL: &str = "http://export.arxiv.org/api/query";
const ARXIV_PDF_URL: &str = "https://arxiv.org/pdf";

#[derive(Debug, Clone)]
pub struct ArxivSource {
    client: HttpClient,
}

impl ArxivSource {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    /// Fill title/authors/year from the Atom feed entry for `id`.
    async fn enrich(&self, id: &str, meta: PaperMeta) -> PaperMeta {
        let url = format!("{ARXIV_API_URL}?id_list={id}&max_results=1");
        let feed = match self.client.get(&url).send().await {
            Ok(resp) => match resp.bytes().await {
                Ok(bytes) => parser::parse(bytes.as_ref()).ok(),
                Err(_) => None,
            },
            Err(err) => {
                debug!(id, %err, "arXiv metadata enrichment failed");
                None
            }
        };

        let Some(entry) = feed.and_then(|f| f.entries.into_iter().next()) else {
            return meta;
        };

        let mut meta = meta;
        if let Some(title) = entry.title {
            meta = meta.title(title.content.trim().to_string());
        }
        let authors: Vec<String> = entry.authors.iter().map(|a| a.name.clone()).collect();
        if !authors.is_empty() {
            meta = meta.authors(authors);
        }
        if let Some(published) = entry.published {
            meta = meta.year(chrono::Datelike::year(&published));
        }
        meta
    }
}

#[async_trait]
impl SourceClient for ArxivSource {
    fn id(&self) -> &str {
        "arxiv"
    }

    fn name(&self) -> &str {
        "arXiv"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Direct
    }

    fn accepts(&self, identifier: &Identifier) -> bool {
        identifier.kind == IdentifierKind::Arxiv
    }

    async fn lookup(
        &self,
        identifier: &Identifier,
        _hint: &LookupHint<'_>,
    ) -> Result<PaperMeta, SourceError> {
        if identifier.kind != IdentifierKind::Arxiv {
            return Err(SourceError::InvalidRequest(identifier.normalized.clone()));
        }
        let id = &identifier.normalized;
        let meta = PaperMeta::new(self.id(), LookupBasis::Id)
            .pdf_url(format!("{ARXIV_PDF_URL}/{id}.pdf"));
        Ok(self.enrich(id, meta).await)
    }

    async fn fetch(&self, meta: &PaperMeta) -> Result<Bytes, SourceError> {
        let url = meta.pdf_url.as_deref().ok_or(SourceError::NotFound)?;
        fetch_pdf_url(&self.client, url).await
    }
}
