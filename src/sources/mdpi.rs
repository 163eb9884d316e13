//! MDPI source: gold-OA publisher direct provider.
//!
//! Every MDPI article is open access, so a `10.3390/...` DOI is a
//! guarantee the PDF is fetchable. The lookup resolves the DOI redirect
//! to the article page and appends `/pdf`, MDPI's stable download path.

use async_trait::async_trait;
use bytes::Bytes;

use crate::models::{Identifier, IdentifierKind, LookupBasis, PaperMeta};
use crate::sources::{fetch_pdf_url, LookupHint, SourceClient, SourceError, SourceKind};
use crate::utils::HttpClient;

const MDPI_DOI_PREFIX: &str = "10.3390/";

#[derive(Debug, Clone)]
pub struct MdpiSource {
    client: HttpClient,
}

impl MdpiSource {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceClient for MdpiSource {
    fn id(&self) -> &str {
        "mdpi"
    }

    fn name(&self) -> &str {
        "MDPI"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Direct
    }

    fn accepts(&self, identifier: &Identifier) -> bool {
        identifier.kind == IdentifierKind::Doi
            && identifier.normalized.starts_with(MDPI_DOI_PREFIX)
    }

    async fn lookup(
        &self,
        identifier: &Identifier,
        _hint: &LookupHint<'_>,
    ) -> Result<PaperMeta, SourceError> {
        if !self.accepts(identifier) {
            return Err(SourceError::InvalidRequest(identifier.normalized.clone()));
        }

        // Resolve the DOI redirect to the article landing page.
        let doi_url = format!("https://doi.org/{}", identifier.normalized);
        let response = self.client.get_as_browser(&doi_url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound);
        }
        if !response.status().is_success() {
            return Err(SourceError::Network(format!(
                "DOI resolution returned {}",
                response.status()
            )));
        }

        let landing = response.url().to_string();
        if !landing.contains("mdpi.com") {
            return Err(SourceError::NotFound);
        }

        Ok(PaperMeta::new(self.id(), LookupBasis::Id)
            .doi(identifier.normalized.clone())
            .landing_url(landing.clone())
            .pdf_url(format!("{}/pdf", landing.trim_end_matches('/'))))
    }

    async fn fetch(&self, meta: &PaperMeta) -> Result<Bytes, SourceError> {
        let url = meta.pdf_url.as_deref().ok_or(SourceError::NotFound)?;
        fetch_pdf_url(&self.client, url).await
    }
}
