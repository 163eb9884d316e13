//! ACL Anthology source: pattern-constructed direct provider.
//!
//! Anthology DOIs share the `10.18653/v1/` prefix and the suffix is the
//! anthology ID, so the PDF URL is derivable with no API round trip:
//! `10.18653/v1/N19-1423` lives at `https://aclanthology.org/N19-1423.pdf`.

use async_trait::async_trait;
use bytes::Bytes;

use crate::models::{Identifier, IdentifierKind, LookupBasis, PaperMeta};
use crate::sources::{fetch_pdf_url, LookupHint, SourceClient, SourceError, SourceKind};
use crate::utils::HttpClient;

const ACL_DOI_PREFIX: &str = "10.18653/v1/";
const ACL_BASE_URL: &str = "https://aclanthology.org";

#[derive(Debug, Clone)]
pub struct AclSource {
    client: HttpClient,
}

impl AclSource {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    fn anthology_id(identifier: &Identifier) -> Option<String> {
        identifier
            .normalized
            .strip_prefix(ACL_DOI_PREFIX)
            // Anthology IDs are case-significant in URLs; the venue
            // letter and paper part are conventionally uppercase.
            .map(|id| id.to_uppercase())
    }
}

#[async_trait]
impl SourceClient for AclSource {
    fn id(&self) -> &str {
        "acl"
    }

    fn name(&self) -> &str {
        "ACL Anthology"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Direct
    }

    fn accepts(&self, identifier: &Identifier) -> bool {
        identifier.kind == IdentifierKind::Doi
            && identifier.normalized.starts_with(ACL_DOI_PREFIX)
    }

    async fn lookup(
        &self,
        identifier: &Identifier,
        _hint: &LookupHint<'_>,
    ) -> Result<PaperMeta, SourceError> {
        let id = Self::anthology_id(identifier)
            .ok_or_else(|| SourceError::InvalidRequest(identifier.normalized.clone()))?;
        Ok(PaperMeta::new(self.id(), LookupBasis::Id)
            .doi(identifier.normalized.clone())
            .landing_url(format!("{ACL_BASE_URL}/{id}/"))
            .pdf_url(format!("{ACL_BASE_URL}/{id}.pdf")))
    }

    async fn fetch(&self, meta: &PaperMeta) -> Result<Bytes, SourceError> {
        let url = meta.pdf_url.as_deref().ok_or(SourceError::NotFound)?;
        fetch_pdf_url(&self.client, url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> AclSource {
        AclSource::new(HttpClient::new().unwrap())
    }

    #[tokio::test]
    async fn test_lookup_constructs_anthology_url() {
        let ident = Identifier::resolve("10.18653/v1/N19-1423").unwrap();
        let s = source();
        assert!(s.accepts(&ident));

        let meta = s.lookup(&ident, &LookupHint::default()).await.unwrap();
        assert_eq!(
            meta.pdf_url.as_deref(),
            Some("https://aclanthology.org/N19-1423.pdf")
        );
        assert_eq!(meta.basis, LookupBasis::Id);
    }

    #[test]
    fn test_rejects_other_dois() {
        let s = source();
        assert!(!s.accepts(&Identifier::resolve("10.1145/3292500.3330919").unwrap()));
        assert!(!s.accepts(&Identifier::resolve("2301.12345").unwrap()));
    }
}
