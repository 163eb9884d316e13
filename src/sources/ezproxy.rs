//! Institutional EZproxy source: authenticated access to subscription
//! content.
//!
//! Requires a proxy prefix and a session cookie established out of
//! band (a browser login). A missing or expired session surfaces as
//! `AuthRequired`, which is distinct from `NotFound`: the paper may
//! well exist behind the paywall.

use async_trait::async_trait;
use bytes::Bytes;

use crate::models::{Identifier, IdentifierKind, LookupBasis, PaperMeta};
use crate::sources::{ensure_pdf, LookupHint, SourceClient, SourceError, SourceKind};
use crate::utils::HttpClient;

#[derive(Debug, Clone)]
pub struct EzproxySource {
    client: HttpClient,
    base_url: Option<String>,
    session_cookie: Option<String>,
}

impl EzproxySource {
    pub fn new(
        client: HttpClient,
        base_url: Option<String>,
        session_cookie: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url,
            session_cookie,
        }
    }

    fn credentials(&self) -> Result<(&str, &str), SourceError> {
        let base = self.base_url.as_deref().ok_or_else(|| {
            SourceError::AuthRequired("no proxy base_url configured".to_string())
        })?;
        let cookie = self.session_cookie.as_deref().ok_or_else(|| {
            SourceError::AuthRequired("no proxy session cookie configured".to_string())
        })?;
        Ok((base, cookie))
    }

    /// EZproxy redirects unauthenticated requests to its login page.
    fn is_login_redirect(final_url: &str) -> bool {
        let lower = final_url.to_lowercase();
        lower.contains("/login") || lower.contains("auth") && lower.contains("menu")
    }
}

#[async_trait]
impl SourceClient for EzproxySource {
    fn id(&self) -> &str {
        "ezproxy"
    }

    fn name(&self) -> &str {
        "Institutional proxy"
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
        let (base, _) = self.credentials()?;

        // Proxied DOI resolution; the publisher content is fetched
        // through the institution's session.
        let proxied = format!("{}https://doi.org/{}", base, identifier.normalized);
        Ok(PaperMeta::new(self.id(), LookupBasis::Id)
            .doi(identifier.normalized.clone())
            .pdf_url(proxied))
    }

    async fn fetch(&self, meta: &PaperMeta) -> Result<Bytes, SourceError> {
        let (_, cookie) = self.credentials()?;
        let url = meta.pdf_url.as_deref().ok_or(SourceError::NotFound)?;

        let response = self
            .client
            .get_as_browser(url)
            .header(reqwest::header::COOKIE, cookie)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(SourceError::AuthRequired(format!("status {status}")));
        }
        if Self::is_login_redirect(response.url().as_str()) {
            return Err(SourceError::AuthRequired(
                "redirected to proxy login; session expired".to_string(),
            ));
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound);
        }
        if !status.is_success() {
            return Err(SourceError::Network(format!("status {status}")));
        }
        ensure_pdf(response.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_is_auth_required() {
        let source = EzproxySource::new(HttpClient::new().unwrap(), None, None);
        let ident = Identifier::resolve("10.1016/j.cell.2020.01.001").unwrap();
        let err = source.lookup(&ident, &LookupHint::default()).await.unwrap_err();
        assert!(matches!(err, SourceError::AuthRequired(_)));
    }

    #[tokio::test]
    async fn test_forbidden_is_auth_required() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/get")
            .with_status(401)
            .create_async()
            .await;

        let source = EzproxySource::new(
            HttpClient::new().unwrap(),
            Some("https://proxy.example.edu/login?url=".to_string()),
            Some("ezproxy=abc123".to_string()),
        );
        let meta = PaperMeta::new("ezproxy", LookupBasis::Id)
            .pdf_url(format!("{}/get", server.url()));
        let err = source.fetch(&meta).await.unwrap_err();
        assert!(matches!(err, SourceError::AuthRequired(_)));
    }

    #[test]
    fn test_login_redirect_detection() {
        assert!(EzproxySource::is_login_redirect(
            "https://login.proxy.example.edu/login?qurl=x"
        ));
        assert!(!EzproxySource::is_login_redirect(
            "https://www.sciencedirect.example/article/pii/S1234.pdf"
        ));
    }

    #[tokio::test]
    async fn test_authenticated_fetch() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/get")
            .match_header("cookie", "ezproxy=abc123")
            .with_status(200)
            .with_body("%PDF-1.6 proxied")
            .create_async()
            .await;

        let source = EzproxySource::new(
            HttpClient::new().unwrap(),
            Some("https://proxy.example.edu/login?url=".to_string()),
            Some("ezproxy=abc123".to_string()),
        );
        let meta = PaperMeta::new("ezproxy", LookupBasis::Id)
            .pdf_url(format!("{}/get", server.url()));
        let bytes = source.fetch(&meta).await.unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }
}
