//! Shadow-library mirror source. Last resort, disabled by default.
//!
//! Tries each configured mirror in turn; within a mirror the lookup
//! honors the per-source `lookup_order` (title-first or DOI-first).
//! Title-located candidates carry `LookupBasis::Title` and must pass
//! the title matcher before the retriever accepts the download.

use async_trait::async_trait;
use bytes::Bytes;
use scraper::{Html, Selector};
use tracing::debug;

use crate::config::LookupField;
use crate::models::{Identifier, IdentifierKind, LookupBasis, PaperMeta};
use crate::sources::{fetch_pdf_url, looks_blocked, LookupHint, SourceClient, SourceError, SourceKind};
use crate::utils::HttpClient;

#[derive(Debug, Clone)]
pub struct SciHubSource {
    client: HttpClient,
    mirrors: Vec<String>,
    lookup_order: Vec<LookupField>,
}

impl SciHubSource {
    pub fn new(
        client: HttpClient,
        mirrors: Vec<String>,
        lookup_order: Option<Vec<LookupField>>,
    ) -> Self {
        Self {
            client,
            mirrors,
            lookup_order: lookup_order
                .unwrap_or_else(|| vec![LookupField::Doi, LookupField::Title]),
        }
    }

    /// Parse a mirror result page: PDF embed/iframe plus page title.
    fn parse_result_page(html: &str, mirror: &str) -> Option<(String, Option<String>)> {
        let doc = Html::parse_document(html);

        let pdf_src = ["iframe#pdf", "embed[type=\"application/pdf\"]", "iframe"]
            .iter()
            .filter_map(|sel| Selector::parse(sel).ok())
            .find_map(|sel| {
                doc.select(&sel)
                    .filter_map(|el| el.value().attr("src"))
                    .find(|src| src.contains(".pdf") || src.contains("/pdf"))
                    .map(|s| s.to_string())
            })?;

        let pdf_url = if pdf_src.starts_with("//") {
            format!("https:{pdf_src}")
        } else if pdf_src.starts_with('/') {
            format!("{}{pdf_src}", mirror.trim_end_matches('/'))
        } else {
            pdf_src
        };

        let title = Selector::parse("title").ok().and_then(|sel| {
            doc.select(&sel).next().map(|el| {
                el.text()
                    .collect::<String>()
                    .split('|')
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_string()
            })
        });

        Some((pdf_url, title.filter(|t| !t.is_empty())))
    }

    async fn query_mirror(
        &self,
        mirror: &str,
        query: &str,
        basis: LookupBasis,
    ) -> Result<PaperMeta, SourceError> {
        let url = format!(
            "{}/{}",
            mirror.trim_end_matches('/'),
            urlencoding::encode(query)
        );
        let response = self.client.get_as_browser(&url).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if looks_blocked(status, &body) {
            return Err(SourceError::Blocked(format!("mirror {mirror}")));
        }
        if !status.is_success() {
            return Err(SourceError::Network(format!("status {status}")));
        }

        let (pdf_url, title) = Self::parse_result_page(&body, mirror)
            .ok_or(SourceError::NotFound)?;

        let mut meta = PaperMeta::new(self.id(), basis).pdf_url(pdf_url);
        if let Some(title) = title {
            meta = meta.title(title);
        }
        Ok(meta)
    }
}

#[async_trait]
impl SourceClient for SciHubSource {
    fn id(&self) -> &str {
        "scihub"
    }

    fn name(&self) -> &str {
        "Sci-Hub"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::LastResort
    }

    fn accepts(&self, identifier: &Identifier) -> bool {
        matches!(identifier.kind, IdentifierKind::Doi | IdentifierKind::Title)
    }

    async fn lookup(
        &self,
        identifier: &Identifier,
        hint: &LookupHint<'_>,
    ) -> Result<PaperMeta, SourceError> {
        if self.mirrors.is_empty() {
            return Err(SourceError::InvalidRequest("no mirrors configured".to_string()));
        }

        let doi = (identifier.kind == IdentifierKind::Doi).then_some(identifier.normalized.as_str());
        let title = identifier.title().or(hint.title);

        let mut last_err = SourceError::NotFound;
        for mirror in &self.mirrors {
            for field in &self.lookup_order {
                let attempt = match field {
                    LookupField::Doi => match doi {
                        Some(doi) => self.query_mirror(mirror, doi, LookupBasis::Id).await,
                        None => continue,
                    },
                    LookupField::Title => match title {
                        Some(title) => {
                            self.query_mirror(mirror, title, LookupBasis::Title).await
                        }
                        None => continue,
                    },
                };
                match attempt {
                    Ok(meta) => return Ok(meta),
                    Err(err) => {
                        debug!(mirror, ?field, %err, "mirror leg failed");
                        last_err = err;
                    }
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

#[cfg(test)]
mod tests {
    use super::*;

    const RESULT_PAGE: &str = r#"<html>
        <head><title>Attention Is All You Need | Sci-Hub</title></head>
        <body><iframe id="pdf" src="//dacemirror.example/journal/paper.pdf#view=FitH"></iframe></body>
    </html>"#;

    #[test]
    fn test_parse_result_page() {
        let (pdf, title) = SciHubSource::parse_result_page(RESULT_PAGE, "https://sci-hub.se")
            .unwrap();
        assert_eq!(pdf, "https://dacemirror.example/journal/paper.pdf#view=FitH");
        assert_eq!(title.as_deref(), Some("Attention Is All You Need"));
    }

    #[test]
    fn test_parse_result_page_relative_src() {
        let html = r#"<embed type="application/pdf" src="/downloads/paper.pdf">"#;
        let (pdf, _) = SciHubSource::parse_result_page(html, "https://sci-hub.se/").unwrap();
        assert_eq!(pdf, "https://sci-hub.se/downloads/paper.pdf");
    }

    #[test]
    fn test_parse_result_page_without_pdf() {
        assert!(SciHubSource::parse_result_page("<html><body>nope</body></html>", "m").is_none());
    }

    #[tokio::test]
    async fn test_title_first_lookup_order() {
        let mut server = mockito::Server::new_async().await;
        // Title query succeeds; DOI query would return no result page.
        let _title = server
            .mock(
                "GET",
                mockito::Matcher::Regex("^/Attention".to_string()),
            )
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(RESULT_PAGE)
            .create_async()
            .await;

        let source = SciHubSource::new(
            HttpClient::new().unwrap(),
            vec![server.url()],
            Some(vec![LookupField::Title, LookupField::Doi]),
        );
        let ident = Identifier::resolve("10.5555/3295222").unwrap();
        let hint = LookupHint {
            title: Some("Attention Is All You Need"),
        };
        let meta = source.lookup(&ident, &hint).await.unwrap();
        assert_eq!(meta.basis, LookupBasis::Title);
    }

    #[tokio::test]
    async fn test_no_mirrors_is_invalid_request() {
        let source = SciHubSource::new(HttpClient::new().unwrap(), Vec::new(), None);
        let ident = Identifier::resolve("10.5555/3295222").unwrap();
        let err = source.lookup(&ident, &LookupHint::default()).await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidRequest(_)));
    }
}
