//! Bibliographic metadata for a located paper.

use serde::{Deserialize, Serialize};

use crate::models::Identifier;

/// How a source's lookup located the record; decides whether the title
/// gate applies before a download is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupBasis {
    /// Resolved from the DOI or a source-native ID; the identifier
    /// itself proves correctness.
    Id,
    /// Found via title search; must pass the title matcher.
    Title,
}

/// Metadata a source returns from a successful lookup.
///
/// Only `source_id` and `basis` are guaranteed; everything else is
/// best-effort and is used for filename derivation and title
/// validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperMeta {
    /// ID of the source that produced this record.
    pub source_id: String,
    pub basis: LookupBasis,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub doi: Option<String>,
    /// Direct PDF URL, when the source resolved one.
    pub pdf_url: Option<String>,
    /// Landing page URL, for clients that scrape the PDF link at fetch time.
    pub landing_url: Option<String>,
}

impl PaperMeta {
    pub fn new(source_id: impl Into<String>, basis: LookupBasis) -> Self {
        Self {
            source_id: source_id.into(),
            basis,
            title: None,
            authors: Vec::new(),
            year: None,
            doi: None,
            pdf_url: None,
            landing_url: None,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        let t = title.into();
        if !t.is_empty() {
            self.title = Some(t);
        }
        self
    }

    pub fn authors(mut self, authors: Vec<String>) -> Self {
        self.authors = authors;
        self
    }

    pub fn year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn doi(mut self, doi: impl Into<String>) -> Self {
        self.doi = Some(doi.into());
        self
    }

    pub fn pdf_url(mut self, url: impl Into<String>) -> Self {
        self.pdf_url = Some(url.into());
        self
    }

    pub fn landing_url(mut self, url: impl Into<String>) -> Self {
        self.landing_url = Some(url.into());
        self
    }

    /// Whether this record carries enough bibliographic detail for a
    /// readable filename.
    pub fn has_bibliographic_core(&self) -> bool {
        self.title.is_some() && !self.authors.is_empty()
    }

    /// Derive an `Author_Year_Title.pdf` filename, falling back to the
    /// identifier slug when metadata is missing.
    pub fn derive_filename(&self, identifier: &Identifier) -> String {
        let author = self
            .authors
            .first()
            .map(|a| last_name(a))
            .filter(|s| !s.is_empty());
        let title = self.title.as_deref().map(shorten_title);

        match (author, self.year, title) {
            (Some(author), Some(year), Some(title)) => {
                format!("{}_{}_{}.pdf", sanitize(&author), year, sanitize(&title))
            }
            (Some(author), None, Some(title)) => {
                format!("{}_{}.pdf", sanitize(&author), sanitize(&title))
            }
            (None, _, Some(title)) => format!("{}.pdf", sanitize(&title)),
            _ => format!("{}.pdf", identifier.slug()),
        }
    }
}

/// Take the family name from "Given Family" or "Family, Given" forms.
fn last_name(author: &str) -> String {
    if let Some((family, _)) = author.split_once(',') {
        return family.trim().to_string();
    }
    author
        .split_whitespace()
        .last()
        .unwrap_or(author)
        .to_string()
}

/// First few words of the title, enough to recognize the paper.
fn shorten_title(title: &str) -> String {
    title
        .split_whitespace()
        .take(6)
        .collect::<Vec<_>>()
        .join(" ")
}

fn sanitize(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    let mut last_underscore = false;
    for c in part.chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c);
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }
    out.trim_matches('_').to_string()
}
