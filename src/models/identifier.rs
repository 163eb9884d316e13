//! Identifier resolution and normalization.
//!
//! Raw user input (a DOI in any common wrapper, a preprint ID, or a
//! bare title) is classified once, up front. DOIs with structural
//! patterns known to never resolve to a retrievable paper (peer-review
//! records, book chapters, dataset deposits) are rejected here so they
//! never consume provider quota.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use regex::Regex;

/// Peer-review-record DOI infixes. These DOIs point at review
/// activity attached to a paper, not at the paper itself.
const REVIEW_RECORD_INFIXES: &[&str] = &["/peer-review", ".pr.", "/rc.", "/review-"];

/// Publisher prefixes that mint book-chapter DOIs.
const BOOK_CHAPTER_PREFIXES: &[&str] = &["10.1007/978-", "10.1017/cbo", "10.4324/"];

/// Dataset-registry prefixes. The DOI resolves, but to data, not a PDF.
const DATASET_PREFIXES: &[&str] = &["10.5061/dryad", "10.5281/zenodo", "10.6084/m9.figshare"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    Doi,
    Arxiv,
    Title,
}

/// A resolved identifier. Immutable after [`Identifier::resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    /// The input exactly as given.
    pub raw: String,
    pub kind: IdentifierKind,
    /// Canonical form: lowercase unwrapped DOI, bare arXiv ID without
    /// version suffix, or the whitespace-collapsed title.
    pub normalized: String,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentifierError {
    #[error("empty identifier")]
    Empty,

    #[error("DOI {doi} is a {category} record, not a retrievable paper")]
    Denylisted { doi: String, category: &'static str },
}

fn doi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^10\.\d{4,9}/\S+$").unwrap())
}

fn arxiv_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}\.\d{4,5}(v\d+)?$").unwrap())
}

/// Strip common DOI wrappers: URL forms and `doi:` prefixes.
fn strip_doi_wrappers(input: &str) -> &str {
    let s = input.trim();
    for prefix in [
        "https://doi.org/",
        "http://doi.org/",
        "https://dx.doi.org/",
        "http://dx.doi.org/",
    ] {
        if let Some(rest) = s.strip_prefix(prefix) {
            return rest;
        }
    }
    let lower = s.to_lowercase();
    if lower.starts_with("doi:") {
        return s[4..].trim_start();
    }
    s
}

/// Parse an arXiv reference: a bare ID, an `arXiv:`-prefixed ID, or
/// an abs/pdf URL, dropping any version suffix.
fn parse_arxiv(input: &str) -> Option<String> {
    let s = input.trim();
    let s = s
        .strip_prefix("arXiv:")
        .or_else(|| s.strip_prefix("arxiv:"))
        .unwrap_or(s);
    let s = strip_arxiv_url(s);
    if !arxiv_re().is_match(s) {
        return None;
    }
    let bare = match s.rfind('v') {
        Some(pos) => &s[..pos],
        None => s,
    };
    Some(bare.to_string())
}

fn strip_arxiv_url(s: &str) -> &str {
    for prefix in [
        "https://arxiv.org/abs/",
        "http://arxiv.org/abs/",
        "https://arxiv.org/pdf/",
        "http://arxiv.org/pdf/",
        "arxiv.org/abs/",
        "arxiv.org/pdf/",
    ] {
        if let Some(rest) = s.strip_prefix(prefix) {
            return rest.strip_suffix(".pdf").unwrap_or(rest).trim_end_matches('/');
        }
    }
    s
}

fn denylist_category(doi: &str) -> Option<&'static str> {
    if REVIEW_RECORD_INFIXES.iter().any(|p| doi.contains(p)) {
        return Some("peer-review");
    }
    if BOOK_CHAPTER_PREFIXES.iter().any(|p| doi.starts_with(p)) {
        return Some("book-chapter");
    }
    if DATASET_PREFIXES.iter().any(|p| doi.starts_with(p)) {
        return Some("dataset");
    }
    None
}

impl Identifier {
    /// Classify and normalize raw input. Anything that is neither a
    /// DOI nor an arXiv ID is treated as a title.
    pub fn resolve(raw: &str) -> Result<Self, IdentifierError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(IdentifierError::Empty);
        }

        let unwrapped = strip_doi_wrappers(trimmed);
        if doi_re().is_match(unwrapped) {
            let doi = unwrapped.to_lowercase();
            if let Some(category) = denylist_category(&doi) {
                return Err(IdentifierError::Denylisted { doi, category });
            }
            return Ok(Self {
                raw: raw.to_string(),
                kind: IdentifierKind::Doi,
                normalized: doi,
            });
        }

        if let Some(arxiv_id) = parse_arxiv(trimmed) {
            return Ok(Self {
                raw: raw.to_string(),
                kind: IdentifierKind::Arxiv,
                normalized: arxiv_id,
            });
        }

        Ok(Self {
            raw: raw.to_string(),
            kind: IdentifierKind::Title,
            normalized: trimmed.split_whitespace().collect::<Vec<_>>().join(" "),
        })
    }

    /// The title this identifier carries, if it is one.
    pub fn title(&self) -> Option<&str> {
        match self.kind {
            IdentifierKind::Title => Some(&self.normalized),
            _ => None,
        }
    }

    /// Filesystem-safe form of the normalized identifier, used for
    /// fallback filenames and diagnostic files.
    pub fn slug(&self) -> String {
        let mut out = String::with_capacity(self.normalized.len());
        for c in self.normalized.chars() {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                out.push(c.to_ascii_lowercase());
            } else {
                out.push('_');
            }
        }
        out
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.normalized)
    }
}
