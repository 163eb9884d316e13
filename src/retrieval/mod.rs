//! Per-identifier fallback orchestration.
//!
//! The retriever walks the enabled source chain in priority order,
//! recording one attempt per source, and stops at the first source
//! that both locates a record and delivers PDF bytes. A failure of any
//! kind advances the chain; no source is retried within a run.

mod batch;

pub use batch::{export_identifiers, BatchCoordinator, BatchError, BatchOptions, Manifest};

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::models::{
    Identifier, LookupBasis, Outcome, PaperMeta, RetrievalAttempt, RetrievalResult,
};
use crate::sources::{LookupHint, RegisteredSource, SourceError, SourceRegistry};
use crate::utils::TitleMatcher;

/// A downloaded paper, before it is written anywhere.
#[derive(Debug, Clone)]
pub struct RetrievedPaper {
    pub bytes: Bytes,
    pub meta: PaperMeta,
}

/// Outcome of one identifier's walk down the chain.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub result: RetrievalResult,
    /// Present iff `result.success`.
    pub paper: Option<RetrievedPaper>,
}

pub struct Retriever {
    registry: SourceRegistry,
    matcher: TitleMatcher,
    lookup_timeout: Duration,
    fetch_timeout: Duration,
}

impl Retriever {
    pub fn new(registry: SourceRegistry, config: &Config) -> Self {
        Self {
            registry,
            matcher: TitleMatcher::new(config.matcher.threshold),
            lookup_timeout: config.lookup_timeout(),
            fetch_timeout: config.fetch_timeout(),
        }
    }

    /// Test constructor with injected matcher and generous timeouts.
    pub fn from_parts(registry: SourceRegistry, matcher: TitleMatcher) -> Self {
        Self {
            registry,
            matcher,
            lookup_timeout: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(30),
        }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Walk the chain for one identifier. Never errors: every failure
    /// mode lands in the attempt trail instead.
    pub async fn retrieve(&self, identifier: &Identifier) -> Retrieval {
        let mut attempts: Vec<RetrievalAttempt> = Vec::new();
        // Title learned from an earlier metadata lookup; lets later
        // sources search by title even when the input was a DOI.
        let mut remembered_title: Option<String> = None;
        // Richest metadata seen so far, kept for filename derivation
        // when the winning source returns a bare record.
        let mut remembered_meta: Option<PaperMeta> = None;

        for source in self.registry.chain() {
            let source_id = source.descriptor.name.clone();

            if !source.client.accepts(identifier) {
                debug!(source = %source_id, id = %identifier, "identifier pattern not applicable");
                attempts.push(RetrievalAttempt::new(
                    &source_id,
                    Outcome::NotFound,
                    "identifier pattern not applicable",
                ));
                continue;
            }

            match self
                .try_source(source, identifier, remembered_title.as_deref())
                .await
            {
                Ok((meta, bytes)) => {
                    attempts.push(RetrievalAttempt::new(
                        &source_id,
                        Outcome::Success,
                        format!("{} bytes", bytes.len()),
                    ));
                    if source.descriptor.last_resort {
                        warn!(source = %source_id, id = %identifier,
                            "retrieved via last-resort source");
                    } else {
                        info!(source = %source_id, id = %identifier, "retrieved");
                    }
                    let meta = enrich_for_filename(meta, remembered_meta);
                    return Retrieval {
                        result: RetrievalResult::succeeded(
                            identifier.clone(),
                            source_id,
                            attempts,
                        ),
                        paper: Some(RetrievedPaper { bytes, meta }),
                    };
                }
                Err(Step::Lookup(err)) => {
                    let (outcome, detail) = classify(&err);
                    debug!(source = %source_id, id = %identifier, %outcome, %detail,
                        "lookup failed, advancing chain");
                    attempts.push(RetrievalAttempt::new(&source_id, outcome, detail));
                }
                Err(Step::Fetch { meta, err }) => {
                    let (outcome, detail) = classify(&err);
                    debug!(source = %source_id, id = %identifier, %outcome, %detail,
                        "fetch failed, advancing chain");
                    attempts.push(RetrievalAttempt::new(&source_id, outcome, detail));
                    // The lookup itself worked; keep what it taught us
                    // for later sources in the chain.
                    remember(&mut remembered_title, &mut remembered_meta, meta);
                }
                Err(Step::Mismatch { meta, score }) => {
                    let detail = format!(
                        "candidate {:?} scored {score:.2}, below threshold {:.2}",
                        meta.title.as_deref().unwrap_or("<untitled>"),
                        self.matcher.threshold(),
                    );
                    debug!(source = %source_id, id = %identifier, %detail, "title rejected");
                    attempts.push(RetrievalAttempt::new(
                        &source_id,
                        Outcome::TitleMismatch,
                        detail,
                    ));
                }
            }
        }

        debug!(id = %identifier, attempts = attempts.len(), "all sources exhausted");
        Retrieval {
            result: RetrievalResult::exhausted(identifier.clone(), attempts),
            paper: None,
        }
    }

    async fn try_source(
        &self,
        source: &RegisteredSource,
        identifier: &Identifier,
        remembered_title: Option<&str>,
    ) -> Result<(PaperMeta, Bytes), Step> {
        // Permit spans lookup and fetch so the in-flight cap counts
        // whole requests, not halves.
        let _permit = source.limiter.acquire().await;

        let hint = LookupHint {
            title: identifier.title().or(remembered_title),
        };
        let meta = match tokio::time::timeout(
            self.lookup_timeout,
            source.client.lookup(identifier, &hint),
        )
        .await
        {
            Ok(Ok(meta)) => meta,
            Ok(Err(err)) => return Err(Step::Lookup(err)),
            Err(_) => return Err(Step::Lookup(SourceError::Network("lookup timed out".into()))),
        };

        // Records found by title search must pass the matcher before
        // any bytes are fetched.
        if meta.basis == LookupBasis::Title {
            if let Some(requested) = identifier.title().or(remembered_title) {
                let score = meta
                    .title
                    .as_deref()
                    .map(|candidate| self.matcher.score(requested, candidate))
                    .unwrap_or(0.0);
                if score < self.matcher.threshold() {
                    return Err(Step::Mismatch { meta, score });
                }
            }
        }

        match tokio::time::timeout(self.fetch_timeout, source.client.fetch(&meta)).await {
            Ok(Ok(bytes)) => Ok((meta, bytes)),
            Ok(Err(err)) => Err(Step::Fetch { meta, err }),
            Err(_) => Err(Step::Fetch {
                meta,
                err: SourceError::Network("fetch timed out".into()),
            }),
        }
    }
}

/// Where in the per-source sequence a failure happened.
enum Step {
    Lookup(SourceError),
    Fetch { meta: PaperMeta, err: SourceError },
    Mismatch { meta: PaperMeta, score: f64 },
}

fn remember(
    remembered_title: &mut Option<String>,
    remembered_meta: &mut Option<PaperMeta>,
    meta: PaperMeta,
) {
    if remembered_title.is_none() {
        *remembered_title = meta.title.clone();
    }
    if remembered_meta.is_none() && meta.has_bibliographic_core() {
        *remembered_meta = Some(meta);
    }
}

fn classify(err: &SourceError) -> (Outcome, String) {
    let outcome = match err {
        SourceError::NotFound | SourceError::NoPdf | SourceError::InvalidRequest(_) => {
            Outcome::NotFound
        }
        SourceError::Blocked(_) => Outcome::Blocked,
        SourceError::AuthRequired(_) => Outcome::AuthRequired,
        SourceError::Network(_) | SourceError::Parse(_) => Outcome::NetworkError,
    };
    (outcome, err.to_string())
}

/// Backfill title/author/year from an earlier, richer lookup when the
/// winning source returned a bare record.
fn enrich_for_filename(mut meta: PaperMeta, remembered: Option<PaperMeta>) -> PaperMeta {
    if meta.has_bibliographic_core() {
        return meta;
    }
    if let Some(rem) = remembered {
        if meta.title.is_none() {
            meta.title = rem.title;
        }
        if meta.authors.is_empty() {
            meta.authors = rem.authors;
        }
        if meta.year.is_none() {
            meta.year = rem.year;
        }
    }
    meta
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::sources::mock::{MockBehavior, MockSource};
    use crate::sources::{SourceClient, SourceDescriptor, SourceKind};
    use crate::utils::SourceLimiter;

    fn slot(client: Arc<MockSource>, priority: u32, last_resort: bool) -> RegisteredSource {
        RegisteredSource {
            descriptor: SourceDescriptor {
                name: client.id().to_string(),
                priority,
                enabled: true,
                kind: SourceKind::Metadata,
                last_resort,
                interval: Duration::ZERO,
                max_in_flight: 8,
            },
            client,
            limiter: Arc::new(SourceLimiter::unlimited()),
        }
    }

    fn retriever(slots: Vec<RegisteredSource>) -> Retriever {
        Retriever::from_parts(
            SourceRegistry::from_parts(slots),
            TitleMatcher::new(crate::utils::DEFAULT_THRESHOLD),
        )
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let a = Arc::new(MockSource::not_found("a"));
        let b = Arc::new(MockSource::succeeding("b"));
        let c = Arc::new(MockSource::succeeding("c"));
        let r = retriever(vec![
            slot(Arc::clone(&a), 1, false),
            slot(Arc::clone(&b), 2, false),
            slot(Arc::clone(&c), 3, false),
        ]);

        let got = r
            .retrieve(&Identifier::resolve("10.1234/x.1").unwrap())
            .await;
        assert!(got.result.success);
        assert_eq!(got.result.source_used.as_deref(), Some("b"));
        assert_eq!(got.result.attempts.len(), 2);
        assert_eq!(c.lookup_count(), 0, "later sources must not be contacted");
        assert!(got.paper.unwrap().bytes.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn test_exhausted_records_every_source() {
        let behaviors = [
            MockBehavior::NotFound,
            MockBehavior::Blocked,
            MockBehavior::AuthRequired,
            MockBehavior::NetworkError,
        ];
        let slots = behaviors
            .iter()
            .enumerate()
            .map(|(i, b)| {
                slot(
                    Arc::new(MockSource::new(&format!("s{i}"), b.clone())),
                    i as u32,
                    false,
                )
            })
            .collect();
        let r = retriever(slots);

        let got = r
            .retrieve(&Identifier::resolve("10.1234/x.1").unwrap())
            .await;
        assert!(!got.result.success);
        assert!(got.paper.is_none());
        assert_eq!(got.result.attempts.len(), 4);
        let outcomes: Vec<_> = got.result.attempts.iter().map(|a| a.outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                Outcome::NotFound,
                Outcome::Blocked,
                Outcome::AuthRequired,
                Outcome::NetworkError,
            ]
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_advances_chain() {
        let flaky = Arc::new(MockSource::new(
            "flaky",
            MockBehavior::FetchFails(Box::new(MockBehavior::Blocked)),
        ));
        let backup = Arc::new(MockSource::succeeding("backup"));
        let r = retriever(vec![
            slot(Arc::clone(&flaky), 1, false),
            slot(Arc::clone(&backup), 2, false),
        ]);

        let got = r
            .retrieve(&Identifier::resolve("10.1234/x.1").unwrap())
            .await;
        assert!(got.result.success);
        assert_eq!(got.result.source_used.as_deref(), Some("backup"));
        assert_eq!(got.result.attempts[0].outcome, Outcome::Blocked);
        assert_eq!(flaky.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_title_gate_rejects_bad_candidate() {
        let wrong = Arc::new(MockSource::new(
            "wrong",
            MockBehavior::Success {
                basis: LookupBasis::Title,
                title: Some("The llama (Lama glama): a South American camelid".to_string()),
            },
        ));
        let r = retriever(vec![slot(Arc::clone(&wrong), 1, false)]);

        let got = r
            .retrieve(
                &Identifier::resolve("LLaMA: Open and Efficient Foundation Language Models")
                    .unwrap(),
            )
            .await;
        assert!(!got.result.success);
        assert_eq!(got.result.attempts[0].outcome, Outcome::TitleMismatch);
        assert_eq!(wrong.fetch_count(), 0, "no bytes fetched for a mismatch");
    }

    #[tokio::test]
    async fn test_title_gate_accepts_good_candidate() {
        let right = Arc::new(MockSource::new(
            "right",
            MockBehavior::Success {
                basis: LookupBasis::Title,
                title: Some("Attention Is All You Need".to_string()),
            },
        ));
        let r = retriever(vec![slot(right, 1, false)]);

        let got = r
            .retrieve(&Identifier::resolve("Attention Is All You Need").unwrap())
            .await;
        assert!(got.result.success);
    }

    #[tokio::test]
    async fn test_id_basis_skips_title_gate() {
        // A DOI-resolved record with a differently-spelled title is
        // still trusted; the identifier proves correctness.
        let source = Arc::new(MockSource::new(
            "doi-source",
            MockBehavior::Success {
                basis: LookupBasis::Id,
                title: Some("Completely Different Words Here".to_string()),
            },
        ));
        let r = retriever(vec![slot(source, 1, false)]);

        let got = r
            .retrieve(&Identifier::resolve("10.1234/x.1").unwrap())
            .await;
        assert!(got.result.success);
    }
}
