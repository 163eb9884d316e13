//! End-to-end tests driving the public API with scripted sources:
//! chain ordering, fallback accounting, the title gate, and batch
//! behavior under concurrency limits and reruns.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;
use tokio::sync::watch;

use paperclaw::models::{Identifier, IdentifierError, Outcome};
use paperclaw::retrieval::{BatchCoordinator, BatchOptions, Retriever};
use paperclaw::sources::mock::{ConcurrencyGauge, MockBehavior, MockSource};
use paperclaw::sources::{
    RegisteredSource, SourceClient, SourceDescriptor, SourceKind, SourceRegistry,
};
use paperclaw::utils::{SourceLimiter, TitleMatcher, DEFAULT_THRESHOLD};

fn slot(client: Arc<MockSource>, priority: u32, last_resort: bool) -> RegisteredSource {
    RegisteredSource {
        descriptor: SourceDescriptor {
            name: client.id().to_string(),
            priority,
            enabled: true,
            kind: SourceKind::Metadata,
            last_resort,
            interval: Duration::ZERO,
            max_in_flight: 64,
        },
        client,
        limiter: Arc::new(SourceLimiter::unlimited()),
    }
}

fn retriever(slots: Vec<RegisteredSource>) -> Retriever {
    Retriever::from_parts(
        SourceRegistry::from_parts(slots),
        TitleMatcher::new(DEFAULT_THRESHOLD),
    )
}

fn options(dir: &Path, concurrency: usize) -> BatchOptions {
    BatchOptions {
        output_dir: dir.to_path_buf(),
        concurrency,
        skip_existing: true,
        deadline: None,
        progress: false,
    }
}

fn no_cancel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    Box::leak(Box::new(tx));
    rx
}

#[test]
fn denylisted_dois_never_reach_the_chain() {
    // Structural non-paper DOIs fail at resolution; there is no
    // Identifier to hand to the retriever, hence zero attempts.
    for doi in [
        "10.1234/journal.pr.0042",
        "10.21468/scipost.report/rc.1",
        "10.1007/978-3-030-12345-6_7",
        "10.1017/cbo9780511815355.008",
        "10.5061/dryad.abc123",
        "10.6084/m9.figshare.12345",
    ] {
        assert!(
            matches!(
                Identifier::resolve(doi),
                Err(IdentifierError::Denylisted { .. })
            ),
            "expected {doi} to be rejected"
        );
    }
}

#[tokio::test]
async fn chain_walks_in_priority_order_not_insertion_order() {
    let high = Arc::new(MockSource::not_found("high"));
    let mid = Arc::new(MockSource::not_found("mid"));
    let low = Arc::new(MockSource::not_found("low"));
    // Inserted out of order on purpose.
    let r = retriever(vec![
        slot(Arc::clone(&mid), 5, false),
        slot(Arc::clone(&low), 9, false),
        slot(Arc::clone(&high), 1, false),
    ]);

    let got = r
        .retrieve(&Identifier::resolve("10.1234/ordering.1").unwrap())
        .await;
    let trail: Vec<_> = got
        .result
        .attempts
        .iter()
        .map(|a| a.source.as_str())
        .collect();
    assert_eq!(trail, vec!["high", "mid", "low"]);
}

#[tokio::test]
async fn last_resort_runs_after_everything_despite_priority() {
    let shadow = Arc::new(MockSource::succeeding("shadow").with_kind(SourceKind::LastResort));
    let normal = Arc::new(MockSource::not_found("normal"));
    // Numerically the last resort "outranks" the normal source.
    let r = retriever(vec![
        slot(Arc::clone(&shadow), 1, true),
        slot(Arc::clone(&normal), 50, false),
    ]);

    let got = r
        .retrieve(&Identifier::resolve("10.1234/gray.1").unwrap())
        .await;
    assert!(got.result.success);
    assert_eq!(got.result.source_used.as_deref(), Some("shadow"));
    assert_eq!(normal.lookup_count(), 1, "normal source tried first");
}

#[tokio::test]
async fn first_success_stops_the_chain() {
    let winner = Arc::new(MockSource::succeeding("winner"));
    let never = Arc::new(MockSource::succeeding("never"));
    let r = retriever(vec![
        slot(Arc::clone(&winner), 1, false),
        slot(Arc::clone(&never), 2, false),
    ]);

    let got = r
        .retrieve(&Identifier::resolve("10.1234/first.1").unwrap())
        .await;
    assert!(got.result.success);
    assert_eq!(got.result.attempts.len(), 1);
    assert_eq!(never.lookup_count(), 0);
}

#[tokio::test]
async fn single_enabled_source_yields_single_attempt() {
    // Five chain slots disabled, the pattern-matching source at
    // priority six left on: the trail must contain exactly the one
    // successful attempt.
    let mut slots: Vec<RegisteredSource> = (1..=5)
        .map(|i| {
            let mut s = slot(
                Arc::new(MockSource::succeeding(&format!("off{i}"))),
                i,
                false,
            );
            s.descriptor.enabled = false;
            s
        })
        .collect();
    let anthology = Arc::new(MockSource::succeeding("anthology"));
    slots.push(slot(Arc::clone(&anthology), 6, false));
    let r = retriever(slots);

    let got = r
        .retrieve(&Identifier::resolve("10.18653/v1/N19-1423").unwrap())
        .await;
    assert!(got.result.success);
    assert_eq!(got.result.attempts.len(), 1);
    assert_eq!(got.result.attempts[0].source, "anthology");
    assert_eq!(got.result.attempts[0].outcome, Outcome::Success);
}

#[tokio::test]
async fn exhaustion_records_one_attempt_per_enabled_source() {
    let slots: Vec<RegisteredSource> = (0..11)
        .map(|i| {
            slot(
                Arc::new(MockSource::not_found(&format!("s{i:02}"))),
                i,
                false,
            )
        })
        .collect();
    let r = retriever(slots);

    let got = r
        .retrieve(&Identifier::resolve("An Unfindable Manuscript Title").unwrap())
        .await;
    assert!(!got.result.success);
    assert!(got.paper.is_none());
    assert_eq!(got.result.attempts.len(), 11);
}

#[tokio::test]
async fn title_gate_failure_is_recorded_as_mismatch() {
    let husbandry = Arc::new(MockSource::new(
        "mirror",
        MockBehavior::Success {
            basis: paperclaw::models::LookupBasis::Title,
            title: Some("llama husbandry guide".to_string()),
        },
    ));
    let r = retriever(vec![slot(Arc::clone(&husbandry), 1, false)]);

    let got = r
        .retrieve(
            &Identifier::resolve("LLaMA: Open and Efficient Foundation Language Models").unwrap(),
        )
        .await;
    assert!(!got.result.success);
    assert_eq!(got.result.attempts[0].outcome, Outcome::TitleMismatch);
    assert_eq!(husbandry.fetch_count(), 0);
}

#[tokio::test]
async fn batch_of_seven_with_one_on_disk() {
    let dir = tempdir().unwrap();
    let mock = Arc::new(MockSource::succeeding("mock"));
    let coordinator = BatchCoordinator::new(
        Arc::new(retriever(vec![slot(Arc::clone(&mock), 1, false)])),
        options(dir.path(), 3),
    );

    let identifiers: Vec<Identifier> = (0..7)
        .map(|i| Identifier::resolve(&format!("10.1234/batch.{i}")).unwrap())
        .collect();
    std::fs::write(
        dir.path().join(format!("{}.pdf", identifiers[4].slug())),
        b"%PDF-1.4 placeholder",
    )
    .unwrap();

    let summary = coordinator
        .run(identifiers, no_cancel())
        .await
        .unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.downloaded, 6);
    assert_eq!(summary.failed, 0);
    assert_eq!(mock.lookup_count(), 6, "exactly six dispatched");
}

#[tokio::test]
async fn batch_respects_concurrency_limit_of_three() {
    let dir = tempdir().unwrap();
    let gauge = ConcurrencyGauge::new();
    let mock = Arc::new(
        MockSource::succeeding("mock")
            .with_delay(Duration::from_millis(40))
            .with_gauge(Arc::clone(&gauge)),
    );
    let coordinator = BatchCoordinator::new(
        Arc::new(retriever(vec![slot(mock, 1, false)])),
        options(dir.path(), 3),
    );

    let identifiers: Vec<Identifier> = (0..9)
        .map(|i| Identifier::resolve(&format!("10.1234/bound.{i}")).unwrap())
        .collect();
    let summary = coordinator.run(identifiers, no_cancel()).await.unwrap();
    assert_eq!(summary.downloaded, 9);
    assert!(
        gauge.peak() <= 3,
        "sampled {} identifiers in flight",
        gauge.peak()
    );
}

#[tokio::test]
async fn rerunning_a_batch_makes_no_new_attempts() {
    let dir = tempdir().unwrap();
    let mock = Arc::new(MockSource::succeeding("mock"));
    let coordinator = BatchCoordinator::new(
        Arc::new(retriever(vec![slot(Arc::clone(&mock), 1, false)])),
        options(dir.path(), 3),
    );

    let identifiers = || -> Vec<Identifier> {
        (0..5)
            .map(|i| Identifier::resolve(&format!("10.1234/idem.{i}")).unwrap())
            .collect()
    };

    let first = coordinator.run(identifiers(), no_cancel()).await.unwrap();
    assert_eq!(first.downloaded, 5);
    let after_first = mock.lookup_count();

    let second = coordinator.run(identifiers(), no_cancel()).await.unwrap();
    assert_eq!(second.skipped, 5);
    assert_eq!(second.downloaded, 0);
    assert_eq!(mock.lookup_count(), after_first);
}

#[tokio::test]
async fn failed_identifiers_do_not_abort_the_batch() {
    let dir = tempdir().unwrap();
    // One chain: a source that only knows one paper. Identifiers it
    // does not know fall through to exhaustion.
    let picky = Arc::new(MockSource::not_found("picky"));
    let coordinator = BatchCoordinator::new(
        Arc::new(retriever(vec![slot(picky, 1, false)])),
        options(dir.path(), 2),
    );

    let identifiers: Vec<Identifier> = (0..3)
        .map(|i| Identifier::resolve(&format!("10.1234/doomed.{i}")).unwrap())
        .collect();
    let summary = coordinator.run(identifiers, no_cancel()).await.unwrap();
    assert_eq!(summary.failed, 3);
    assert!(!summary.interrupted);
    assert!(dir.path().join("batch_summary.json").is_file());
    assert!(dir.path().join("failed").is_dir());
}
