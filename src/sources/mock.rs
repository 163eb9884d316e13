//! Scripted mock source for exercising the retriever and batch
//! coordinator without network access.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::models::{Identifier, LookupBasis, PaperMeta};
use crate::sources::{LookupHint, SourceClient, SourceError, SourceKind};

/// What a [`MockSource`] does when asked.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Lookup and fetch succeed; the fetched bytes are a tiny PDF.
    Success {
        basis: LookupBasis,
        title: Option<String>,
    },
    NotFound,
    Blocked,
    AuthRequired,
    NetworkError,
    /// Lookup succeeds but fetch fails with the given behavior.
    FetchFails(Box<MockBehavior>),
}

/// Tracks the highest number of simultaneously active lookups, for
/// concurrency-bound assertions.
#[derive(Debug, Default)]
pub struct ConcurrencyGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct MockSource {
    id: String,
    kind: SourceKind,
    behavior: MockBehavior,
    lookups: AtomicUsize,
    fetches: AtomicUsize,
    delay: Duration,
    gauge: Option<Arc<ConcurrencyGauge>>,
}

impl MockSource {
    pub fn new(id: &str, behavior: MockBehavior) -> Self {
        Self {
            id: id.to_string(),
            kind: SourceKind::Metadata,
            behavior,
            lookups: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            delay: Duration::ZERO,
            gauge: None,
        }
    }

    pub fn succeeding(id: &str) -> Self {
        Self::new(
            id,
            MockBehavior::Success {
                basis: LookupBasis::Id,
                title: None,
            },
        )
    }

    pub fn not_found(id: &str) -> Self {
        Self::new(id, MockBehavior::NotFound)
    }

    pub fn with_kind(mut self, kind: SourceKind) -> Self {
        self.kind = kind;
        self
    }

    /// Artificial latency per lookup, for concurrency sampling.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_gauge(mut self, gauge: Arc<ConcurrencyGauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn behavior_error(behavior: &MockBehavior) -> SourceError {
        match behavior {
            MockBehavior::NotFound => SourceError::NotFound,
            MockBehavior::Blocked => SourceError::Blocked("scripted".to_string()),
            MockBehavior::AuthRequired => SourceError::AuthRequired("scripted".to_string()),
            MockBehavior::NetworkError => SourceError::Network("scripted".to_string()),
            MockBehavior::Success { .. } | MockBehavior::FetchFails(_) => {
                SourceError::Network("behavior is not an error".to_string())
            }
        }
    }
}

/// Minimal valid-enough PDF payload for tests.
pub const MOCK_PDF: &[u8] = b"%PDF-1.4\n1 0 obj\n<<>>\nendobj\ntrailer\n<<>>\n%%EOF\n";

#[async_trait]
impl SourceClient for MockSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn accepts(&self, _identifier: &Identifier) -> bool {
        true
    }

    async fn lookup(
        &self,
        _identifier: &Identifier,
        _hint: &LookupHint<'_>,
    ) -> Result<PaperMeta, SourceError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(gauge) = &self.gauge {
            gauge.enter();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(gauge) = &self.gauge {
            gauge.exit();
        }

        match &self.behavior {
            MockBehavior::Success { basis, title } => {
                let mut meta = PaperMeta::new(self.id.clone(), *basis)
                    .pdf_url(format!("mock://{}/paper.pdf", self.id));
                if let Some(title) = title {
                    meta = meta.title(title.clone());
                }
                Ok(meta)
            }
            MockBehavior::FetchFails(_) => Ok(PaperMeta::new(self.id.clone(), LookupBasis::Id)
                .pdf_url(format!("mock://{}/paper.pdf", self.id))),
            other => Err(Self::behavior_error(other)),
        }
    }

    async fn fetch(&self, _meta: &PaperMeta) -> Result<Bytes, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            MockBehavior::Success { .. } => Ok(Bytes::from_static(MOCK_PDF)),
            MockBehavior::FetchFails(inner) => Err(Self::behavior_error(inner)),
            other => Err(Self::behavior_error(other)),
        }
    }
}
