//! Core data structures shared across the crate.

mod identifier;
mod outcome;
mod paper;

pub use identifier::{Identifier, IdentifierError, IdentifierKind};
pub use outcome::{
    BatchItem, BatchSummary, ItemStatus, Outcome, RetrievalAttempt, RetrievalResult,
};
pub use paper::{LookupBasis, PaperMeta};
