//! paperclaw locates and downloads scholarly PDFs.
//!
//! Given a DOI, a preprint ID, or a bare title, it walks a prioritized
//! chain of upstream sources until one delivers the paper, and runs
//! whole batches of identifiers under a global concurrency cap with
//! per-source rate limiting.
//!
//! The crate splits along the pipeline:
//!
//! - [`models`]: identifiers, paper metadata, attempt/result records
//! - [`sources`]: one [`sources::SourceClient`] per upstream provider
//!   plus the config-driven [`sources::SourceRegistry`]
//! - [`retrieval`]: the per-identifier fallback [`retrieval::Retriever`]
//!   and the [`retrieval::BatchCoordinator`]
//! - [`config`]: TOML policy configuration
//! - [`utils`]: HTTP client, rate limiter, title matcher, browser
//!   render fallback
//!
//! ```no_run
//! use paperclaw::config::load_config;
//! use paperclaw::models::Identifier;
//! use paperclaw::retrieval::Retriever;
//! use paperclaw::sources::SourceRegistry;
//! use paperclaw::utils::HttpClient;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = load_config(None)?;
//! let http = HttpClient::new()?;
//! let registry = SourceRegistry::from_config(&config, &http)?;
//! let retriever = Retriever::new(registry, &config);
//!
//! let identifier = Identifier::resolve("10.18653/v1/N19-1423")?;
//! let retrieval = retriever.retrieve(&identifier).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod models;
pub mod retrieval;
pub mod sources;
pub mod utils;
