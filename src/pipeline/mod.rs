//! Pipeline entry points.
//!
//! - `run_crawler`: collect new dataset revisions into the blob store
//! - `run_loader`: load a crawl run into the relational store
//! - `run_pipeline`: crawl, then load what that crawl collected

pub mod archive;
pub mod crawl;
pub mod load;
pub mod locate;
pub mod lock;
pub mod pipeline;
pub mod transform;

pub use crawl::{CrawlOrchestrator, CrawlSources, CrawlSummary, run_crawler, scan_window};
pub use load::{EtlLoader, LoadSummary, run_loader};
pub use locate::{WalkStep, resolve_latest};
pub use lock::RunLease;
pub use pipeline::{PipelineSummary, run_pipeline};
