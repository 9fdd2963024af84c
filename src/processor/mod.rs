pub mod ingest;

pub use ingest::{BatchOutcome, IngestPipeline};
