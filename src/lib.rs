pub mod error;
pub mod export;
pub mod fetch;
pub mod ingest;
pub mod pipeline;
pub mod retry;
pub mod sink;
