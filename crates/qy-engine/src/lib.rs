//! # qy-engine — The Engine of QUARRY
//!
//! Everything between a question and its records:
//!
//! - [`reasoning`]: the external text-generation service and its HTTP client.
//! - [`translator`]: question → pipeline, and error-driven repair.
//! - [`executor`]: the bounded retry-and-repair loop.
//! - [`store`] / [`aggregate`]: the document store seam and the embedded
//!   in-memory aggregation engine.
//! - [`service`]: the facade used by the HTTP hub.

pub mod aggregate;
pub mod executor;
pub mod prompts;
pub mod reasoning;
pub mod service;
pub mod store;
pub mod summary;
pub mod translator;

pub use executor::{QueryExecutor, DEFAULT_MAX_ATTEMPTS};
pub use prompts::SchemaDescription;
pub use reasoning::{HttpReasoningClient, ReasoningConfig, ReasoningService, Turn};
pub use service::QueryService;
pub use store::memory::{FileConnector, MemoryStore};
pub use store::{CollectionStats, DocumentStore, StoreConnector};
pub use summary::Summarizer;
pub use translator::Translator;
