//! # vecsync-embeddings
//!
//! Embedding provider clients for vecsync.
//!
//! A provider maps an ordered list of texts to one fixed-dimension vector
//! per text, or fails for the whole call. Calls carry an [`EmbeddingRole`]
//! because asymmetric models embed stored documents and search queries
//! differently; the provider prepends the matching role marker.
//!
//! ## Providers
//! - [`HttpEmbedder`]: Ollama `/api/embed` or an OpenAI-compatible `/embeddings` endpoint
//! - [`MockEmbedder`]: deterministic feature-hashed vectors with call recording, for tests

pub mod error;
pub mod http;
pub mod mock;
pub mod model;

pub use error::EmbeddingError;
pub use http::{HttpEmbedder, HttpEmbedderConfig};
pub use mock::{MockCall, MockEmbedder};
pub use model::{Embedding, EmbeddingProvider, EmbeddingRole, ModelInfo, RolePrefixes};
