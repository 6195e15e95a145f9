//! # Frameseek Embedding
//!
//! Query embeddings via Ollama, keyframe similarity search via Qdrant, and
//! an Ollama-backed query reasoner for the refinement agent.

pub mod ollama;
pub mod qdrant;
pub mod reasoner;

pub use ollama::OllamaClient;
pub use qdrant::QdrantIndex;
pub use reasoner::OllamaReasoner;
