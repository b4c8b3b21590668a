//! Vector storage for chunk embeddings.
//!
//! [`VectorStore`] is the seam between the indexing core and the vector
//! database. [`InMemoryVectorStore`] backs tests and single-process runs,
//! [`QdrantOps`] talks to a Qdrant server over gRPC.

pub mod in_memory_store;
pub mod qdrant_ops;
pub mod vector_store;

pub use in_memory_store::InMemoryVectorStore;
pub use qdrant_ops::QdrantOps;
pub use vector_store::{
    BoxFuture, Payload, ScoredVectorPoint, StoredPoint, VectorPoint, VectorStore,
    VectorStoreError, cosine_similarity,
};
