#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

pub mod coordinator;
pub mod fusion;
pub mod rerank;
pub mod retry;

pub use coordinator::HybridRetrievalCoordinator;
pub use rerank::{RerankEngine, TermOverlapScorer};
