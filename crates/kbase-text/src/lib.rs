pub mod index;
pub mod search;
pub mod tantivy_utils;

pub use index::TantivyChunkIndexer;
pub use search::TantivyLexicalSource;
