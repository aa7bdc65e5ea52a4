pub mod schema;
pub mod search;
pub mod store;
pub mod table;
pub mod writer;

pub use search::LanceVectorSource;
pub use store::LanceChunkStore;
pub use writer::LanceChunkWriter;
