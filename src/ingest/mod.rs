pub mod indexer;
pub mod interpreter;
pub mod pipeline;

pub use indexer::{CoreIndexer, MemIndexer};
pub use interpreter::{uid_of, EventInterpreter, IndexedDoc, JsonInterpreter};
pub use pipeline::IngestPipeline;
