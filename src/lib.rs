#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod core;
pub mod engine;
pub mod error;
pub mod factory;
pub mod ingest;
pub mod node;
pub mod reader;
pub mod snapshot;
pub mod stats;

pub use error::{NodeError, Result};
pub use node::{NodeConfig, SearchContext, SearchNode};
