pub mod event;
pub mod schema;
pub mod sharding;
pub mod version;

pub use event::{IngestEvent, SKIP_TYPE};
pub use schema::Schema;
pub use sharding::{ModShard, PartitionId, ShardingStrategy};
pub use version::{lexical_comparator, numeric_comparator, VersionComparator};
