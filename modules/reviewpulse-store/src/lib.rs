pub mod job_store;
pub mod memory;
pub mod migrate;
pub mod queue;

pub use job_store::{JobStore, PgJobStore};
pub use memory::MemoryJobStore;
pub use migrate::migrate;
pub use queue::{MemoryQueue, PgTaskQueue, TaskQueue};
