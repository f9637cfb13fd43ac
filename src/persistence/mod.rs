//! Persistence contracts consumed for cluster schedule synchronization.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::PersistenceError;
pub use memory::InMemoryFlushLog;
pub use traits::{FlushLog, FlushLogEntry};
