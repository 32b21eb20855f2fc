//! Persistence layer — status snapshots and result artifacts.

pub mod file;
pub mod memory;
pub mod traits;

pub use file::FileStatusStore;
pub use memory::MemoryStatusStore;
pub use traits::StatusStore;
