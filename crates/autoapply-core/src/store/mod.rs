//! Store implementations of the `TaskStore` port.

mod memory;

pub use memory::MemoryStore;
