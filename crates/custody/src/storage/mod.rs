pub mod memory;

pub use memory::MemoryStateBackend;
