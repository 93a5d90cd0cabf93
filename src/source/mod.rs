//! Source-system adapters the producers extract from.

pub mod json_file;
pub mod memory;
pub mod traits;

pub use json_file::JsonFileSource;
pub use memory::MemorySource;
pub use traits::SourceSystem;
