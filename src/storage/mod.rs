pub mod local;
pub mod memory;
pub mod traits;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use traits::DocumentStore;
