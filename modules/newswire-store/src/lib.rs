pub mod error;
pub mod fallback;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use error::{Result, StoreError};
pub use fallback::FallbackSettings;
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use traits::*;
