pub mod config;
pub mod fingerprint;
pub mod types;

pub use config::Config;
pub use fingerprint::*;
pub use types::*;
