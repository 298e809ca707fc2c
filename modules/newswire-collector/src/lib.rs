pub mod collector;
pub mod dedup;
pub mod fetch;
pub mod guard;
pub mod scheduler;
pub mod sources;
pub mod stop;
