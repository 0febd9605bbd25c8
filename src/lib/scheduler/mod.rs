pub mod scheduler;
pub mod types;
