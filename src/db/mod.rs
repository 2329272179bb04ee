pub mod memory;
pub mod repository;
pub mod types;
