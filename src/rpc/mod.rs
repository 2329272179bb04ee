pub mod balance;
pub mod resolver;
