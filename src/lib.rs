pub mod api;
pub mod config;
pub mod db;
pub mod rpc;
pub mod service;
pub mod watcher;
