pub mod config;
pub mod engine;
pub mod health;
pub mod init;
pub mod logger;
pub mod resolver;
pub mod server;
pub mod stats;
pub mod supervisor;
