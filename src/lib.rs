pub mod config;
pub mod document;
pub mod engine;
pub mod errors;
pub mod extraction;
pub mod mcp;
pub mod service;
pub mod types;
