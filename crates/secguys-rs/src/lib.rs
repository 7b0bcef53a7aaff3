pub mod adapters;
pub mod analysis;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod parser;
pub mod pipeline;
pub mod resolver;
pub mod scans;
pub mod security;
pub mod semantic;
pub mod validator;
