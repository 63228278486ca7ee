pub mod config;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod model;
pub mod normalize;
pub mod output;
pub mod parser;
pub mod relay;
pub mod store;
pub mod views;
