pub mod api;
pub mod bounds;
pub mod calendar;
pub mod characters;
pub mod config;
pub mod dataset;
pub mod discovery;
pub mod export;
pub mod http_client;
pub mod import;
pub mod ingest;
pub mod matchups;
pub mod rate_limit;
pub mod sets;
pub mod simplex;
