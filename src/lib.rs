pub mod billing;
pub mod config;
pub mod conflicts;
pub mod email;
pub mod error;
pub mod extractor;
pub mod internal;
pub mod organizations;
pub mod ratelimit;
pub mod requests;
pub mod routes;
pub mod tokens;
pub mod zip;
