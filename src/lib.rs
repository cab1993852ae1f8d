pub mod apis;
pub mod common;
pub mod config;
pub mod domain;
pub mod observability;
pub mod pipeline;
