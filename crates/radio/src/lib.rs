pub mod cli;
pub mod config;
pub mod control;
pub mod http_source;
pub mod runtime;
pub mod status;
