pub mod cli;
pub mod config;
pub mod csv_source;
pub mod extract;
