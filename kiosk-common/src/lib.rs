pub mod config;
pub mod driver;
pub mod health;
pub mod interaction;
pub mod logging;
pub mod metrics;
pub mod metrics_consts;
pub mod pipeline;
pub mod record;
pub mod resolver;
pub mod source;
pub mod store;
pub mod validation;
pub mod writer;
