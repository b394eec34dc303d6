use envconfig::Envconfig;
use kiosk_common::config::DatabaseConfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(nested = true)]
    pub database: DatabaseConfig,

    #[envconfig(default = "eu-west-2")]
    pub aws_region: String,

    // Set for local S3-compatible stores; forces path-style addressing.
    pub s3_endpoint: Option<String>,

    #[envconfig(default = "lmnh_hist_data_")]
    pub kiosk_object_prefix: String,

    #[envconfig(default = ".csv")]
    pub kiosk_object_suffix: String,

    // 0 disables escalation
    #[envconfig(default = "10")]
    pub max_consecutive_store_failures: u32,
}
