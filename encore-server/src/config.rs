use std::{env, time::Duration};

use crate::DEFAULT_PORT;

const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Deployment parameters, read from the environment at startup
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// How often expired delegation grants are physically removed
    pub sweep_interval: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let port = env::var("ENCORE_PORT")
            .map(|x| x.parse::<u16>().expect("Port must be a number"))
            .unwrap_or(DEFAULT_PORT);

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let sweep_interval = env::var("ENCORE_SWEEP_INTERVAL_SECS")
            .map(|x| x.parse::<u64>().expect("Sweep interval must be a number"))
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);

        Self {
            port,
            database_url,
            sweep_interval: Duration::from_secs(sweep_interval),
        }
    }
}
