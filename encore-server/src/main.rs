use std::sync::Arc;

use encore_collab::{Collab, PgDatabase, SharedDatabase};
use encore_server::{config::Config, logging::init_logger, run_server};
use log::info;

#[tokio::main]
async fn main() {
    init_logger();

    let config = Config::from_env();

    let database: SharedDatabase = Arc::new(
        PgDatabase::new(&config.database_url)
            .await
            .expect("connects to database"),
    );

    info!("Database connected and migrated");

    let collab = Arc::new(Collab::new(database));
    collab.start_sweeper(config.sweep_interval);

    run_server(collab, config.port).await
}
