pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod reservation;


pub use config::AppConfig;
pub use db::Database;
pub use error::{ErrorCategory, ErrorResponse, FulfillmentStage, ServiceError, ServiceResult};

/// Installs logging with the configured filter, opens (creating if needed)
/// the database described by `config` and brings its schema up to date.
pub fn open(config: &AppConfig) -> ServiceResult<Database> {
    logging::init(&config.log_filter);
    std::fs::create_dir_all(&config.data_dir)?;

    let db_path = config.database_path();
    let db = Database::open(&db_path)?.with_popular_items_limit(config.popular_items_limit);
    db.initialize()?;

    tracing::info!(path = %db_path.display(), "database ready");
    Ok(db)
}
