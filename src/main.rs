#[macro_use]
extern crate rocket;

mod api;
mod auth;
mod db;
mod documents;
mod env;
mod error;
mod models;
mod storage;
mod telemetry;
mod update;
mod validation;
#[cfg(test)]
mod test;

use std::str::FromStr;
use std::time::Duration;

use rocket::data::{Limits, ToByteUnit};
use rocket::{Build, Rocket, tokio};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use thiserror::Error;
use tracing::{error, info, warn};

use api::{
    api_create_milestone, api_create_plan_item, api_create_user, api_delete_document,
    api_delete_milestone, api_delete_user, api_download_document, api_get_documents,
    api_get_milestones, api_get_plan_documents, api_get_plan_items, api_get_plan_milestones,
    api_get_users, api_login, api_logout, api_me, api_register, api_update_milestone,
    api_update_plan_item, api_update_user, api_upload_document, health,
};
use auth::unauthorized_api;
use db::clean_expired_sessions;
use documents::reconcile_attachments;
use env::AppConfig;
use error::AppError;
use storage::UploadStore;
use telemetry::{TelemetryFairing, init_tracing};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Anyhow(anyhow::Error),
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Application error: {0}")]
    App(#[from] AppError),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Error::Anyhow(value)
    }
}

#[launch]
async fn rocket() -> _ {
    init_tracing();

    if let Err(e) = env::load_environment() {
        warn!("Could not load environment files: {}", e);
    }

    let config = AppConfig::from_env();

    let connect_options = SqliteConnectOptions::from_str(&config.database_url)
        .expect("Invalid DATABASE_URL")
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(config.max_db_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect_with(connect_options)
        .await
        .expect("Failed to initialize database pool");

    info!("Running database migrations...");
    match sqlx::migrate!("./migrations").run(&pool).await {
        Ok(_) => info!("Migrations completed successfully"),
        Err(e) => {
            error!("Failed to run migrations: {}", e);
            panic!("Database migration failed: {}", e);
        }
    }

    let store = UploadStore::new(&config.upload_dir).expect("Failed to prepare upload directory");

    match reconcile_attachments(&pool, &store).await {
        Ok(report) => info!(
            orphan_files_removed = report.orphan_files_removed,
            dangling_rows = report.dangling_rows,
            "Attachment reconciliation finished"
        ),
        Err(e) => error!("Attachment reconciliation failed: {}", e),
    }

    let pool_clone = pool.clone();

    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool_clone).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired sessions", count);
                    }
                }
                Err(e) => {
                    error!("Failed to clean expired sessions: {}", e);
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_secs(3600)).await;
        }
    });

    init_rocket(pool, store, config).await
}

pub async fn init_rocket(pool: SqlitePool, store: UploadStore, config: AppConfig) -> Rocket<Build> {
    info!("Starting plantrack API");

    // One slow or oversized upload must not exhaust the process.
    let figment = rocket::Config::figment().merge((
        "limits",
        Limits::default()
            .limit("file", 25.mebibytes())
            .limit("form", 26.mebibytes())
            .limit("data-form", 26.mebibytes()),
    ));

    rocket::custom(figment)
        .manage(pool)
        .manage(store)
        .manage(config)
        .mount(
            "/",
            routes![
                api_login,
                api_register,
                api_logout,
                api_me,
                api_get_users,
                api_create_user,
                api_update_user,
                api_delete_user,
                api_get_plan_items,
                api_create_plan_item,
                api_update_plan_item,
                api_get_plan_milestones,
                api_get_milestones,
                api_create_milestone,
                api_update_milestone,
                api_delete_milestone,
                api_get_documents,
                api_get_plan_documents,
                api_upload_document,
                api_delete_document,
                api_download_document,
                health,
            ],
        )
        .register("/", catchers![unauthorized_api])
        .attach(TelemetryFairing)
}
