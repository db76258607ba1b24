use actix_web::{web, App, HttpServer};
use chat_relay_service::{
    config, db, error, logging, routes,
    services::{MemoryStore, MessageStore, PostgresStore},
    state::AppState,
};
use std::sync::Arc;

async fn build_store(cfg: &config::Config) -> error::AppResult<Arc<dyn MessageStore>> {
    let Some(database) = &cfg.database else {
        tracing::warn!(
            capacity = cfg.memory_capacity,
            "DATABASE_URL not set, history is kept in memory only"
        );
        return Ok(Arc::new(MemoryStore::with_capacity(cfg.memory_capacity)));
    };

    let pool = db::init_pool(database)?;
    let store = PostgresStore::new(pool);

    // The relay keeps serving live traffic while the database is down
    if let Err(e) = store.bootstrap().await {
        tracing::warn!(error = %e, "database unavailable at start-up, will retry on first use");
    }
    Ok(Arc::new(store))
}

#[actix_web::main]
async fn main() -> error::AppResult<()> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let store = build_store(&cfg).await?;
    tracing::info!(backend = store.backend(), "message store ready");

    if cfg.accounts.is_empty() {
        tracing::warn!("no login accounts configured, every login will be rejected");
    }

    let state = AppState::new(cfg.clone(), store);
    let bind_addr = cfg.bind_addr();
    tracing::info!(%bind_addr, "starting chat-relay-service");

    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("server: {e}")))
}
