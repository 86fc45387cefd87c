mod catalog;
mod classifier;
mod config;
mod history;
mod image_ref;
mod inference;
mod ratelimit;
mod routes;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{App, HttpServer, web};
use catalog::CategoryCatalog;
use classifier::mock::MockClassifier;
use classifier::orchestrator::ScanOrchestrator;
use config::AppConfig;
use history::ScanHistory;
use history::memory::InMemoryScanHistory;
use inference::adapter::InferenceAdapter;
use inference::runtime::{LlamaServerBackend, VisionBackend};
use ratelimit::limiter::ScanRateGate;
use routes::configure_routes;
use std::env;
use std::sync::Arc;

fn startup_error(context: &str, e: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, format!("{}: {}", context, e))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    }

    let config = AppConfig::load().map_err(|e| startup_error("Invalid configuration", e))?;

    let catalog = match &config.catalog_path {
        Some(path) => CategoryCatalog::load(path)
            .map_err(|e| startup_error("Failed to load category catalog", e))?,
        None => CategoryCatalog::builtin(),
    };
    let catalog = Arc::new(catalog);
    log::info!("Category catalog ready with {} categories", catalog.len());

    let http = reqwest::Client::new();
    let backend = Arc::new(LlamaServerBackend::new(config.model.clone(), http.clone()));
    backend.warm_up();

    let adapter = InferenceAdapter::new(
        backend,
        http,
        config.model.max_tokens,
        config.model.max_inference_time(),
    );
    if config.mock.seed.is_some() {
        log::warn!("Mock classifier is seeded; fallback results are deterministic");
    }
    let mock = MockClassifier::from_seed(catalog, config.mock.seed);
    let orchestrator = web::Data::new(ScanOrchestrator::new(adapter, mock));

    let history: Arc<dyn ScanHistory> = Arc::new(InMemoryScanHistory::default());
    let history = web::Data::from(history);

    let gate = Arc::new(ScanRateGate::new(
        config.rate_limit.max_requests,
        config.rate_limit.window(),
    ));
    log::info!(
        "Scan rate limit: {} per {}s per client",
        config.rate_limit.max_requests,
        config.rate_limit.window_secs
    );

    let bind_address = format!("0.0.0.0:{}", config.server.port);
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::AUTHORIZATION,
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(orchestrator.clone())
            .app_data(history.clone())
            .configure(|cfg| configure_routes(cfg, gate.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}
