use actix_web::{web, App, HttpServer};
use actix_cors::Cors;
use dotenv::dotenv;
use notification_server::{api, health_check, AppError, AppState, Settings};
use std::net::TcpListener;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> notification_server::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Load configuration
    let config = Settings::new()?;

    // Initialize logging; RUST_LOG wins over log.level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Configuration loaded for {} environment", config.environment);
    info!("Starting server at {}:{}", config.server.host, config.server.port);

    // Initialize application state
    let state = AppState::new(config.clone()).await?;

    if config.scheduler.enabled {
        let scheduler_state = state.clone();
        let interval = Duration::from_secs(config.scheduler.interval_secs.max(1));
        info!("In-process scheduler enabled, running every {:?}", interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                scheduler_state.run_scheduled(chrono::Utc::now()).await;
            }
        });
    }

    let state = web::Data::new(state);

    // Create and bind TCP listener
    let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))?;

    // Start HTTP server
    let cors_config = config.cors.clone();
    HttpServer::new(move || {
        let cors = if cors_config.enabled {
            let cors = if cors_config.allow_any_origin {
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
            } else {
                cors_config
                    .allowed_origins
                    .iter()
                    .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
                    .allowed_methods(vec!["GET", "POST", "PUT", "DELETE"])
                    .allowed_headers(vec!["Authorization", "Content-Type"])
            };
            cors.max_age(cors_config.max_age as usize)
        } else {
            // CORS disabled - use most restrictive settings
            Cors::default()
        };

        App::new()
            .wrap(cors)
            .app_data(state.clone())
            .route("/health", web::get().to(health_check))
            .configure(api::configure)
    })
    .listen(listener)?
    .workers(config.server.workers as usize)
    .run()
    .await
    .map_err(|e| AppError::InternalError(e.to_string()))?;

    Ok(())
}
