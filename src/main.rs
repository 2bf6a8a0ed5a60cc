//! # Speech Emotion Backend - Main Application Entry Point
//!
//! Actix-web server that classifies the emotion in uploaded speech clips.
//! A client POSTs an audio file, the server runs the MFCC feature pipeline
//! and the trained BiLSTM classifier, and responds with the predicted label
//! and per-class probabilities.
//!
//! ## Application Architecture:
//! - **config**: Configuration (TOML file + environment variables)
//! - **device**: Compute device detection for inference (CPU/CUDA/Metal)
//! - **features**: Audio decoding and MFCC feature extraction
//! - **inference**: Scaler, BiLSTM classifier, and the predictor facade
//! - **state**: Shared state (predictor, extractor, config, metrics)
//! - **health**: Health and metrics endpoints
//! - **middleware**: Metrics collection middleware
//! - **handlers**: The /predict and /config endpoints
//! - **error**: Error types and HTTP error responses
//!
//! ## Startup contract:
//! The model and scaler artifacts are loaded before the server binds. If
//! either is missing or inconsistent with the configured label table, startup
//! fails - the server never runs in a state where every prediction would 500.

mod config;
mod device;
mod error;
mod features;
mod handlers;
mod health;
mod inference;
mod middleware;
mod state;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use config::AppConfig;
use features::FeatureExtractor;
use inference::EmotionPredictor;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown flag set by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting speech-emotion-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    // Build the inference stack before binding the server. A missing artifact
    // is a startup failure, not a runtime one.
    let inference_device = device::create_device_from_string(&config.model.device);
    info!(
        "Inference device: {}",
        device::DeviceManager::get_device_info(&inference_device)
    );

    let predictor = EmotionPredictor::load(&config.model, inference_device)
        .context("failed to load model artifacts")?;
    let extractor = FeatureExtractor::new();

    let app_state = AppState::new(config.clone(), extractor, predictor);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        // Browser clients upload recordings directly, so CORS stays open
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/predict", web::post().to(handlers::predict)),
            )
            // Root-level aliases matching the original API surface
            .route("/health", web::get().to(health::health_check))
            .route("/predict", web::post().to(handlers::predict))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Run until the server dies or a shutdown signal arrives
    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize structured logging.
///
/// `RUST_LOG` overrides the default filter of
/// "speech_emotion_backend=debug,actix_web=info".
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "speech_emotion_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Install SIGTERM/SIGINT handlers that flip the shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag until it is set.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
