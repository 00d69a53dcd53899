//! Gemini chat - streaming chat session service
//!
//! A Rust backend implementing a chat session state machine over a
//! generative model with text and image input.

mod api;
mod attachments;
mod config;
mod llm;
mod runtime;
mod state_machine;

use api::{create_router, AppState};
use attachments::FsImageResolver;
use config::AppConfig;
use llm::ModelRegistry;
use runtime::{spawn_session, RegistryChatModel};
use state_machine::ChatContext;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gemini_chat=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let config = AppConfig::from_env();

    // Initialize model registry
    let registry = Arc::new(ModelRegistry::new(&config.llm)?);
    tracing::info!(
        text_model = %config.llm.text_model(),
        vision_model = %config.llm.vision_model(),
        gateway = config.llm.gateway.is_some(),
        "Model registry initialized"
    );

    // Start the session
    tracing::info!(
        root = %config.attachment_root.display(),
        policy = ?config.attachment_policy,
        "Attachment resolver configured"
    );
    let session = spawn_session(
        ChatContext::new(config.attachment_policy),
        RegistryChatModel::new(registry),
        FsImageResolver::new(config.attachment_root.clone()),
    );

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(AppState::new(session.clone()))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Gemini chat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            // Ends open event streams so the drain can finish
            session.shutdown();
        })
        .await?;

    Ok(())
}
