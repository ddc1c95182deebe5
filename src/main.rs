//! Quiz Engine · adaptive quiz session backend
//!
//! - Axum HTTP JSON API under /api/v1
//! - Adaptive question selection from per-theme mastery
//! - Server-side answer verification with per-session seeded shuffles
//! - Optional OpenAI rubric grading for open answers (via environment variables)
//!
//! Important env variables:
//!   PORT                 : u16 (default 3000)
//!   QUIZ_CONFIG_PATH     : path to TOML catalog (prompts, quizzes, questions, users, badges)
//!   OPENAI_API_KEY       : enables AI grading if present
//!   OPENAI_BASE_URL      : default "https://api.openai.com/v1"
//!   OPENAI_GRADING_MODEL : default "gpt-4o-mini"
//!   LOG_LEVEL            : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT           : "pretty" (default) or "json"

mod telemetry;
mod util;
mod error;
mod domain;
mod config;
mod seeds;
mod shuffle;
mod mastery;
mod selector;
mod open_answer;
mod verifier;
mod grading;
mod store;
mod achievements;
mod session;
mod state;
mod protocol;
mod openai;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::config::ServerConfig;
use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Shared application state (store seeded with content, OpenAI client, prompts).
  let state = Arc::new(AppState::from_env().await);

  // HTTP router with routes, CORS and tracing layers.
  let app = build_router(state.clone());

  let server = ServerConfig::from_env();
  let addr = SocketAddr::from(([0, 0, 0, 0], server.port));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "quiz_engine", %addr, "HTTP server listening");
  axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(target: "quiz_engine", error = %e, "Failed to listen for shutdown signal");
    return;
  }
  info!(target: "quiz_engine", "Shutdown signal received");
}
