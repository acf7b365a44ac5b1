//! Translates between the Anthropic Messages API and an OpenAI-compatible
//! chat-completions upstream: request normalization, per-model-family
//! request/response adaptation, and streaming protocol translation.

use std::sync::Arc;

use axum::Router;

mod adapters;
mod assembler;
mod block_table;
pub mod config;
mod dispatcher;
pub mod error;
mod identity_filter;
mod normalize;
mod openai_request;
pub mod resolver;
mod sse;
mod translator;
pub mod types;
mod unknown_fields;
mod upstream;

pub use dispatcher::AppState;
pub use error::GatewayError;

/// Builds the gateway's axum router over a concrete [`resolver::Resolver`].
pub fn router(resolver: Arc<dyn resolver::Resolver>) -> Router {
    let state = Arc::new(AppState {
        resolver,
        upstream: upstream::UpstreamClient::new(),
    });
    dispatcher::router(state)
}
