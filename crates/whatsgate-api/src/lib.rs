//! WhatsGate API - REST API and webhook endpoint
//!
//! This crate provides the HTTP surface of WhatsGate: the Cloud API webhook,
//! API-key authenticated endpoints for accounts, messages, templates and
//! campaigns, plus health, metrics and OpenAPI routes.

#![recursion_limit = "256"]

pub mod auth;
pub mod handlers;
pub mod openapi;
pub mod routes;

pub use auth::AppState;
pub use openapi::create_openapi_routes;
pub use routes::create_router;
