//! HTTP API
//!
//! axum surface over the matchmaker, settlement engine and ledger.

pub mod errors;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{build_app, spawn_recovery_loop, ApiServer};
