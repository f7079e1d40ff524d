//! # Integration Hub Library
//!
//! Execution engine for organization-scoped ERP/CRM integrations: credential
//! vault, transform pipeline, pull cache, outbound gateway and the pull/push
//! orchestrators, plus the thin HTTP surface in front of them.

pub mod auth;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod mapping;
pub mod models;
pub mod orchestrator;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub mod transforms;
pub mod vault;
pub use migration;
