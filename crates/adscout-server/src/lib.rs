//! REST control plane: job submission, status, cancellation, and scheduler stats.

pub mod auth;
pub mod dto;
pub mod error;
pub mod openapi;
pub mod routes;
pub mod state;
