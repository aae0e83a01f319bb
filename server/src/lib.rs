//! Control-plane server: admin API, liveness endpoint, load-balancer proxy
//! and the background schedulers.

pub mod auth;
pub mod config;
pub mod error;
pub mod health;
pub mod proxy;
pub mod rest;
pub mod scheduler;
pub mod state;

pub use config::Settings;
pub use error::{ApiError, ApiResponse};
pub use rest::create_router;
pub use state::AppState;
