pub mod answers;
pub mod auth;
pub mod error;
pub mod export;
pub mod health;
pub mod middleware;
pub mod questions;
pub mod reactions;
pub mod router;
pub mod state;
pub mod token;
pub mod validation;
pub mod views;

pub use error::{AppError, AppResult};
pub use router::build_router;
pub use state::{AppState, AppStateInner, Settings, spawn_limiter_pruning};
pub use token::TokenIssuer;
