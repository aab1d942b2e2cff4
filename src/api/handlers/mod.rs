//! Route handlers for the warden HTTP API.
//!
//! Handlers stay thin: they extract the request, charge the route's rate
//! limit and delegate to [`crate::auth`]. Errors render through
//! [`crate::auth::AuthError`]'s `IntoResponse`.

pub mod admin;
pub mod auth;
pub mod health;
pub mod me;
pub mod types;
