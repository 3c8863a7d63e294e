//! Toybox: onboarding backend for the toy subscription app.

pub mod api;
pub mod auth;
pub mod config;
pub mod device;
pub mod error;
pub mod onboarding;
pub mod server;
pub mod store;
