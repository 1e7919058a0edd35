// src/lib.rs
//! A simulated stock-trading web application: register, look up quotes,
//! buy and sell shares with virtual cash, and review the resulting
//! portfolio and transaction history.
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod portfolio;
pub mod quote;
pub mod views;

pub use api::{app, routes};
pub use config::Config;
pub use db::Database;
pub use error::AppError;
