//! QPesaPay gateway backend: crypto and M-Pesa payments behind one REST API.

pub mod api;
pub mod cache;
pub mod chains;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod utils;
pub mod workers;
