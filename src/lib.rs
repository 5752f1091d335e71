//! OrderEase Shop Ordering Service
//!
//! Multi-tenant back office and ordering for small shops.
//!
//! ## Features
//! - Shop management with expiry and per-shop order status flows
//! - Product catalog with option categories, options and tags
//! - Orders with price snapshots and transactional stock
//! - JWT sessions with revocation
//! - Rotating temp tokens for walk-in customers

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod id;
pub mod services;
pub mod state;
pub mod store;
pub mod tasks;

pub use error::{AppError, Result};
