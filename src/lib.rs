//! Portfolio API backend with a Redis-backed admission layer.
//!
//! Every request passes a block gate and a fixed-window rate limiter before
//! reaching the business routes. Rejections are counted per client address,
//! and repeat offenders are blocked for a configurable period. All counters
//! live in a shared store, so several instances enforce the same limits, and
//! an unreachable store lets traffic through instead of refusing it.

pub mod config;
pub mod core;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod service;
pub mod store;
pub mod utils;
