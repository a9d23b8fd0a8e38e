//! Client-side synchronization core for the trading dashboard: polled bridge endpoints,
//! a push stream with reconnection, and a merged state store for presentation.

pub mod bridge;
pub mod candles;
pub mod classify;
pub mod config;
pub mod engine;
pub mod feed;
pub mod graceful_shutdown;
pub mod health;
pub mod json_util;
pub mod payload;
pub mod reconnect;
pub mod recorder;
pub mod scheduler;
pub mod staleness;
pub mod store;
pub mod symbol;
pub mod timer;
pub mod types;
