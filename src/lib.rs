//! candlekeep: gap-free OHLCV candle ingestion.
//!
//! Samples a price feed, buckets samples into interval-aligned candles,
//! schedules incremental ingestion per (asset, interval), and certifies or
//! repairs ranges through gap detection and bounded backfill.

pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod ingestion;
pub mod jobs;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
