//! # Telemetry Module
//!
//! Handles probe logging to JSONL files with rotation.
//!
//! This module handles:
//! - Receiving [`ProbeReport`](crate::ping::ProbeReport)s from the ping-pong loop
//! - Formatting them as JSONL (JSON Lines) with a UTC timestamp
//! - Writing to rotating log files (max N records per file)
//! - Retaining only the last M files

pub mod logger;

pub use logger::ProbeLog;
