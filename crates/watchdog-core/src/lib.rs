//! Core library for the network traffic rate watchdog
//!
//! This crate provides the core functionality for:
//! - Per-key counter sampling with consecutive-violation alarms
//! - Statistical, time-of-day and trend anomaly detection
//! - Compressed time-series storage with tiered retention
//! - Health checks and observability

pub mod alerting;
pub mod anomaly;
pub mod config;
pub mod health;
pub mod models;
pub mod observability;
pub mod scheduler;
pub mod storage;

pub use alerting::{AlertKind, AlertRecord, AlertSink, ChannelAlertSink, LogAlertSink};
pub use config::{ConfigError, WatchdogConfig};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse,
    ReadinessResponse,
};
pub use models::*;
pub use observability::{StructuredLogger, WatchdogMetrics};
pub use scheduler::{Scheduler, SchedulerBuilder, SchedulerHandle, WatchdogQuery};
pub use storage::{StorageEngine, StorageError};
