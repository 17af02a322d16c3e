// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging and monitoring infrastructure.
//!
//! - **Tracing**: structured logging through `tracing`, set up once by the
//!   binary with [`init_telemetry`].
//! - **Monitoring**: [`ApiMonitor`] counts provider calls, internal
//!   operations and tokens. The application context owns one instance and
//!   hands it to the components that record into it.
//!
//! # Integration Guidelines
//!
//! 1. **Add `#[instrument]` to public async entry points**
//! 2. **Record ids as fields** (task_id, model_id, agent_id, execution_id), never secrets
//! 3. **Use appropriate log levels** (debug for details, info for events, warn/error for issues)

mod init;
pub mod metrics;

pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use metrics::{ApiMonitor, CallMetrics, Histogram, MonitorSnapshot};
