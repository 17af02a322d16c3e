// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Service plumbing: registry, message queue and circuit breaker.
//!
//! All three are plain values owned by the application context.

pub mod breaker;
pub mod queue;
pub mod registry;

pub use breaker::{BreakerSettings, CircuitBreaker, CircuitState};
pub use queue::{Envelope, MessageQueue, Subscription};
pub use registry::{ServiceInstance, ServiceRegistry};
