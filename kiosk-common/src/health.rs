use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use tracing::warn;

/// Liveness of the ingestion loop.
///
/// The loop reports in on every iteration. The process is live while the last report is
/// younger than the deadline and the loop has not declared itself unhealthy. A stalled or
/// unhealthy loop fails the liveness check so the orchestrator can restart the process.
#[derive(Clone)]
pub struct Liveness {
    inner: Arc<LivenessState>,
}

struct LivenessState {
    component: String,
    deadline: Duration,
    // Unix millis of the last healthy report; 0 until the first one.
    last_report_ms: AtomicI64,
    unhealthy: AtomicBool,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Registered but has not reported yet
    Starting,
    /// Reported within its deadline
    Healthy,
    /// Declared itself unhealthy
    Unhealthy,
    /// Missed its reporting deadline
    Stalled,
}

#[derive(Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    pub component: String,
    pub status: ComponentStatus,
}

impl IntoResponse for HealthStatus {
    /// Computes the axum status code based on the overall health status,
    /// and prints the component status in the body for debugging.
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

impl Liveness {
    pub fn new(component: &str, deadline: Duration) -> Self {
        Self {
            inner: Arc::new(LivenessState {
                component: component.to_owned(),
                deadline,
                last_report_ms: AtomicI64::new(0),
                unhealthy: AtomicBool::new(false),
            }),
        }
    }

    /// Must be called more frequently than the configured deadline.
    pub fn report_healthy(&self) {
        self.inner
            .last_report_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn report_unhealthy(&self) {
        self.inner.unhealthy.store(true, Ordering::Relaxed);
    }

    pub fn report_recovered(&self) {
        self.inner.unhealthy.store(false, Ordering::Relaxed);
        self.report_healthy();
    }

    pub fn get_status(&self) -> HealthStatus {
        let last_report_ms = self.inner.last_report_ms.load(Ordering::Relaxed);
        let age_ms = Utc::now().timestamp_millis().saturating_sub(last_report_ms);
        let deadline_ms = i64::try_from(self.inner.deadline.as_millis()).unwrap_or(i64::MAX);

        let status = if self.inner.unhealthy.load(Ordering::Relaxed) {
            ComponentStatus::Unhealthy
        } else if last_report_ms == 0 {
            ComponentStatus::Starting
        } else if age_ms > deadline_ms {
            ComponentStatus::Stalled
        } else {
            ComponentStatus::Healthy
        };

        let healthy = status == ComponentStatus::Healthy;
        if !healthy {
            warn!("{} liveness check failed: {:?}", self.inner.component, status);
        }

        HealthStatus {
            healthy,
            component: self.inner.component.clone(),
            status,
        }
    }
}
