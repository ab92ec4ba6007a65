//! # Permission Filter
//!
//! Endpoints list the permission services guarding them in the
//! `gateway/permissions` annotation (service ids). Every listed service is
//! looked up in the service registry and handed to a [`PermissionVerifier`];
//! the first failed report rejects the request.

use async_trait::async_trait;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::context::Context;
use crate::core::error::{codes, messages, ServeError, ServeResult};
use crate::core::lifecycle::Lifecycle;
use crate::core::types::{endpoint_annotations, Service};
use crate::discovery::registry::ServiceRegistry;
use crate::middleware::filter::{Filter, Next};
use crate::protocols::{ResponseBody, TransporterRegistry};

pub const PERMISSION_FILTER_ID: &str = "permission_filter";

/// Outcome of one permission check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PermissionReport {
    pub passed: bool,
    pub status_code: u16,
    pub error_code: String,
    pub message: String,
}

impl PermissionReport {
    pub fn passed() -> Self {
        Self {
            passed: true,
            ..Default::default()
        }
    }

    pub fn denied<S: Into<String>>(message: S) -> Self {
        Self {
            passed: false,
            status_code: StatusCode::FORBIDDEN.as_u16(),
            message: message.into(),
            ..Default::default()
        }
    }

    /// The error answered for a failed report
    pub fn to_error(&self) -> ServeError {
        let status = if self.status_code < 100 {
            StatusCode::FORBIDDEN
        } else {
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::FORBIDDEN)
        };
        let code = if self.error_code.is_empty() {
            codes::PERMISSION_ACCESS_DENIED
        } else {
            self.error_code.as_str()
        };
        let message = if self.message.is_empty() {
            messages::PERMISSION_ACCESS_DENIED
        } else {
            self.message.as_str()
        };
        ServeError::new(status, code, message)
    }
}

/// Checks a request against one permission service
#[async_trait]
pub trait PermissionVerifier: Send + Sync {
    async fn verify(&self, ctx: &Context, permission: &Service) -> ServeResult<PermissionReport>;
}

/// Verifies by invoking the permission service through its transporter.
/// The backend answers with a JSON [`PermissionReport`].
#[derive(Debug, Clone)]
pub struct TransporterPermissionVerifier {
    transporters: Arc<TransporterRegistry>,
}

impl TransporterPermissionVerifier {
    pub fn new(transporters: Arc<TransporterRegistry>) -> Self {
        Self { transporters }
    }
}

#[async_trait]
impl PermissionVerifier for TransporterPermissionVerifier {
    async fn verify(&self, ctx: &Context, permission: &Service) -> ServeResult<PermissionReport> {
        let transporter = self
            .transporters
            .get(&permission.protocol)
            .ok_or_else(|| ServeError::internal(messages::ROUTE_UNKNOWN_PROTOCOL).with_cause(&permission.protocol))?;
        let response = transporter.invoke_codec(ctx, permission).await?;
        let report = match response.body {
            ResponseBody::Json(value) => serde_json::from_value(value),
            ResponseBody::Bytes(bytes) => serde_json::from_slice(&bytes),
            ResponseBody::Text(text) => serde_json::from_str(&text),
            ResponseBody::Empty => Ok(PermissionReport::default()),
        };
        report.map_err(|e| ServeError::internal(messages::PERMISSION_VERIFY_ERROR).with_cause(e))
    }
}

pub struct PermissionFilter {
    services: Arc<ServiceRegistry>,
    verifier: Arc<dyn PermissionVerifier>,
}

impl std::fmt::Debug for PermissionFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionFilter")
            .field("services", &self.services.len())
            .finish()
    }
}

impl PermissionFilter {
    pub fn new(services: Arc<ServiceRegistry>, verifier: Arc<dyn PermissionVerifier>) -> Self {
        Self { services, verifier }
    }
}

impl Lifecycle for PermissionFilter {
    fn order(&self) -> i32 {
        -100
    }
}

#[async_trait]
impl Filter for PermissionFilter {
    fn filter_id(&self) -> &str {
        PERMISSION_FILTER_ID
    }

    async fn do_filter(&self, ctx: &mut Context, next: Next<'_>) -> ServeResult<()> {
        let permissions = ctx
            .endpoint()
            .annotation(endpoint_annotations::PERMISSIONS)
            .get_strings();
        for service_id in permissions {
            let service = self.services.by_id(&service_id).ok_or_else(|| {
                ServeError::internal(messages::PERMISSION_SERVICE_NOT_FOUND).with_cause(&service_id)
            })?;
            let report = self.verifier.verify(ctx, &service).await.map_err(|e| {
                ServeError::new(StatusCode::FORBIDDEN, codes::GATEWAY_INTERNAL, messages::PERMISSION_VERIFY_ERROR)
                    .with_cause(e)
            })?;
            if !report.passed {
                debug!(request_id = %ctx.request_id(), permission = %service_id, "FILTER:PERMISSION/denied");
                return Err(report.to_error());
            }
        }
        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_report_defaults() {
        let err = PermissionReport::default().to_error();
        assert_eq!(err.status_code, StatusCode::FORBIDDEN);
        assert_eq!(err.error_code, codes::PERMISSION_ACCESS_DENIED);
        assert_eq!(err.message, messages::PERMISSION_ACCESS_DENIED);

        let report = PermissionReport {
            passed: false,
            status_code: 401,
            error_code: "AUTH:EXPIRED".into(),
            message: "token expired".into(),
        };
        let err = report.to_error();
        assert_eq!(err.status_code, StatusCode::UNAUTHORIZED);
        assert_eq!(err.error_code, "AUTH:EXPIRED");
    }

    #[test]
    fn test_report_decoding() {
        let report: PermissionReport = serde_json::from_str(r#"{"passed": true}"#).unwrap();
        assert!(report.passed);
        let report: PermissionReport = serde_json::from_str(r#"{"statusCode": 429}"#).unwrap();
        assert!(!report.passed);
        assert_eq!(report.status_code, 429);
    }
}
