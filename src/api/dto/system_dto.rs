//! Health and boot status DTOs.

use serde::Serialize;
use utoipa::ToSchema;

use crate::boot::BootStage;

/// Health check response.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    /// `healthy` once boot is ready, `booting` before.
    pub status: String,
    /// Current boot stage.
    pub stage: BootStage,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    /// Crate version.
    pub version: String,
}
