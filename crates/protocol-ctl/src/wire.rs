//! Control-plane wire types.
//!
//! Requests are JSON objects carrying a `command` string, an optional
//! protocol version triple, and command-specific fields at the top level.
//! Each handler deserializes its own typed parameter struct, so a request
//! either decodes completely or is rejected before any state changes.

use common::DeviceSelector;
use mapper::{ExtentSpec, IoStatsSnapshot, MapError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Protocol version spoken by this dispatcher.
pub const VERSION: [u32; 3] = [4, 16, 0];

/// Envelope fields common to every request.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub command: String,
    #[serde(default)]
    pub version: Option<[u32; 3]>,
}

/// `create`
#[derive(Debug, Deserialize)]
pub struct CreateParams {
    pub name: String,
    #[serde(default)]
    pub uuid: Option<Uuid>,
    /// Optional cap, in sectors, on any promoted table.
    #[serde(default)]
    pub capacity: Option<u64>,
}

/// Commands addressing one device.
#[derive(Debug, Deserialize)]
pub struct DeviceParams {
    #[serde(flatten)]
    pub selector: DeviceSelector,
}

/// `rename`
#[derive(Debug, Deserialize)]
pub struct RenameParams {
    #[serde(flatten)]
    pub selector: DeviceSelector,
    pub new_name: String,
}

/// `reload`
#[derive(Debug, Deserialize)]
pub struct ReloadParams {
    #[serde(flatten)]
    pub selector: DeviceSelector,
    pub table: Vec<ExtentSpec>,
}

/// `status` / `deps`
#[derive(Debug, Deserialize)]
pub struct QueryParams {
    #[serde(flatten)]
    pub selector: DeviceSelector,
    /// Query the staged table instead of the active one.
    #[serde(default)]
    pub inactive: bool,
    /// For `status`: emit the full table line rather than the short info.
    #[serde(default)]
    pub table: bool,
}

/// `message`
#[derive(Debug, Deserialize)]
pub struct MessageParams {
    #[serde(flatten)]
    pub selector: DeviceSelector,
    /// Sector selecting the extent; zero addresses the first entry.
    #[serde(default)]
    pub sector: u64,
    pub message: String,
}

/// Per-device row in `names`.
#[derive(Debug, Serialize)]
pub struct DeviceRow {
    pub name: String,
    pub uuid: Uuid,
    pub minor: u32,
}

/// Full device state for `info`.
#[derive(Debug, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub uuid: Uuid,
    pub minor: u32,
    pub open_count: u32,
    pub suspended: bool,
    pub active_present: bool,
    pub inactive_present: bool,
    pub target_count: usize,
    pub size_sectors: u64,
    pub stats: IoStatsSnapshot,
}

/// Per-extent row in `status`.
#[derive(Debug, Serialize)]
pub struct StatusRow {
    pub start: u64,
    pub length: u64,
    pub target: String,
    pub params: String,
}

/// Response envelope sent back to the control plane.
#[derive(Debug, Serialize)]
pub struct CtlResponse {
    pub status: &'static str,
    pub version: [u32; 3],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CtlResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            status: "ok",
            version: VERSION,
            code: None,
            reason: None,
            data: Some(data),
        }
    }

    pub fn error(code: &'static str, reason: String) -> Self {
        Self {
            status: "error",
            version: VERSION,
            code: Some(code),
            reason: Some(reason),
            data: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Stable status code for each mapping-layer error.
pub fn error_code(err: &MapError) -> &'static str {
    match err {
        MapError::NotFound(_) => "not_found",
        MapError::InvalidArgument(_) => "invalid_argument",
        MapError::Busy(_) => "busy",
        MapError::IoPartial { .. } => "io_partial",
        MapError::Unsupported(_) => "unsupported",
        MapError::Io(_) => "io_error",
    }
}
