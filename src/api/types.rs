use serde::{Deserialize, Serialize};

use crate::watcher::types::BatchStatus;

// ============================================================
// Query params
// ============================================================

#[derive(Debug, Default, Deserialize)]
pub struct KindFilter {
    /// `erc20-balance` or `erc20-approval`.
    pub kind: Option<String>,
}

// ============================================================
// Responses
// ============================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub batches: usize,
    pub connected: usize,
    pub subscriptions: usize,
}

#[derive(Debug, Serialize)]
pub struct BatchesResponse {
    pub batches: Vec<BatchStatus>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
