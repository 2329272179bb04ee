use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use std::str::FromStr;
use std::sync::Arc;

use crate::db::types::SubscriptionKind;
use crate::watcher::types::BatchStatus;

use super::types::*;
use super::AppState;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn api_error(status: StatusCode, msg: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: msg.into(),
        }),
    )
}

fn parse_kind(filter: &KindFilter) -> Result<Option<SubscriptionKind>, (StatusCode, Json<ErrorResponse>)> {
    filter
        .kind
        .as_deref()
        .map(SubscriptionKind::from_str)
        .transpose()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))
}

fn batches_response(batches: Vec<BatchStatus>, kind: Option<SubscriptionKind>) -> BatchesResponse {
    let batches: Vec<BatchStatus> = batches
        .into_iter()
        .filter(|b| kind.map_or(true, |k| b.kind == k))
        .collect();
    BatchesResponse {
        total: batches.len(),
        batches,
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> ApiResult<HealthResponse> {
    let statuses = state.service.statuses().await;
    let running: Vec<&BatchStatus> = statuses.iter().filter(|s| s.is_running).collect();
    let connected = running.iter().filter(|s| s.is_connected).count();

    let status = if connected == running.len() {
        "ok"
    } else {
        "degraded"
    };

    Ok(Json(HealthResponse {
        status: status.to_string(),
        batches: statuses.len(),
        connected,
        subscriptions: statuses.iter().map(|s| s.subscription_count).sum(),
    }))
}

pub async fn list_batches(
    State(state): State<Arc<AppState>>,
    Query(params): Query<KindFilter>,
) -> ApiResult<BatchesResponse> {
    let kind = parse_kind(&params)?;
    let statuses = state.service.statuses().await;
    Ok(Json(batches_response(statuses, kind)))
}

pub async fn chain_batches(
    State(state): State<Arc<AppState>>,
    Path(chain_id): Path<u64>,
    Query(params): Query<KindFilter>,
) -> ApiResult<BatchesResponse> {
    let kind = parse_kind(&params)?;
    if !state.service.watches_chain(chain_id) {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Chain {} is not watched", chain_id),
        ));
    }
    let statuses = state.service.chain_statuses(chain_id).await;
    Ok(Json(batches_response(statuses, kind)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::booted_service;

    #[tokio::test]
    async fn test_health_reports_connected_batches() {
        let (service, _handle) = booted_service().await;
        let state = Arc::new(AppState {
            service: Arc::new(service),
        });

        let Json(health) = health(State(state.clone())).await.unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.batches, 2);
        assert_eq!(health.connected, 2);
        assert_eq!(health.subscriptions, 3);

        state.service.shutdown().await;
    }

    #[tokio::test]
    async fn test_batches_filtered_by_kind() {
        let (service, _handle) = booted_service().await;
        let state = Arc::new(AppState {
            service: Arc::new(service),
        });

        let filter = KindFilter {
            kind: Some("erc20-approval".to_string()),
        };
        let Json(response) = list_batches(State(state.clone()), Query(filter))
            .await
            .unwrap();
        assert_eq!(response.total, 1);
        assert_eq!(response.batches[0].kind, SubscriptionKind::Approval);

        let bad = KindFilter {
            kind: Some("erc721".to_string()),
        };
        let (status, _) = list_batches(State(state.clone()), Query(bad))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        state.service.shutdown().await;
    }

    #[tokio::test]
    async fn test_unwatched_chain_is_not_found() {
        let (service, _handle) = booted_service().await;
        let state = Arc::new(AppState {
            service: Arc::new(service),
        });

        let Json(response) = chain_batches(State(state.clone()), Path(1), Query(KindFilter::default()))
            .await
            .unwrap();
        assert_eq!(response.total, 2);

        let (status, _) = chain_batches(State(state.clone()), Path(8453), Query(KindFilter::default()))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);

        state.service.shutdown().await;
    }
}
