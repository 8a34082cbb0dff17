//! Sold-out ranking endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use distributed_lock::DistributedLock;
use serde::{Deserialize, Serialize};
use store::Store;

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 100;

#[derive(Deserialize)]
pub struct RankingQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct SoldOutResponse {
    pub rank: usize,
    pub schedule_id: i64,
    pub sold_out_at_ms: i64,
}

/// GET /rankings/sold-out: schedules in the order they sold out.
#[tracing::instrument(skip(state, query))]
pub async fn sold_out<S: Store + Clone, L: DistributedLock + 'static>(
    State(state): State<Arc<AppState<S, L>>>,
    Query(query): Query<RankingQuery>,
) -> Result<Json<Vec<SoldOutResponse>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    if limit == 0 || limit > MAX_LIMIT {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {MAX_LIMIT}"
        )));
    }

    let entries = state.ranking.top(limit).await?;
    Ok(Json(
        entries
            .into_iter()
            .enumerate()
            .map(|(i, e)| SoldOutResponse {
                rank: i + 1,
                schedule_id: e.schedule_id.get(),
                sold_out_at_ms: e.sold_out_at_ms,
            })
            .collect(),
    ))
}
