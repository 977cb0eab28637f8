//! Teardown schedule handlers

use super::parse_stack_name;
use crate::api::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use ephem_scheduler::TeardownStatus;
use ephem_types::TeardownSchedule;
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// New deadline; `null` disables automatic teardown
#[derive(Debug, Deserialize)]
pub struct UpdateTeardownRequest {
    /// Outer `None` when the key is absent, which is rejected.
    #[serde(default, deserialize_with = "present")]
    pub deadline: Option<Option<DateTime<Utc>>>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Option<DateTime<Utc>>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
pub struct ExtendTeardownRequest {
    pub by_secs: u64,
}

pub async fn get_teardown_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<TeardownStatus>> {
    let name = parse_stack_name(&name)?;
    Ok(Json(state.schedules.get_teardown_status(&name).await?))
}

pub async fn update_teardown_schedule(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<UpdateTeardownRequest>,
) -> ApiResult<Json<TeardownSchedule>> {
    let name = parse_stack_name(&name)?;
    let deadline = request.deadline.ok_or_else(|| {
        ApiError::Validation("deadline is required; send null to disable automatic teardown".to_string())
    })?;
    let schedule = state
        .schedules
        .update_teardown_schedule(&name, deadline)
        .await?;

    // A deadline may have moved into the next sweep's window
    state.scheduler.trigger();
    Ok(Json(schedule))
}

pub async fn cancel_teardown(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<TeardownSchedule>> {
    let name = parse_stack_name(&name)?;
    Ok(Json(state.schedules.cancel_teardown(&name).await?))
}

pub async fn extend_teardown(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<ExtendTeardownRequest>,
) -> ApiResult<Json<TeardownSchedule>> {
    let name = parse_stack_name(&name)?;
    if request.by_secs == 0 {
        return Err(ApiError::Validation("by_secs must be positive".to_string()));
    }
    let schedule = state
        .schedules
        .extend_teardown(&name, Duration::from_secs(request.by_secs))
        .await?;
    Ok(Json(schedule))
}

/// Request an immediate expiry sweep
pub async fn trigger_sweep(State(state): State<AppState>) -> StatusCode {
    state.scheduler.trigger();
    StatusCode::ACCEPTED
}
