//! Stack lifecycle handlers

use super::parse_stack_name;
use crate::api::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use ephem_orchestrator::{DeployRequest, TeardownReport};
use ephem_types::{Provider, ResourceSpec, ServiceUrls, Stack, TypesError};
use serde::Deserialize;
use std::time::Duration;

/// Create stack request
#[derive(Debug, Deserialize)]
pub struct CreateStackRequest {
    pub name: String,
    pub provider: String,
    pub resources: Vec<ResourceSpec>,
    /// Omit to disable automatic teardown
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

impl CreateStackRequest {
    fn into_deploy_request(self) -> ApiResult<DeployRequest> {
        let name = parse_stack_name(&self.name)?;
        let provider: Provider = self
            .provider
            .parse()
            .map_err(|e: TypesError| ApiError::Validation(e.to_string()))?;

        let mut request = DeployRequest::new(name, provider, self.resources);
        if let Some(ttl) = self.ttl_secs {
            request = request.with_ttl(Duration::from_secs(ttl));
        }
        Ok(request)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListStacksQuery {
    /// Include destroyed stacks
    #[serde(default)]
    pub all: bool,
}

/// Deploy a stack and wait until it is running
pub async fn create_stack(
    State(state): State<AppState>,
    Json(request): Json<CreateStackRequest>,
) -> ApiResult<(StatusCode, Json<Stack>)> {
    let request = request.into_deploy_request()?;
    let name = request.name.clone();

    tracing::info!(stack = %name, provider = %request.provider, "Deploy requested");
    state.orchestrator.deploy(request, &state.shutdown).await?;

    let stack = state.orchestrator.get_stack(&name).await?;
    Ok((StatusCode::CREATED, Json(stack)))
}

pub async fn list_stacks(
    State(state): State<AppState>,
    Query(query): Query<ListStacksQuery>,
) -> ApiResult<Json<Vec<Stack>>> {
    Ok(Json(state.orchestrator.list_stacks(query.all).await?))
}

pub async fn get_stack(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Stack>> {
    let name = parse_stack_name(&name)?;
    Ok(Json(state.orchestrator.get_stack(&name).await?))
}

/// Tear a stack down now, regardless of its deadline
pub async fn teardown_stack(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<TeardownReport>> {
    let name = parse_stack_name(&name)?;

    tracing::info!(stack = %name, "Teardown requested");
    Ok(Json(state.orchestrator.teardown(&name, &state.shutdown).await?))
}

pub async fn get_service_urls(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<ServiceUrls>> {
    let name = parse_stack_name(&name)?;
    Ok(Json(state.orchestrator.get_service_urls(&name).await?))
}
