//! Doctor handler

use crate::api::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Query, State},
    Json,
};
use ephem_doctor::{Doctor, DoctorReport};
use ephem_types::{Provider, TypesError};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct DoctorQuery {
    pub provider: String,
}

/// Run the provider preset on the daemon host. Failing checks are part of
/// the report, not an error.
pub async fn run_doctor(
    State(state): State<AppState>,
    Query(query): Query<DoctorQuery>,
) -> ApiResult<Json<DoctorReport>> {
    let provider: Provider = query
        .provider
        .parse()
        .map_err(|e: TypesError| ApiError::Validation(e.to_string()))?;

    let doctor = Doctor::for_provider(provider, &state.doctor)?;
    Ok(Json(doctor.run_doctor().await))
}
