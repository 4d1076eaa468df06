//! REST handlers for the /assets endpoints

use crate::{
    rest_error::RESTError,
    types::{parse_hash, PageQuery},
    ApiState,
};
use andamio_common::{model::Asset, PolicyId};
use axum::{
    extract::{Path, Query, State},
    Json,
};

/// Handle `/assets/policy/{policy_id}`
pub async fn handle_assets_by_policy(
    State(state): State<ApiState>,
    Path(policy_id): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Asset>>, RESTError> {
    let policy_id: PolicyId = parse_hash("policy_id", &policy_id)?;
    let page = page.page(&state.config)?;
    let mut txn = state.db.read().await?;
    let assets = state.db.metadata().assets_by_policy(&mut txn, &policy_id, page).await?;
    txn.discard().await;
    Ok(Json(assets))
}

/// Handle `/assets/fingerprint/{fingerprint}`
pub async fn handle_assets_by_fingerprint(
    State(state): State<ApiState>,
    Path(fingerprint): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Asset>>, RESTError> {
    if !fingerprint.starts_with("asset1") {
        return Err(RESTError::invalid_param("fingerprint", "expected an asset1 fingerprint"));
    }
    let page = page.page(&state.config)?;
    let mut txn = state.db.read().await?;
    let assets = state.db.metadata().assets_by_fingerprint(&mut txn, &fingerprint, page).await?;
    txn.discard().await;
    Ok(Json(assets))
}

/// Handle `/assets/name/{name}`
pub async fn handle_assets_by_name(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Asset>>, RESTError> {
    let page = page.page(&state.config)?;
    let mut txn = state.db.read().await?;
    let assets = state.db.metadata().assets_by_name(&mut txn, &name, page).await?;
    txn.discard().await;
    Ok(Json(assets))
}
