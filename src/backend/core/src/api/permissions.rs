//! Permission handlers.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use tracing::info;

use super::{ApiJson, ApiPath, ApiResponse, AppState};
use crate::error::{Result, TaskgateError};
use crate::pagination::{OffsetPagination, SortField, SortSpec};
use crate::rbac::models::{Permission, PermissionId, PermissionName};
use crate::store::PermissionFilter;

#[derive(Debug, Deserialize)]
pub struct CreatePermissionRequest {
    pub name: PermissionName,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePermissionRequest {
    pub name: Option<PermissionName>,
    pub description: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionQuery {
    pub name: Option<String>,
    pub description: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub page: Option<String>,
    pub per_page: Option<String>,
}

async fn find_permission(state: &AppState, id: PermissionId) -> Result<Permission> {
    state
        .store
        .find_permission(id)
        .await?
        .ok_or_else(|| TaskgateError::not_found("permission", id))
}

/// POST /api/v1/permissions
pub async fn create_permission(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreatePermissionRequest>,
) -> Result<impl IntoResponse> {
    if !req.name.is_well_formed() {
        return Err(TaskgateError::bad_request(format!(
            "Permission '{}' must be upper-case words joined by underscores",
            req.name
        )));
    }

    let description = req.description.unwrap_or_else(|| req.name.to_string());
    let permission = Permission::new(req.name, description);
    state.store.create_permission(&permission).await?;

    info!(permission_id = %permission.id, name = %permission.name, "Permission created");
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success("Permission created successfully", permission)),
    ))
}

/// GET /api/v1/permissions
pub async fn get_permissions(
    State(state): State<AppState>,
    Query(query): Query<PermissionQuery>,
) -> Result<impl IntoResponse> {
    let sort = SortSpec::parse(
        query.sort.as_deref(),
        query.order.as_deref(),
        SortField::PERMISSION,
    )?;
    let page = OffsetPagination::parse(query.page.as_deref(), query.per_page.as_deref())?;
    let filter = PermissionFilter {
        name: query.name,
        description: query.description,
    };

    let (permissions, length) = state.store.list_permissions(&filter, sort, Some(page)).await?;
    Ok(Json(
        ApiResponse::success("Permissions fetched successfully", permissions)
            .with_pagination(page.metadata(length)),
    ))
}

/// GET /api/v1/permissions/:id
pub async fn get_permission(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<PermissionId>,
) -> Result<impl IntoResponse> {
    let permission = find_permission(&state, id).await?;
    Ok(Json(ApiResponse::success("Permission fetched successfully", permission)))
}

/// PUT /api/v1/permissions/:id
///
/// Only the description can change.
pub async fn update_permission(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<PermissionId>,
    ApiJson(req): ApiJson<UpdatePermissionRequest>,
) -> Result<impl IntoResponse> {
    let existing = find_permission(&state, id).await?;
    if req.name.as_ref().is_some_and(|name| *name != existing.name) {
        return Err(TaskgateError::bad_request("Permission identifiers cannot be changed"));
    }

    let permission = state
        .store
        .update_permission_description(id, &req.description)
        .await?
        .ok_or_else(|| TaskgateError::not_found("permission", id))?;
    Ok(Json(ApiResponse::success("Permission updated successfully", permission)))
}

/// DELETE /api/v1/permissions/:id
pub async fn delete_permission(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<PermissionId>,
) -> Result<impl IntoResponse> {
    let permission = find_permission(&state, id).await?;
    state.store.delete_permission(id).await?;

    info!(permission_id = %id, name = %permission.name, "Permission deleted");
    Ok(Json(ApiResponse::success("Permission deleted successfully", permission)))
}
