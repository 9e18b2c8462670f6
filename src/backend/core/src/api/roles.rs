//! Role handlers.

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
use crate::pagination::{SortField, SortSpec};
use crate::rbac::models::{PermissionName, Role, RoleId};
use crate::store::RoleFilter;

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permissions: Vec<PermissionName>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateRoleRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Vec<PermissionName>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RoleQuery {
    pub name: Option<String>,
    pub description: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

fn required_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(TaskgateError::bad_request("Please add a role name"));
    }
    Ok(name.to_string())
}

async fn find_role(state: &AppState, id: RoleId) -> Result<Role> {
    state
        .store
        .find_role(id)
        .await?
        .ok_or_else(|| TaskgateError::not_found("role", id))
}

/// POST /api/v1/roles
pub async fn create_role(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateRoleRequest>,
) -> Result<impl IntoResponse> {
    let role = Role::new(required_name(&req.name)?, req.description);

    state.graph.resolve_names(&req.permissions).await?;
    state.store.create_role(&role).await?;
    state.graph.grant_all(role.id, &req.permissions).await?;

    info!(role_id = %role.id, name = %role.name, "Role created");
    let role = state.graph.with_permissions(role).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success("Role created successfully", role)),
    ))
}

/// GET /api/v1/roles
pub async fn get_roles(
    State(state): State<AppState>,
    Query(query): Query<RoleQuery>,
) -> Result<impl IntoResponse> {
    let sort = SortSpec::parse(query.sort.as_deref(), query.order.as_deref(), SortField::ROLE)?;
    let filter = RoleFilter {
        name: query.name,
        description: query.description,
    };

    let roles = state.graph.list_roles(&filter, sort).await?;
    Ok(Json(ApiResponse::success("Roles fetched successfully", roles)))
}

/// GET /api/v1/roles/:id
pub async fn get_role(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<RoleId>,
) -> Result<impl IntoResponse> {
    let role = find_role(&state, id).await?;
    let role = state.graph.with_permissions(role).await?;
    Ok(Json(ApiResponse::success("Role fetched successfully", role)))
}

/// PUT /api/v1/roles/:id
///
/// Grants are additive: listed permissions are added, nothing is revoked.
pub async fn update_role(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<RoleId>,
    ApiJson(req): ApiJson<UpdateRoleRequest>,
) -> Result<impl IntoResponse> {
    let mut role = find_role(&state, id).await?;
    state.graph.resolve_names(&req.permissions).await?;

    if let Some(name) = req.name {
        let name = required_name(&name)?;
        if role.is_superuser && name != role.name {
            return Err(TaskgateError::conflict("The superuser role cannot be renamed"));
        }
        role.name = name;
    }
    if let Some(description) = req.description {
        role.description = description;
    }

    let role = state
        .store
        .update_role(&role)
        .await?
        .ok_or_else(|| TaskgateError::not_found("role", id))?;
    let granted = state.graph.grant_all(role.id, &req.permissions).await?;

    info!(role_id = %role.id, granted, "Role updated");
    let role = state.graph.with_permissions(role).await?;
    Ok(Json(ApiResponse::success("Role updated successfully", role)))
}

/// DELETE /api/v1/roles/:id
pub async fn delete_role(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<RoleId>,
) -> Result<impl IntoResponse> {
    let role = find_role(&state, id).await?;
    if role.is_superuser {
        return Err(TaskgateError::conflict("The superuser role cannot be deleted"));
    }

    state.graph.delete_role(id).await?;
    info!(role_id = %id, name = %role.name, "Role deleted");
    Ok(Json(ApiResponse::success("Role deleted successfully", role)))
}
