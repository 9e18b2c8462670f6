//! User handlers.

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{parse_query_id, ApiJson, ApiPath, ApiResponse, AppState};
use crate::error::{Result, TaskgateError};
use crate::middleware::CurrentPrincipal;
use crate::pagination::{SortField, SortSpec};
use crate::rbac::models::{PermissionName, RoleId, User, UserId};
use crate::store::UserFilter;

#[derive(Debug, Default, Deserialize)]
pub struct UserQuery {
    pub role: Option<String>,
    pub name: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EditMeRequest {
    pub name: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRoleRequest {
    pub role: RoleId,
}

/// A user with the names of every permission their role holds.
#[derive(Debug, Serialize)]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: User,
    pub role: Option<String>,
    pub permissions: Vec<PermissionName>,
}

fn non_empty(field: &str, value: String) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(TaskgateError::bad_request(format!("{} cannot be empty", field)));
    }
    Ok(trimmed.to_string())
}

async fn find_user(state: &AppState, id: UserId) -> Result<User> {
    state
        .store
        .find_user(id)
        .await?
        .ok_or_else(|| TaskgateError::not_found("user", id))
}

/// GET /api/v1/users
pub async fn get_users(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<impl IntoResponse> {
    let sort = SortSpec::parse(query.sort.as_deref(), query.order.as_deref(), SortField::USER)?;
    let filter = UserFilter {
        role_id: parse_query_id("role", query.role.as_deref())?,
        name: query.name,
        username: query.username,
        email: query.email,
    };

    let users = state.store.list_users(&filter, sort).await?;
    Ok(Json(ApiResponse::success("Users fetched successfully", users)))
}

/// GET /api/v1/users/getMe
pub async fn get_me(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
) -> Result<impl IntoResponse> {
    let user = find_user(&state, principal.user_id).await?;
    let role = state.store.find_role(user.role_id).await?.map(|r| r.name);
    let permissions = state
        .graph
        .list_permissions(user.role_id)
        .await?
        .into_iter()
        .collect();

    Ok(Json(ApiResponse::success(
        "User fetched successfully",
        UserProfile {
            user,
            role,
            permissions,
        },
    )))
}

/// PUT /api/v1/users/editMe
pub async fn edit_me(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    ApiJson(req): ApiJson<EditMeRequest>,
) -> Result<impl IntoResponse> {
    let mut user = find_user(&state, principal.user_id).await?;

    if let Some(name) = req.name {
        user.name = non_empty("name", name)?;
    }
    if let Some(username) = req.username {
        user.username = non_empty("username", username)?;
    }
    if let Some(email) = req.email {
        let email = non_empty("email", email)?;
        if !email.contains('@') {
            return Err(TaskgateError::bad_request("Please add a valid email"));
        }
        user.email = email;
    }

    let user = state
        .store
        .update_user(&user)
        .await?
        .ok_or_else(|| TaskgateError::not_found("user", principal.user_id))?;
    Ok(Json(ApiResponse::success("User updated successfully", user)))
}

/// PUT /api/v1/users/role/:id
pub async fn update_user_role(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<UserId>,
    ApiJson(req): ApiJson<UpdateUserRoleRequest>,
) -> Result<impl IntoResponse> {
    let role = state
        .store
        .find_role(req.role)
        .await?
        .ok_or_else(|| TaskgateError::not_found("role", req.role))?;

    let mut user = find_user(&state, id).await?;
    user.role_id = role.id;
    let user = state
        .store
        .update_user(&user)
        .await?
        .ok_or_else(|| TaskgateError::not_found("user", id))?;

    info!(user_id = %id, role = %role.name, "User role changed");
    Ok(Json(ApiResponse::success("User role updated successfully", user)))
}

/// GET /api/v1/users/:id
pub async fn get_user(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<UserId>,
) -> Result<impl IntoResponse> {
    let user = find_user(&state, id).await?;
    Ok(Json(ApiResponse::success("User fetched successfully", user)))
}

/// DELETE /api/v1/users/:id
pub async fn delete_user(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<UserId>,
) -> Result<impl IntoResponse> {
    let user = find_user(&state, id).await?;
    state.store.delete_user(id).await?;

    info!(user_id = %id, username = %user.username, "User deleted");
    Ok(Json(ApiResponse::success("User deleted successfully", user)))
}
