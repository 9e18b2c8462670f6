//! Audit log handlers.

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use super::{parse_query_id, ApiPath, ApiResponse, AppState};
use crate::error::{Result, TaskgateError};
use crate::pagination::{OffsetPagination, SortField, SortSpec};
use crate::rbac::models::AuditLogId;
use crate::store::AuditLogFilter;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogQuery {
    pub method: Option<String>,
    pub path: Option<String>,
    pub status_code: Option<String>,
    pub user: Option<String>,
    pub role: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub page: Option<String>,
    pub per_page: Option<String>,
}

impl LogQuery {
    fn filter(&self) -> Result<AuditLogFilter> {
        let status_code = match self.status_code.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => None,
            Some(raw) => Some(raw.parse::<u16>().map_err(|_| {
                TaskgateError::bad_request(format!("statusCode must be a number, got '{}'", raw))
            })?),
        };

        Ok(AuditLogFilter {
            method: self.method.as_ref().map(|m| m.to_ascii_uppercase()),
            path: self.path.clone(),
            status_code,
            user_id: parse_query_id("user", self.user.as_deref())?,
            role_id: parse_query_id("role", self.role.as_deref())?,
        })
    }
}

/// GET /api/v1/logs
pub async fn get_logs(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Result<impl IntoResponse> {
    let filter = query.filter()?;
    let sort = SortSpec::parse(
        query.sort.as_deref(),
        query.order.as_deref(),
        SortField::AUDIT_LOG,
    )?;
    let page = OffsetPagination::parse(query.page.as_deref(), query.per_page.as_deref())?;

    let (entries, length) = state.store.list_audit_entries(&filter, sort, page).await?;
    Ok(Json(
        ApiResponse::success("Logs fetched successfully", entries)
            .with_pagination(page.metadata(length)),
    ))
}

/// GET /api/v1/logs/:id
pub async fn get_log(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<AuditLogId>,
) -> Result<impl IntoResponse> {
    let entry = state
        .store
        .find_audit_entry(id)
        .await?
        .ok_or_else(|| TaskgateError::not_found("log", id))?;
    Ok(Json(ApiResponse::success("Log fetched successfully", entry)))
}

/// DELETE /api/v1/logs/:id
pub async fn delete_log(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<AuditLogId>,
) -> Result<impl IntoResponse> {
    if !state.store.delete_audit_entry(id).await? {
        return Err(TaskgateError::not_found("log", id));
    }
    Ok(Json(ApiResponse::success("Log deleted successfully", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_filter_normalizes_method() {
        let query = LogQuery {
            method: Some("delete".to_string()),
            status_code: Some("403".to_string()),
            ..LogQuery::default()
        };
        let filter = query.filter().unwrap();
        assert_eq!(filter.method.as_deref(), Some("DELETE"));
        assert_eq!(filter.status_code, Some(403));
    }

    #[test]
    fn test_filter_rejects_bad_status() {
        let query = LogQuery {
            status_code: Some("forbidden".to_string()),
            ..LogQuery::default()
        };
        assert_eq!(query.filter().unwrap_err().code(), ErrorCode::BadRequest);
    }
}
