use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::domain::DomainEntry;
use crate::error::DehydratedApiError;
use crate::registry::{CreateDomainRequest, ListQuery, SortOrder, UpdateDomainRequest};
use crate::web::AppState;
use crate::DEFAULT_PER_PAGE;

pub const STATUS_OK: &str = "ok";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorResult {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DomainResponse {
    pub data: DomainEntry,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaginatedDomainsResponse {
    pub data: Vec<DomainEntry>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Pagination {
    pub total: usize,
    pub total_pages: u32,
    pub current_page: u32,
    pub per_page: u32,
    pub has_next: bool,
    pub has_prev: bool,
    pub next_url: Option<String>,
    pub prev_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub sort: Option<SortOrder>,
    pub search: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AliasParam {
    pub alias: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteDomainRequest {
    #[serde(default)]
    pub alias: Option<String>,
}

type ApiError = (StatusCode, Json<ErrorResult>);

/// The single place errors become HTTP responses.
fn error_response(err: DehydratedApiError) -> ApiError {
    let status = match &err {
        DehydratedApiError::InvalidDomainName(_)
        | DehydratedApiError::InvalidAlias(_)
        | DehydratedApiError::InvalidQuery(_)
        | DehydratedApiError::DuplicateDomain { .. } => StatusCode::BAD_REQUEST,
        DehydratedApiError::DomainNotFound { .. } => StatusCode::NOT_FOUND,
        DehydratedApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        _ => {
            error!("Request failed: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResult {
                    message: "Internal server error".to_string(),
                }),
            );
        }
    };
    (
        status,
        Json(ErrorResult {
            message: err.to_string(),
        }),
    )
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: STATUS_OK.to_string(),
    })
}

pub async fn list_domains(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<PaginatedDomainsResponse>, ApiError> {
    let query = ListQuery {
        page: params.page.unwrap_or(1),
        per_page: params.per_page.unwrap_or(DEFAULT_PER_PAGE),
        sort: params.sort,
        search: params.search,
    };
    let result = state.registry.list(&query).await.map_err(error_response)?;

    let total_pages = (result.total as u64).div_ceil(query.per_page as u64) as u32;
    let has_next = query.page < total_pages;
    let has_prev = query.page > 1;
    let pagination = Pagination {
        total: result.total,
        total_pages,
        current_page: query.page,
        per_page: query.per_page,
        has_next,
        has_prev,
        next_url: has_next.then(|| page_url(query.page + 1, &query)),
        prev_url: has_prev.then(|| page_url(query.page - 1, &query)),
    };
    Ok(Json(PaginatedDomainsResponse {
        data: result.entries,
        pagination,
    }))
}

fn page_url(page: u32, query: &ListQuery) -> String {
    let mut url = format!("/api/v1/domains?page={page}&per_page={}", query.per_page);
    match query.sort {
        Some(SortOrder::Asc) => url.push_str("&sort=asc"),
        Some(SortOrder::Desc) => url.push_str("&sort=desc"),
        None => {}
    }
    if let Some(search) = &query.search {
        let encoded: String = url::form_urlencoded::byte_serialize(search.as_bytes()).collect();
        url.push_str("&search=");
        url.push_str(&encoded);
    }
    url
}

pub async fn create_domain(
    State(state): State<AppState>,
    Json(payload): Json<CreateDomainRequest>,
) -> Result<(StatusCode, Json<DomainResponse>), ApiError> {
    let created = state
        .registry
        .create(payload)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(DomainResponse { data: created })))
}

pub async fn get_domain(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    Query(params): Query<AliasParam>,
) -> Result<Json<DomainResponse>, ApiError> {
    let entry = state
        .registry
        .get(&domain, params.alias.as_deref())
        .await
        .map_err(error_response)?;
    Ok(Json(DomainResponse { data: entry }))
}

pub async fn update_domain(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    Json(payload): Json<UpdateDomainRequest>,
) -> Result<Json<DomainResponse>, ApiError> {
    let updated = state
        .registry
        .update(&domain, payload)
        .await
        .map_err(error_response)?;
    Ok(Json(DomainResponse { data: updated }))
}

pub async fn delete_domain(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    payload: Option<Json<DeleteDomainRequest>>,
) -> Result<StatusCode, ApiError> {
    let alias = payload.and_then(|Json(body)| body.alias);
    state
        .registry
        .delete(&domain, alias.as_deref())
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_config(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    serde_json::to_value(state.config.as_ref())
        .map(Json)
        .map_err(|err| error_response(err.into()))
}

pub async fn handler_404() -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResult {
            message: "No such endpoint".to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_url_carries_query_params() {
        let query = ListQuery {
            page: 2,
            per_page: 50,
            sort: Some(SortOrder::Desc),
            search: Some("exa mple".to_string()),
        };
        assert_eq!(
            page_url(3, &query),
            "/api/v1/domains?page=3&per_page=50&sort=desc&search=exa+mple"
        );
    }

    #[test]
    fn test_page_url_minimal() {
        let query = ListQuery {
            page: 1,
            per_page: 100,
            sort: None,
            search: None,
        };
        assert_eq!(page_url(2, &query), "/api/v1/domains?page=2&per_page=100");
    }

    #[test]
    fn test_error_response_statuses() {
        let cases = [
            (
                DehydratedApiError::InvalidDomainName("x".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                DehydratedApiError::DuplicateDomain {
                    domain: "a.example".to_string(),
                    alias: None,
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                DehydratedApiError::DomainNotFound {
                    domain: "a.example".to_string(),
                    alias: None,
                },
                StatusCode::NOT_FOUND,
            ),
            (
                DehydratedApiError::Unauthorized("no".to_string()),
                StatusCode::UNAUTHORIZED,
            ),
            (
                DehydratedApiError::Generic("boom".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            let (status, _body) = error_response(err);
            assert_eq!(status, expected);
        }
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let (_, Json(body)) = error_response(DehydratedApiError::Generic("secret".to_string()));
        assert_eq!(body.message, "Internal server error");
    }
}
