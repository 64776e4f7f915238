use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use super::{auth::AuthService, utils::validate_auth_token};
use crate::db::request::PgRequestStore;
use crate::error::{AppError, Result};
use crate::lifecycle::{LifecycleService, ListFilter, NewRequest, RequestStatus, SortOrder};

type RequestsState = (Arc<AuthService>, Arc<LifecycleService<PgRequestStore>>);

/// Creation payload. Status and deposit are deliberately not accepted here;
/// the server derives them from category and reward.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequestBody {
    pub category: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub reward_amount: i64,
    #[serde(default)]
    pub location: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default)]
    pub images: Vec<String>,
}

async fn create_request(
    headers: HeaderMap,
    State((service, lifecycle)): State<RequestsState>,
    Json(body): Json<CreateRequestBody>,
) -> Result<impl IntoResponse> {
    let owner = validate_auth_token(&headers, &service)?;

    let category = body
        .category
        .parse()
        .map_err(AppError::Validation)?;

    let created = lifecycle
        .create(
            owner,
            NewRequest {
                category,
                title: body.title,
                description: body.description,
                reward_amount: body.reward_amount,
                location: body.location,
                latitude: body.latitude,
                longitude: body.longitude,
                images: body.images,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub category: Option<String>,
    pub status: Option<String>,
    pub keyword: Option<String>,
    pub location: Option<String>,
    pub min_reward: Option<String>,
    pub max_reward: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub sort_by: Option<String>,
}

fn parse_amount(value: Option<String>, name: &str) -> Result<Option<i64>> {
    value
        .map(|raw| {
            raw.parse::<i64>()
                .map_err(|_| AppError::Validation(format!("{name} must be an integer")))
        })
        .transpose()
}

/// Accepts either a full RFC 3339 timestamp or a bare date. A bare date
/// means start-of-day for the lower bound and end-of-day for the upper.
fn parse_date(value: Option<String>, name: &str, end_of_day: bool) -> Result<Option<DateTime<Utc>>> {
    let Some(raw) = value else {
        return Ok(None);
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    let date: NaiveDate = raw
        .parse()
        .map_err(|_| AppError::Validation(format!("{name} must be a date or RFC 3339 timestamp")))?;
    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59).unwrap_or_default()
    } else {
        date.and_hms_opt(0, 0, 0).unwrap_or_default()
    };
    Ok(Some(time.and_utc()))
}

pub fn parse_filter(params: ListParams) -> Result<ListFilter> {
    Ok(ListFilter {
        category: params
            .category
            .map(|raw| raw.parse().map_err(AppError::Validation))
            .transpose()?,
        // browsing defaults to the public listings
        status: match params.status {
            Some(raw) => Some(raw.parse().map_err(AppError::Validation)?),
            None => Some(RequestStatus::Open),
        },
        keyword: params.keyword.filter(|kw| !kw.trim().is_empty()),
        location: params.location.filter(|loc| !loc.trim().is_empty()),
        min_reward: parse_amount(params.min_reward, "minReward")?,
        max_reward: parse_amount(params.max_reward, "maxReward")?,
        date_from: parse_date(params.date_from, "dateFrom", false)?,
        date_to: parse_date(params.date_to, "dateTo", true)?,
        sort: match params.sort_by {
            Some(raw) => raw.parse().map_err(AppError::Validation)?,
            None => SortOrder::Newest,
        },
    })
}

async fn list_requests(
    State((_service, lifecycle)): State<RequestsState>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse> {
    let filter = parse_filter(params)?;
    let requests = lifecycle.list(filter).await?;
    Ok(Json(requests))
}

async fn get_request(
    State((_service, lifecycle)): State<RequestsState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let request = lifecycle.get(id).await?;
    Ok(Json(request))
}

#[derive(Debug, Deserialize)]
pub struct NearbyParams {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius: Option<f64>,
}

const DEFAULT_NEARBY_RADIUS_KM: f64 = 5.0;

async fn nearby_requests(
    State((_service, lifecycle)): State<RequestsState>,
    Query(params): Query<NearbyParams>,
) -> Result<impl IntoResponse> {
    let (Some(latitude), Some(longitude)) = (params.latitude, params.longitude) else {
        return Err(AppError::Validation(
            "latitude and longitude are required".into(),
        ));
    };
    let radius = params.radius.unwrap_or(DEFAULT_NEARBY_RADIUS_KM);
    let requests = lifecycle.nearby(latitude, longitude, radius).await?;
    Ok(Json(requests))
}

async fn accept_request(
    headers: HeaderMap,
    State((service, lifecycle)): State<RequestsState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let actor = validate_auth_token(&headers, &service)?;
    let request = lifecycle.accept(actor, id).await?;
    Ok(Json(request))
}

async fn complete_request(
    headers: HeaderMap,
    State((service, lifecycle)): State<RequestsState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let actor = validate_auth_token(&headers, &service)?;
    let request = lifecycle.complete(actor, id).await?;
    Ok(Json(request))
}

async fn cancel_request(
    headers: HeaderMap,
    State((service, lifecycle)): State<RequestsState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let actor = validate_auth_token(&headers, &service)?;
    let request = lifecycle.cancel(actor, id).await?;
    Ok(Json(request))
}

pub fn request_routes(
    service: Arc<AuthService>,
    lifecycle: Arc<LifecycleService<PgRequestStore>>,
) -> Router {
    Router::new()
        .route("/requests", post(create_request).get(list_requests))
        .route("/requests/nearby", get(nearby_requests))
        .route("/requests/:id", get(get_request))
        .route("/requests/:id/accept", post(accept_request))
        .route("/requests/:id/complete", post(complete_request))
        .route("/requests/:id/cancel", post(cancel_request))
        .with_state((service, lifecycle))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ListParams {
        ListParams {
            category: None,
            status: None,
            keyword: None,
            location: None,
            min_reward: None,
            max_reward: None,
            date_from: None,
            date_to: None,
            sort_by: None,
        }
    }

    #[test]
    fn status_defaults_to_open() {
        let filter = parse_filter(params()).unwrap();
        assert_eq!(filter.status, Some(RequestStatus::Open));
        assert_eq!(filter.sort, SortOrder::Newest);
    }

    #[test]
    fn unknown_sort_is_a_validation_error() {
        let mut p = params();
        p.sort_by = Some("cheapest".into());
        assert!(matches!(
            parse_filter(p),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn unknown_status_is_a_validation_error() {
        let mut p = params();
        p.status = Some("WAITING".into());
        assert!(matches!(parse_filter(p), Err(AppError::Validation(_))));
    }

    #[test]
    fn bare_dates_cover_the_whole_day() {
        let mut p = params();
        p.date_from = Some("2025-03-01".into());
        p.date_to = Some("2025-03-02".into());
        let filter = parse_filter(p).unwrap();
        assert_eq!(
            filter.date_from.unwrap().to_rfc3339(),
            "2025-03-01T00:00:00+00:00"
        );
        assert_eq!(
            filter.date_to.unwrap().to_rfc3339(),
            "2025-03-02T23:59:59+00:00"
        );
    }

    #[test]
    fn reward_bounds_must_be_integers() {
        let mut p = params();
        p.min_reward = Some("lots".into());
        assert!(matches!(parse_filter(p), Err(AppError::Validation(_))));
    }
}
