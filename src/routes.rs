use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{ConnectInfo, Path, State as AxumState},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    attribution::Outcome,
    error::AppError,
    session::{Resolution, SESSION_COOKIE},
    state::State,
    store::ScanStore,
    utils::{client_address, cookie_value, request_base, user_agent},
};

pub async fn root_handler() -> &'static str {
    "QR Tracking App is running!"
}

/// One QR scan: decode the token, resolve the client identity, attribute.
/// Accepted and duplicate scans both send the visitor on to the destination;
/// only the first one inside the window is recorded.
pub async fn track_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path(token): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let payload = state.codec.decode(&token)?;

    let resolution = state.sessions.resolve(cookie_value(&headers, SESSION_COOKIE));
    let address = client_address(&headers, peer);
    let agent = user_agent(&headers);

    let outcome = state
        .attributor
        .attribute(
            &payload.ad_id,
            &payload.location_id,
            &resolution.session_id,
            &address,
            &agent,
            Utc::now(),
        )
        .await
        .map_err(|e| AppError::StoreUnavailable(e.to_string()))?;

    let response = match outcome {
        Outcome::Accepted(fact) => {
            info!(
                ad_id = %fact.ad_id,
                location_id = %fact.location_id,
                "scan accepted"
            );

            let destination = format!(
                "{}/{}-{}",
                state.config.redirect_base, payload.ad_id, payload.location_id
            );

            Redirect::to(&destination).into_response()
        }
        Outcome::Duplicate => {
            debug!(
                ad_id = %payload.ad_id,
                location_id = %payload.location_id,
                "duplicate scan ignored"
            );

            "You have already scanned this QR code.".into_response()
        }
    };

    with_session_cookie(response, resolution)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub code: String,
    pub ad_id: String,
    pub ad_name: Option<String>,
    pub location_id: String,
    pub location_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Reporting read-back, newest scans first.
pub async fn scans_handler(
    AxumState(state): AxumState<Arc<State>>,
) -> Result<Json<Vec<ScanReport>>, AppError> {
    let facts = state
        .attributor
        .store()
        .list_all()
        .await
        .map_err(|e| AppError::StoreUnavailable(e.to_string()))?;

    let reports = facts
        .into_iter()
        .map(|fact| ScanReport {
            code: format!("{}-{}", fact.ad_id, fact.location_id),
            ad_name: state.registry.ad_name(&fact.ad_id).map(String::from),
            location_name: state
                .registry
                .location_name(&fact.location_id)
                .map(String::from),
            ad_id: fact.ad_id,
            location_id: fact.location_id,
            timestamp: fact.observed_at,
        })
        .collect();

    Ok(Json(reports))
}

#[derive(Serialize)]
pub struct GeneratedToken {
    pub token: String,
    pub url: String,
}

/// Mints the signed token for an (ad, location) pair. The returned URL is
/// what goes into the QR code; rendering the image is the caller's job.
pub async fn generate_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path((ad_id, location_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<GeneratedToken>, AppError> {
    let token = state.codec.encode(&ad_id, &location_id)?;

    let base = request_base(&headers)
        .unwrap_or_else(|| format!("http://localhost:{}", state.config.port));

    Ok(Json(GeneratedToken {
        url: format!("{base}/track/{token}"),
        token,
    }))
}

fn with_session_cookie(
    mut response: Response,
    resolution: Resolution,
) -> Result<Response, AppError> {
    if let Some(cookie) = resolution.issued {
        let value = HeaderValue::from_str(&cookie.header_value())
            .map_err(|e| AppError::InternalError(Box::new(e)))?;

        response.headers_mut().append(header::SET_COOKIE, value);
    }

    Ok(response)
}
