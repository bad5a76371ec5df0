use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::{
    Json, Router,
    extract::{ConnectInfo, Query, Request, State, rejection::QueryRejection},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use derive_more::Display;
use rootcause::{Report, bail, prelude::ResultExt, report};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::{
    provider::ManagedZone,
    reconcile::{ReconcileOutcome, reconcile},
    types::AppState,
};

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Every path and method ends up at the update handler, behind the shared key check.
pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .fallback(handle_update_request)
        .layer(middleware::from_fn_with_state(state.clone(), ensure_shared_key))
        .with_state(state)
}

#[derive(Debug, Display)]
pub(crate) enum UpdateError {
    #[display("shared key mismatch")]
    Unauthorized,
    #[display("bad request: {_0}")]
    BadRequest(Report),
    #[display("provider error: {_0}")]
    Provider(Report),
}

impl IntoResponse for UpdateError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Unauthorized => return StatusCode::FORBIDDEN.into_response(),
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Provider(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "status": "error" }))).into_response()
    }
}

#[derive(Deserialize, Debug)]
pub(crate) struct KeyQuery {
    key: Option<String>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct UpdateQuery {
    zone: Option<String>,
    domain: Option<String>,
}

async fn ensure_shared_key(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    query: Result<Query<KeyQuery>, QueryRejection>,
    req: Request,
    next: Next,
) -> Response {
    let provided = query.ok().and_then(|Query(it)| it.key);
    if !keys_match(provided.as_deref().unwrap_or_default(), &state.shared_key) {
        let client_ip = match req.headers().get(X_FORWARDED_FOR) {
            Some(v) => v.to_str().unwrap_or("<invalid utf8>").to_string(),
            None => addr.ip().to_string(),
        };
        debug!(client_ip = %client_ip, "rejected request with invalid key");
        return UpdateError::Unauthorized.into_response();
    }
    next.run(req).await
}

fn keys_match(provided: &str, expected: &str) -> bool {
    let (provided, expected) = (provided.as_bytes(), expected.as_bytes());
    provided.len() == expected.len()
        && provided
            .iter()
            .zip(expected)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

pub(crate) async fn handle_update_request(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    query: Result<Query<UpdateQuery>, QueryRejection>,
) -> Result<Json<Value>, UpdateError> {
    let Query(query) = query.map_err(|e| {
        warn!(error = %e, "malformed query string");
        UpdateError::BadRequest(report!("malformed query string: {}", e))
    })?;
    let zone = required_param(query.zone, "zone")?
        .parse::<ManagedZone>()
        .map_err(|e| {
            warn!(error = %e, "invalid zone parameter");
            UpdateError::BadRequest(e)
        })?;
    let domain = fully_qualified(&required_param(query.domain, "domain")?);

    let ip = caller_ip(&headers, peer)
        .and_then(address_record_value)
        .map_err(|e| {
            warn!(error = %e, peer = %peer, "could not determine caller address");
            UpdateError::BadRequest(e)
        })?;

    info!(zone = %zone, domain = %domain, ip = %ip, "handling update");

    let outcome = reconcile(
        state.dns_provider.as_ref(),
        &state.project_id,
        &zone,
        &domain,
        ip,
    )
    .await
    .map_err(|e| {
        error!(
            error = %e,
            operation = "reconcile",
            zone = %zone,
            domain = %domain,
            "failed to update DNS record"
        );
        UpdateError::Provider(e)
    })?;

    match outcome {
        ReconcileOutcome::Unchanged => {
            info!(domain = %domain, ip = %ip, "record already up to date")
        }
        ReconcileOutcome::Created => info!(domain = %domain, ip = %ip, "created record"),
        ReconcileOutcome::Updated { previous } => {
            info!(domain = %domain, ip = %ip, previous = ?previous, "updated record")
        }
    }

    Ok(Json(json!({ "status": "ok" })))
}

fn required_param(value: Option<String>, name: &str) -> Result<String, UpdateError> {
    match value.map(|it| it.trim().to_string()) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => {
            warn!(parameter = name, "missing query parameter");
            Err(UpdateError::BadRequest(report!("missing '{}' parameter", name)))
        }
    }
}

/// Record names at the provider always carry the trailing root dot.
fn fully_qualified(domain: &str) -> String {
    if domain.ends_with('.') {
        domain.to_string()
    } else {
        format!("{domain}.")
    }
}

/// The address the update is for: the first `X-Forwarded-For` entry when a
/// proxy added one, otherwise the peer of the connection.
pub(crate) fn caller_ip(headers: &HeaderMap, peer: SocketAddr) -> Result<IpAddr, Report> {
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .map(|it| it.to_str())
        .transpose()
        .context("X-Forwarded-For is not valid ASCII")?
        .filter(|it| !it.trim().is_empty());

    let Some(forwarded) = forwarded else {
        return Ok(peer.ip());
    };

    let candidate = forwarded.split(',').next().unwrap_or_default().trim();
    parse_host(candidate)
}

fn parse_host(candidate: &str) -> Result<IpAddr, Report> {
    if let Ok(ip) = candidate.parse::<IpAddr>() {
        return Ok(ip);
    }
    let addr = candidate
        .parse::<SocketAddr>()
        .context("Could not extract IP address")
        .attach(format!("candidate: '{candidate}'"))?;
    Ok(addr.ip())
}

/// A records hold IPv4 only. IPv4-mapped IPv6 addresses are unwrapped first.
fn address_record_value(ip: IpAddr) -> Result<Ipv4Addr, Report> {
    match ip.to_canonical() {
        IpAddr::V4(v4) => Ok(v4),
        IpAddr::V6(v6) => bail!("IPv6 address '{v6}' cannot be stored in an A record"),
    }
}
