use std::net::SocketAddr;

use axum::http::{header, HeaderMap};

/// Pulls a single cookie value out of the Cookie header.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(header::COOKIE)?
        .to_str()
        .ok()?
        .split(';')
        .find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then_some(value)
        })
}

/// Client address as attribution sees it. Behind the reverse proxy the
/// socket peer is the proxy itself, so the first X-Forwarded-For hop wins
/// when present.
pub fn client_address(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|hop| hop.trim().to_string())
        .filter(|hop| !hop.is_empty())
        .unwrap_or_else(|| peer.ip().to_string())
}

pub fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Scheme + host for URLs handed back to the caller, rebuilt from the
/// request the way the original deployment did behind Heroku's proxy.
pub fn request_base(headers: &HeaderMap) -> Option<String> {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("http");
    let host = headers.get(header::HOST)?.to_str().ok()?;

    Some(format!("{scheme}://{host}"))
}
