use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::HeaderMap;
use leptos::prelude::ServerFnError;
use leptos::server_fn::error::NoCustomError;

use crate::error::VoteError;

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// Picks the address used to tell voters apart: the client end of `X-Forwarded-For`, then
/// `X-Real-IP`, then the TCP peer.
pub fn caller_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let forwarded = headers
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').map(str::trim).find(|ip| !ip.is_empty()));
    let real_ip = headers
        .get(REAL_IP)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    forwarded
        .or(real_ip)
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

/// Resolves the caller address of the request currently being served.
pub async fn current_caller_address() -> Result<String, ServerFnError<NoCustomError>> {
    use leptos_axum::extract;

    let headers: HeaderMap = extract()
        .await
        .map_err(|e| ServerFnError::<NoCustomError>::ServerError(e.to_string()))?;
    // Only present when the server was started with connect info.
    let peer = extract::<ConnectInfo<SocketAddr>>()
        .await
        .ok()
        .map(|ConnectInfo(addr)| addr);

    caller_address(&headers, peer).ok_or_else(|| {
        ServerFnError::<NoCustomError>::ServerError(VoteError::AddressUnavailable.to_string())
    })
}
