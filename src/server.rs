//! The `warp` filter tree: `/ping`, `/favicon.ico`, and the main dispatch
//! endpoint, assembled the way the teacher builds its SSE filter —
//! `warp::get()`/`warp::post()` combined with `warp::path` combinators and
//! mapped onto a handler that always produces a `Response`.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use http::header::HeaderName;
use serde_json::Value;
use tracing::warn;
use warp::http::StatusCode;
use warp::path::FullPath;
use warp::{Filter, Rejection, Reply};

use crate::config::CorsConfig;
use crate::dispatch::{self, build_call_metadata};
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::parser;
use crate::types::{ApiRequests, Response as Envelope};

/// Builds the full filter tree for a gateway instance.
pub fn routes(
    gateway: Arc<Gateway>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let ping = warp::get()
        .and(warp::path("ping"))
        .and(warp::path::end())
        .map(|| Reply::into_response(warp::reply::with_status("pong", StatusCode::OK)));

    let favicon = warp::get()
        .and(warp::path("favicon.ico"))
        .map(|| Reply::into_response(warp::reply::with_status("", StatusCode::NOT_FOUND)));

    let body_limit = gateway.config.server.body_limit_bytes;
    let cors_config = gateway.config.cors.clone();
    let gateway_filter = warp::any().map(move || gateway.clone());

    let dispatch_route = warp::post()
        .and(warp::path::full())
        .and(warp::header::headers_cloned())
        .and(warp::addr::remote())
        .and(warp::body::content_length_limit(body_limit))
        .and(warp::body::bytes())
        .and(gateway_filter.clone())
        .and_then(handle_dispatch)
        .map(IntoResponse::into_response);

    let options_route = warp::options()
        .and(warp::path::full())
        .and(gateway_filter)
        .and_then(handle_options)
        .map(IntoResponse::into_response);

    let cors = build_cors(&cors_config);

    ping.or(favicon)
        .unify()
        .or(dispatch_route)
        .unify()
        .or(options_route)
        .unify()
        .recover(recover)
        .unify()
        .with(cors)
}

fn build_cors(config: &CorsConfig) -> warp::cors::Builder {
    let mut builder = warp::cors();
    if config.allow_origins.iter().any(|o| o == "*") {
        builder = builder.allow_any_origin();
    } else {
        for origin in &config.allow_origins {
            builder = builder.allow_origin(origin.as_str());
        }
    }
    if config.allow_methods.is_empty() {
        builder = builder.allow_methods(["GET", "POST", "OPTIONS"]);
    } else {
        builder = builder.allow_methods(config.allow_methods.iter().map(String::as_str));
    }
    if !config.allow_headers.is_empty() {
        builder = builder.allow_headers(config.allow_headers.iter().map(String::as_str));
    }
    if !config.expose_headers.is_empty() {
        builder = builder.expose_headers(config.expose_headers.iter().map(String::as_str));
    }
    if config.allow_credentials {
        builder = builder.allow_credentials(true);
    }
    if config.max_age_secs > 0 {
        builder = builder.max_age(std::time::Duration::from_secs(config.max_age_secs));
    }
    builder
}

/// Strips the configured `base_path` and returns the trailing version
/// segment, or `None` if the request path doesn't match `{base_path}/:version`.
fn match_version(full_path: &str, base_path: &str) -> Option<String> {
    let base_segments: Vec<&str> = base_path.split('/').filter(|s| !s.is_empty()).collect();
    let request_segments: Vec<&str> = full_path.split('/').filter(|s| !s.is_empty()).collect();
    if request_segments.len() != base_segments.len() + 1 {
        return None;
    }
    if request_segments[..base_segments.len()] != base_segments[..] {
        return None;
    }
    Some(request_segments[base_segments.len()].to_string())
}

async fn handle_options(
    full_path: FullPath,
    gateway: Arc<Gateway>,
) -> Result<impl Reply, Rejection> {
    match match_version(full_path.as_str(), &gateway.config.server.base_path) {
        Some(_) => Ok(warp::reply::with_status("", StatusCode::NO_CONTENT)),
        None => Err(warp::reject::not_found()),
    }
}

async fn handle_dispatch(
    full_path: FullPath,
    headers: http::HeaderMap,
    remote: Option<std::net::SocketAddr>,
    body: bytes::Bytes,
    gateway: Arc<Gateway>,
) -> Result<impl Reply, Rejection> {
    let version = match_version(full_path.as_str(), &gateway.config.server.base_path)
        .ok_or_else(warp::reject::not_found)?;

    let lower_headers = lower_case_headers(&headers);
    let client_ip = remote.map(|a| a.ip().to_string()).unwrap_or_default();

    let envelope = match parser::parse(&lower_headers, &version, &body) {
        Ok(batch) => run_dispatch(&gateway, batch, &lower_headers, &client_ip).await,
        Err(err) => {
            warn!(error = %err, "request parsing failed");
            err.into_response()
        }
    };

    let body = serde_json::to_vec(&envelope).unwrap_or_else(|_| b"{}".to_vec());
    let mut reply = Reply::into_response(warp::reply::with_status(body, StatusCode::OK));
    for (name, value) in &gateway.config.response_headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            http::HeaderValue::from_str(value),
        ) {
            reply.headers_mut().insert(name, value);
        }
    }
    reply.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    Ok(reply)
}

async fn run_dispatch(
    gateway: &Arc<Gateway>,
    batch: ApiRequests,
    headers: &HashMap<String, String>,
    client_ip: &str,
) -> Envelope {
    let deadline_ms = dispatch::resolve_deadline_ms(
        headers.get("x-api-call-timeout").map(|s| s.as_str()),
        gateway.config.dispatch.default_call_timeout_ms,
    );
    let cookies = headers
        .get("cookie")
        .map(|raw| {
            raw.split(';')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let metadata = build_call_metadata(
        headers,
        &gateway.config.dispatch.forwarded_headers,
        client_ip,
        &cookies,
        deadline_ms,
    );

    if gateway.config.events.enable_request_topic {
        let body = serde_json::to_vec(&batch).unwrap_or_default();
        crate::broker::publish_best_effort(
            gateway.broker.as_ref(),
            &gateway.config.events.request_topic,
            &metadata,
            &body,
        )
        .await;
    }

    let is_multi_call = batch.is_multi_call;
    let request_for_event = gateway
        .config
        .events
        .enable_response_topic
        .then(|| batch.clone());
    let dispatch_result = dispatch::dispatch(
        batch,
        gateway.table.clone(),
        gateway.rpc.clone(),
        metadata.clone(),
        deadline_ms,
    )
    .await;

    let envelope = match dispatch_result {
        Ok(responses) => {
            if let Some(requests) = request_for_event {
                let event_body = serde_json::to_vec(&serde_json::json!({
                    "requests": requests,
                    "responses": responses,
                }))
                .unwrap_or_default();
                crate::broker::publish_best_effort(
                    gateway.broker.as_ref(),
                    &gateway.config.events.response_topic,
                    &metadata,
                    &event_body,
                )
                .await;
            }
            build_envelope(is_multi_call, responses)
        }
        Err(err) => err.into_response(),
    };

    envelope
}

fn build_envelope(is_multi_call: bool, responses: HashMap<String, Envelope>) -> Envelope {
    if is_multi_call {
        let map: HashMap<String, Value> = responses
            .into_iter()
            .map(|(key, response)| (key, serde_json::to_value(response).unwrap_or(Value::Null)))
            .collect();
        Envelope::success(serde_json::to_value(map).unwrap_or(Value::Null))
    } else {
        responses.into_values().next().unwrap_or_else(|| {
            GatewayError::InternalServerError("no response produced".to_string()).into_response()
        })
    }
}

fn lower_case_headers(headers: &http::HeaderMap) -> HashMap<String, String> {
    let mut out = HashMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if let Ok(value) = value.to_str() {
            out.insert(name.as_str().to_ascii_lowercase(), value.to_string());
        }
    }
    out
}

/// Converts any rejection that reaches here (malformed body, oversized
/// payload, method/path mismatch) into the same in-body error envelope the
/// rest of the gateway returns, matching the original's `errorHandle`
/// wrapper which never lets a raw framework error reach the client.
pub async fn recover(rejection: Rejection) -> Result<impl Reply, Infallible> {
    warn!(?rejection, "request rejected before reaching the dispatch handler");
    let err = GatewayError::BadRequest("malformed request".to_string());
    let body = serde_json::to_vec(&err.into_response()).unwrap_or_else(|_| b"{}".to_vec());
    Ok(Reply::into_response(warp::reply::with_status(
        body,
        StatusCode::OK,
    )))
}

trait IntoResponse {
    fn into_response(self) -> warp::reply::Response;
}

impl<T: Reply> IntoResponse for T {
    fn into_response(self) -> warp::reply::Response {
        Reply::into_response(self)
    }
}
