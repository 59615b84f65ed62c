//! Decodes an HTTP POST body into one or more [`Call`] records, per the
//! single-call / multi-call header contract.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::GatewayError;
use crate::types::{ApiRequests, Call};

const DEFAULT_VERSION: &str = "v1";
pub const MULTI_CALL_HEADER: &str = "x-api-multi-call";
pub const API_HEADER: &str = "x-api";

/// `true` for the case-insensitive truthy values the original accepts:
/// `on`, `1`, `true`.
fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "on" | "1" | "true")
}

/// Parses a POST body into a batch, given the request's lower-cased header
/// map and the version segment taken from the URL path (empty if absent,
/// in which case [`DEFAULT_VERSION`] is used).
pub fn parse(
    headers: &HashMap<String, String>,
    path_version: &str,
    body: &[u8],
) -> Result<ApiRequests, GatewayError> {
    let major_version = if path_version.is_empty() {
        DEFAULT_VERSION.to_string()
    } else {
        path_version.to_string()
    };

    let is_multi_call = headers
        .get(MULTI_CALL_HEADER)
        .map(|v| is_truthy(v))
        .unwrap_or(false);

    let body: Value = serde_json::from_slice(body)
        .map_err(|err| GatewayError::BadRequest(format!("invalid JSON body: {err}")))?;
    let body = body
        .as_object()
        .ok_or_else(|| GatewayError::BadRequest("request body must be a JSON object".to_string()))?;

    if is_multi_call {
        parse_multi_call(body, &major_version)
    } else {
        parse_single_call(headers, body, &major_version)
    }
}

fn parse_single_call(
    headers: &HashMap<String, String>,
    body: &serde_json::Map<String, Value>,
    major_version: &str,
) -> Result<ApiRequests, GatewayError> {
    let api = headers
        .get(API_HEADER)
        .map(|v| v.trim().to_string())
        .unwrap_or_default();
    if api.is_empty() {
        return Err(GatewayError::BadRequest("API name is empty".to_string()));
    }

    Ok(ApiRequests {
        calls: vec![Call {
            api,
            version: major_version.to_string(),
            explicit: false,
            payload: Value::Object(body.clone()),
        }],
        is_multi_call: false,
        major_version: major_version.to_string(),
    })
}

fn parse_multi_call(
    body: &serde_json::Map<String, Value>,
    major_version: &str,
) -> Result<ApiRequests, GatewayError> {
    let mut calls = Vec::with_capacity(body.len());
    for (key, payload) in body {
        let (api, version, explicit) = split_api_key(key, major_version);
        if api.is_empty() {
            return Err(GatewayError::BadRequest("API name is empty".to_string()));
        }
        calls.push(Call {
            api,
            version,
            explicit,
            payload: payload.clone(),
        });
    }

    Ok(ApiRequests {
        calls,
        is_multi_call: true,
        major_version: major_version.to_string(),
    })
}

/// Splits a multi-call key on the first `:`. Two segments ⇒ `(api, version,
/// explicit=true)`; otherwise ⇒ `(api, major_version, explicit=false)`.
fn split_api_key(key: &str, major_version: &str) -> (String, String, bool) {
    match key.split_once(':') {
        Some((api, version)) => (api.trim().to_string(), version.trim().to_string(), true),
        None => (key.trim().to_string(), major_version.to_string(), false),
    }
}
