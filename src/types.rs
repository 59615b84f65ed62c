//! Core data model: the routing unit (`Endpoint`), registry events, and the
//! request/response records that flow through the dispatch engine.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A concrete `(service, method)` target resolvable by the RPC client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub service: String,
    pub method: String,
}

/// One node of a service, as advertised by the registry. The gateway itself
/// only cares about the endpoint metadata, but the node list's emptiness is
/// what distinguishes a "service gone" delete from an "endpoints changed"
/// delete (see [`crate::routing::RoutingTable::apply`]).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub address: String,
}

/// A single method advertised by a service, carrying the metadata that maps
/// it onto zero or more gateway-visible APIs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub name: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Metadata key listing the comma-separated API aliases an endpoint serves.
pub const API_METADATA_KEY: &str = "post_api";
/// Metadata key giving the version an endpoint's APIs are exposed under.
pub const API_VER_METADATA_KEY: &str = "post_api_ver";

/// A service record as reported by the registry watch stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub endpoints: Vec<ServiceEndpoint>,
}

/// What happened to a service record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
}

/// A single registry watch event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub action: Action,
    pub service: ServiceRecord,
}

/// One API call parsed out of an HTTP request body.
#[derive(Clone, Debug, Serialize)]
pub struct Call {
    pub api: String,
    pub version: String,
    /// `true` if the multi-call key carried an explicit `api:version`.
    pub explicit: bool,
    pub payload: serde_json::Value,
}

impl Call {
    /// The key this call's response is filed under in a multi-call envelope.
    pub fn response_key(&self) -> String {
        if self.explicit {
            format!("{}:{}", self.api, self.version)
        } else {
            self.api.clone()
        }
    }
}

/// The parsed body of one HTTP request: one or more [`Call`]s plus the mode
/// they should be dispatched and assembled in.
#[derive(Clone, Debug, Serialize)]
pub struct ApiRequests {
    pub calls: Vec<Call>,
    pub is_multi_call: bool,
    /// The version taken from the URL path, used as the default for calls
    /// that don't specify one explicitly.
    pub major_version: String,
}

/// The per-call response record. `api`/`version`/`explicit` are routing
/// metadata used to place the response in the envelope; they are never
/// serialized onto the wire.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Response {
    #[serde(skip)]
    pub api: String,
    #[serde(skip)]
    pub version: String,
    #[serde(skip)]
    pub explicit: bool,

    pub code: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(skip_serializing_if = "String::is_empty", rename = "err_id")]
    pub err_id: String,
    #[serde(skip_serializing_if = "String::is_empty", rename = "err_namespace")]
    pub err_namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl Response {
    pub fn success(result: serde_json::Value) -> Self {
        Response {
            result: Some(result),
            ..Default::default()
        }
    }
}
