//! Transport seam between compiled flows and the network collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::definition::{BodyFormat, HttpMethod, Protocol};
use crate::error::TransportError;
use crate::extract::ResponseEnvelope;

/// A fully resolved request handed to the transport.
///
/// All reference tokens have been substituted and the body already
/// serialized per the declared format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    pub url: String,
    pub method: HttpMethod,
    pub protocol: Protocol,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub query: HashMap<String, String>,

    #[serde(default)]
    pub cookies: HashMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    pub format: BodyFormat,
}

/// Performs a single call and maps the response into an envelope.
///
/// A started call runs to completion or failure; cancellation is the
/// transport's own concern, not modeled here.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ResponseEnvelope, TransportError>;
}
