//! HTTP transport backed by reqwest.

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use reqwest::Method;
use std::collections::HashMap;
use std::time::Duration;

use apiflow_core::definition::{BodyFormat, HttpMethod, Protocol};
use apiflow_core::extract::{BodyKind, ResponseEnvelope};
use apiflow_core::runtime::{ApiRequest, Transport};
use apiflow_core::TransportError;

/// HTTP(S) transport for compiled flows.
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    /// Create a transport with default client settings.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self { client }
    }

    /// Create a transport with a custom client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn send(&self, request: &ApiRequest) -> Result<ResponseEnvelope, TransportError> {
        if request.protocol != Protocol::Http {
            return Err(TransportError::UnsupportedProtocol(
                format!("{:?}", request.protocol).to_lowercase(),
            ));
        }

        let mut builder = self.client.request(method_of(request.method), &request.url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        if !request.cookies.is_empty() {
            builder = builder.header(COOKIE, cookie_header(&request.cookies));
        }

        if let Some(ref body) = request.body {
            if !has_content_type(&request.headers) {
                builder = builder.header(CONTENT_TYPE, content_type_of(request.format));
            }
            builder = builder.body(body.clone());
        }

        tracing::debug!(url = %request.url, method = %request.method, "sending request");

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url = %request.url, status = status.as_u16(), "non-success response");
        }

        let cookies = response_cookies(&response);
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_str().unwrap_or("").to_string()))
            .collect();

        let kind = kind_of(headers.get("content-type").map(String::as_str).unwrap_or(""));
        let body = response.text().await.unwrap_or_default();

        Ok(ResponseEnvelope::new(kind, body)
            .with_headers(headers)
            .with_cookies(cookies))
    }
}

fn method_of(method: HttpMethod) -> Method {
    match method {
        HttpMethod::GET => Method::GET,
        HttpMethod::POST => Method::POST,
        HttpMethod::PUT => Method::PUT,
        HttpMethod::PATCH => Method::PATCH,
        HttpMethod::DELETE => Method::DELETE,
        HttpMethod::HEAD => Method::HEAD,
        HttpMethod::OPTIONS => Method::OPTIONS,
    }
}

fn content_type_of(format: BodyFormat) -> &'static str {
    match format {
        BodyFormat::Json => "application/json",
        BodyFormat::Xml => "application/xml",
        BodyFormat::Text => "text/plain",
    }
}

fn has_content_type(headers: &HashMap<String, String>) -> bool {
    headers.keys().any(|key| key.eq_ignore_ascii_case("content-type"))
}

/// Declared envelope kind from the response content type; anything
/// unrecognized stays `auto` for the extractor to sniff.
fn kind_of(content_type: &str) -> BodyKind {
    let content_type = content_type.to_ascii_lowercase();
    if content_type.contains("json") {
        BodyKind::Json
    } else if content_type.contains("xml") {
        BodyKind::Xml
    } else {
        BodyKind::Auto
    }
}

fn cookie_header(cookies: &HashMap<String, String>) -> String {
    cookies
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ")
}

fn response_cookies(response: &reqwest::Response) -> HashMap<String, String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| {
            // Only the leading name=value pair; attributes are dropped.
            let pair = value.split(';').next()?;
            let (name, value) = pair.split_once('=')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_mapping() {
        assert_eq!(method_of(HttpMethod::GET), Method::GET);
        assert_eq!(method_of(HttpMethod::POST), Method::POST);
        assert_eq!(method_of(HttpMethod::DELETE), Method::DELETE);
    }

    #[test]
    fn test_kind_from_content_type() {
        assert_eq!(kind_of("application/json; charset=utf-8"), BodyKind::Json);
        assert_eq!(kind_of("text/xml"), BodyKind::Xml);
        assert_eq!(kind_of("text/plain"), BodyKind::Auto);
        assert_eq!(kind_of(""), BodyKind::Auto);
    }

    #[test]
    fn test_cookie_header_shape() {
        let cookies = HashMap::from([("session".to_string(), "s-1".to_string())]);
        assert_eq!(cookie_header(&cookies), "session=s-1");
    }

    #[test]
    fn test_default_content_type_per_format() {
        assert_eq!(content_type_of(BodyFormat::Json), "application/json");
        assert_eq!(content_type_of(BodyFormat::Xml), "application/xml");
        assert_eq!(content_type_of(BodyFormat::Text), "text/plain");
    }

    #[tokio::test]
    async fn test_websocket_protocol_rejected() {
        let transport = HttpClient::new();
        let request = ApiRequest {
            url: "ws://svc/feed".to_string(),
            method: HttpMethod::GET,
            protocol: Protocol::Ws,
            headers: HashMap::new(),
            query: HashMap::new(),
            cookies: HashMap::new(),
            body: None,
            format: BodyFormat::Json,
        };

        let err = transport.send(&request).await.unwrap_err();
        assert!(matches!(err, TransportError::UnsupportedProtocol(p) if p == "ws"));
    }
}
