//! Upstream forwarding - relays an admitted request to its backend service.

use std::time::Duration;

use actix_web::{HttpMessage, HttpRequest, HttpResponse, http::StatusCode, web::Bytes};
use tollgate_shared::headers;

use crate::config::RouteConfig;
use crate::observability::{REQUEST_ID_HEADER, RequestId};

/// Mount point of every configured route.
pub const API_PREFIX: &str = "/api";

/// Connection-scoped headers that must not be relayed.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("Cannot relay request: {0}")]
    InvalidRequest(String),

    #[error("Upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// HTTP client shared by every route.
#[derive(Clone)]
pub struct Upstream {
    client: reqwest::Client,
}

impl Upstream {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Relay `req` to the route's upstream and copy the answer back.
    pub async fn forward(
        &self,
        route: &RouteConfig,
        req: &HttpRequest,
        body: Bytes,
    ) -> Result<HttpResponse, UpstreamError> {
        let url = upstream_url(&route.upstream, req.path(), req.query_string());
        let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
            .map_err(|e| UpstreamError::InvalidRequest(e.to_string()))?;

        // The assigned id replaces whatever the client sent, so both ends log the same one.
        let request_id = req.extensions().get::<RequestId>().cloned();

        let mut builder = self.client.request(method, &url);
        for (name, value) in req.headers() {
            let name = name.as_str();
            if is_hop_by_hop(name)
                || skip_on_request(name)
                || (request_id.is_some() && name == REQUEST_ID_HEADER)
            {
                continue;
            }
            builder = builder.header(name, value.as_bytes());
        }
        builder = builder.header(headers::SERVICE, route.id.as_str());
        if let Some(id) = &request_id {
            builder = builder.header(REQUEST_ID_HEADER, id.as_str());
        }

        tracing::debug!(route = %route.id, %url, "Forwarding request");

        let response = builder.body(body).send().await?;
        let status = StatusCode::from_u16(response.status().as_u16())
            .map_err(|e| UpstreamError::InvalidRequest(e.to_string()))?;

        let mut out = HttpResponse::build(status);
        for (name, value) in response.headers() {
            if is_hop_by_hop(name.as_str()) || name.as_str() == "content-length" {
                continue;
            }
            out.append_header((name.as_str(), value.as_bytes().to_vec()));
        }

        let body = response.bytes().await?;
        Ok(out.body(body))
    }
}

/// `/api/orders/7?x=1` on `http://orders:8080` becomes
/// `http://orders:8080/orders/7?x=1`.
fn upstream_url(upstream: &str, path: &str, query: &str) -> String {
    let path = path.strip_prefix(API_PREFIX).unwrap_or(path);
    let mut url = format!("{}{}", upstream.trim_end_matches('/'), path);
    if !query.is_empty() {
        url.push('?');
        url.push_str(query);
    }
    url
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.contains(&name)
}

/// Recomputed by the client for the outgoing request.
fn skip_on_request(name: &str) -> bool {
    matches!(name, "host" | "content-length")
}
