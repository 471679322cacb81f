//! Camera HTTP configuration client.
//!
//! Digest-authenticated GET/PUT/DELETE of the line-crossing rules served by
//! the camera's own configuration endpoint. TLS peer verification is
//! disabled to accommodate the camera's self-signed certificate; this
//! client must never be pointed at anything but the configured camera host.

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::CameraConfig;
use crate::error::{NvrError, Result};
use crate::storage::lines::{CrossLine, CrossLineMode};

const LINECROSSING_PATH: &str = "/opensdk/WiseAI/configuration/linecrossing";

/// Response from a camera call: status code plus the (possibly empty) body,
/// so the caller can decide how to react to a non-2xx status.
pub struct CameraResponse {
    pub status: StatusCode,
    pub body: Value,
}

pub struct CameraClient {
    http: Client,
    config: CameraConfig,
}

impl CameraClient {
    pub fn new(config: CameraConfig) -> Result<Self> {
        let http = Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| NvrError::Camera(format!("cannot build HTTP client: {e}")))?;
        Ok(CameraClient { http, config })
    }

    fn base_url(&self) -> String {
        format!("{}{}", self.config.http_authority(), LINECROSSING_PATH)
    }

    fn cookie(&self) -> String {
        format!("trackid={}", self.config.trackid)
    }

    fn origin_referer(&self) -> String {
        self.config.http_authority()
    }

    /// GET the full line-crossing configuration.
    pub async fn get_lines(&self) -> Result<CameraResponse> {
        self.digest_request(reqwest::Method::GET, &self.base_url(), None).await
    }

    /// PUT a single CrossLine. Coordinates are scaled ×4 relative to the
    /// locally stored coordinates, per the camera's own coordinate space.
    pub async fn put_lines(&self, line: &CrossLine) -> Result<CameraResponse> {
        let body = json!({
            "channel": 0,
            "index": line.index,
            "x1": line.x1 * 4,
            "y1": line.y1 * 4,
            "x2": line.x2 * 4,
            "y2": line.y2 * 4,
            "name": line.name,
            "mode": mode_str(line.mode),
            "enabled": true,
            "objectTypeFilter": [
                "Person",
                "Vehicle.Bicycle",
                "Vehicle.Car",
                "Vehicle.Motorcycle",
                "Vehicle.Bus",
                "Vehicle.Truck",
            ],
        });
        self.digest_request(reqwest::Method::PUT, &self.base_url(), Some(body)).await
    }

    /// DELETE the line at `index` on channel 0.
    pub async fn delete_line(&self, index: i64) -> Result<CameraResponse> {
        let url = format!("{}/line?channel=0&index={index}", self.base_url());
        self.digest_request(reqwest::Method::DELETE, &url, None).await
    }

    /// Perform one digest-authenticated request. The camera presents its
    /// own `WWW-Authenticate` challenge per request (no session reuse), so
    /// the handshake runs fresh every call: an initial unauthenticated
    /// probe, then the real request with a computed `Authorization` header.
    async fn digest_request(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<Value>,
    ) -> Result<CameraResponse> {
        let probe = self.build_request(method.clone(), url, None, &body).send().await;
        let probe = match probe {
            Ok(resp) => resp,
            Err(e) => return Err(NvrError::Camera(format!("camera unreachable: {e}"))),
        };

        if probe.status() != StatusCode::UNAUTHORIZED {
            return self.finish(probe).await;
        }

        let challenge = probe
            .headers()
            .get(reqwest::header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| NvrError::Camera("missing WWW-Authenticate header".into()))?
            .to_string();

        let mut prompt = digest_auth::parse(&challenge)
            .map_err(|e| NvrError::Camera(format!("malformed digest challenge: {e}")))?;

        let path = reqwest::Url::parse(url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| url.to_string());

        let context = digest_auth::AuthContext::new(
            &self.config.username,
            &self.config.password,
            path.as_str(),
        );
        let answer = prompt
            .respond(&context)
            .map_err(|e| NvrError::Camera(format!("digest response failed: {e}")))?
            .to_header_string();

        let resp = self
            .build_request(method, url, Some(answer), &body)
            .send()
            .await
            .map_err(|e| NvrError::Camera(format!("camera request failed: {e}")))?;
        self.finish(resp).await
    }

    fn build_request(
        &self,
        method: reqwest::Method,
        url: &str,
        authorization: Option<String>,
        body: &Option<Value>,
    ) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::COOKIE, self.cookie())
            .header(reqwest::header::ORIGIN, self.origin_referer())
            .header(reqwest::header::REFERER, self.origin_referer());
        if let Some(auth) = authorization {
            req = req.header(reqwest::header::AUTHORIZATION, auth);
        }
        if let Some(b) = body {
            req = req.json(b);
        }
        req
    }

    async fn finish(&self, resp: reqwest::Response) -> Result<CameraResponse> {
        let status = resp.status();
        let body = resp
            .json::<Value>()
            .await
            .unwrap_or_else(|_| Value::Object(Default::default()));
        if !status.is_success() {
            warn!(%status, "camera returned non-success status");
        } else {
            debug!(%status, "camera request succeeded");
        }
        Ok(CameraResponse { status, body })
    }
}

fn mode_str(mode: CrossLineMode) -> &'static str {
    match mode {
        CrossLineMode::Right => "Right",
        CrossLineMode::Left => "Left",
        CrossLineMode::BothDirections => "BothDirections",
    }
}
