//! HTTP handshake that yields the stream endpoint
//!
//! The handshake is a single POST with no body. A successful response
//! carries the socket endpoint as `{"streamUrl": "<url>"}`; failures carry
//! `{"error": {"code", "msg"}}` or are synthesized locally from the HTTP
//! status.

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::config::Authorization;
use crate::error::{Error, Result};

/// Path of the handshake endpoint, relative to the base URL
pub const CONNECT_PATH: &str = "api/pubs/v1/stream/connect";

/// Capability interface for the handshake exchange
///
/// Modeled as a trait so tests can substitute a fake that never touches the
/// network.
#[async_trait]
pub trait Handshake: Send + Sync {
    /// Perform the handshake and return the stream endpoint URL
    async fn stream_endpoint(&self, authorization: Option<&Authorization>) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ConnectReply {
    #[serde(rename = "streamUrl")]
    stream_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorReply {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    msg: Option<String>,
}

/// Classify a handshake response body by HTTP status
///
/// A 2xx body must carry `streamUrl`; anything else falls back to
/// `unknown_error` rather than guessing a cause. A non-2xx body is mined for
/// a structured error and otherwise synthesized as `http_error_<status>`.
fn classify_response(status: u16, body: &str) -> Result<String> {
    if (200..300).contains(&status) {
        let reply: ConnectReply = serde_json::from_str(body).unwrap_or(ConnectReply {
            stream_url: None,
        });
        return reply.stream_url.ok_or(Error::Unknown);
    }

    if let Ok(ErrorReply {
        error: Some(ErrorBody {
            code: Some(code),
            msg,
        }),
    }) = serde_json::from_str::<ErrorReply>(body)
    {
        return Err(Error::Api {
            code,
            msg: msg.unwrap_or_default(),
        });
    }

    Err(Error::HttpStatus(status))
}

/// reqwest-backed handshake implementation
#[derive(Debug, Clone)]
pub struct HttpHandshake {
    http: reqwest::Client,
    connect_url: Url,
}

impl HttpHandshake {
    /// Create a handshake client for the given base URL
    pub fn new(base_url: &Url) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::RequestFailed(e.to_string()))?;
        let connect_url = base_url
            .join(CONNECT_PATH)
            .map_err(|e| Error::RequestFailed(e.to_string()))?;
        Ok(Self { http, connect_url })
    }

    /// The fully resolved handshake URL
    pub fn connect_url(&self) -> &Url {
        &self.connect_url
    }
}

#[async_trait]
impl Handshake for HttpHandshake {
    async fn stream_endpoint(&self, authorization: Option<&Authorization>) -> Result<String> {
        let mut request = self.http.post(self.connect_url.clone());
        if let Some(auth) = authorization {
            request = request.header(reqwest::header::AUTHORIZATION, auth.header_value());
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::RequestFailed(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::RequestFailed(e.to_string()))?;

        classify_response(status, &body)
    }
}
