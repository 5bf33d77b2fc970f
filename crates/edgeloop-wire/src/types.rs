//! Fetch-style request/response types used on the sandbox side of the bridge.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use http::{HeaderMap, Method, StatusCode};
use url::Url;

use crate::WireError;

/// An asynchronous byte stream; the body representation on both sides of the
/// bridge. `Sync` so translated bodies can feed `http_body` combinators,
/// which require it.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, WireError>> + Send + Sync>>;

/// Fetch-style request dispatched into the sandbox.
///
/// Headers are a single append-ordered multi-map; multi-valued host headers
/// are flattened into repeated entries when the request is translated.
pub struct SandboxRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<ByteStream>,
    /// The client may still be sending while a response begins.
    pub half_duplex: bool,
}

impl SandboxRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            half_duplex: false,
        }
    }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Drain the body into one buffer. Test and small-payload helper; the
    /// dispatch path streams instead.
    pub async fn collect_body(&mut self) -> Result<Bytes, WireError> {
        collect(self.body.take()).await
    }
}

impl std::fmt::Debug for SandboxRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body", &self.body.as_ref().map(|_| "<stream>"))
            .field("half_duplex", &self.half_duplex)
            .finish()
    }
}

/// Fetch-style response produced by the sandbox.
pub struct SandboxResponse {
    pub status: StatusCode,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Option<ByteStream>,
}

impl SandboxResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// A response with a single-chunk text body.
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        let mut resp = Self::new(status);
        let bytes = Bytes::from(body.into());
        resp.body = Some(Box::pin(stream::once(async move { Ok(bytes) })));
        resp
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub async fn collect_body(&mut self) -> Result<Bytes, WireError> {
        collect(self.body.take()).await
    }
}

impl std::fmt::Debug for SandboxResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxResponse")
            .field("status", &self.status)
            .field("status_text", &self.status_text)
            .field("headers", &self.headers)
            .field("body", &self.body.as_ref().map(|_| "<stream>"))
            .finish()
    }
}

async fn collect(body: Option<ByteStream>) -> Result<Bytes, WireError> {
    let Some(mut body) = body else {
        return Ok(Bytes::new());
    };
    let mut buf = Vec::new();
    while let Some(chunk) = body.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(Bytes::from(buf))
}

/// Host-side response sink: head exactly once, then body chunks, then finish.
///
/// `to_host_response` drives this with backpressure — each chunk is awaited
/// before the next is pulled from the sandbox stream, so a slow sink
/// throttles a fast sandbox.
#[async_trait]
pub trait HostSink: Send {
    async fn send_head(
        &mut self,
        status: StatusCode,
        reason: &str,
        headers: &HeaderMap,
    ) -> Result<(), WireError>;

    async fn send_data(&mut self, chunk: Bytes) -> Result<(), WireError>;

    /// Called after the final chunk; completion of the translation.
    async fn finish(&mut self) -> Result<(), WireError>;
}
