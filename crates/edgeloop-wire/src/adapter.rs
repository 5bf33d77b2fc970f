//! Host ⇄ sandbox translation.

use bytes::Bytes;
use futures::StreamExt;
use http::header::{HOST, ORIGIN};
use http::{Method, Request, Response};
use http_body::{Body, Frame};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, StreamBody};
use url::Url;

use crate::types::{ByteStream, HostSink, SandboxRequest, SandboxResponse};
use crate::WireError;

/// Convert a host body into the sandbox's byte-stream representation.
///
/// Frames are forwarded as they arrive; nothing is buffered. Trailer frames
/// are dropped — the fetch-style representation has no equivalent.
pub fn byte_stream<B>(body: B) -> ByteStream
where
    B: Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: std::fmt::Display + Send + Sync,
{
    Box::pin(
        http_body_util::BodyStream::new(body).filter_map(|frame| async move {
            match frame {
                Ok(frame) => frame.into_data().ok().map(Ok),
                Err(e) => Some(Err(WireError::Body(e.to_string()))),
            }
        }),
    )
}

/// Translate a host request into sandbox form.
///
/// The request URL is built from the host request's path plus its `Origin`
/// header when present and not `"null"`, else an origin synthesized from the
/// `Host` header. All headers are copied; multi-valued host headers become
/// repeated appends on the sandbox header map. For methods other than
/// GET/HEAD the host byte stream is attached directly as the body and the
/// request is marked half-duplex.
pub fn to_sandbox_request<B>(req: Request<B>) -> Result<SandboxRequest, WireError>
where
    B: Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: std::fmt::Display + Send + Sync,
{
    let (parts, body) = req.into_parts();

    let origin = match parts.headers.get(ORIGIN).and_then(|v| v.to_str().ok()) {
        Some(origin) if origin != "null" => origin.to_string(),
        _ => {
            let host = parts
                .headers
                .get(HOST)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    WireError::InvalidRequest("no origin or host header".to_string())
                })?;
            format!("http://{host}")
        }
    };

    let base = Url::parse(&origin)?;
    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or("/", http::uri::PathAndQuery::as_str);
    let url = base.join(path_and_query)?;

    let mut out = SandboxRequest::new(parts.method.clone(), url);
    out.headers = parts.headers;

    if parts.method != Method::GET && parts.method != Method::HEAD {
        out.body = Some(byte_stream(body));
        out.half_duplex = true;
    }

    Ok(out)
}

/// Copy a sandbox response onto a host sink.
///
/// Status, reason, and headers are written before any body byte. The future
/// resolves only after the sink has acknowledged the final chunk; a response
/// without a body closes the sink immediately.
pub async fn to_host_response(
    response: SandboxResponse,
    sink: &mut dyn HostSink,
) -> Result<(), WireError> {
    sink.send_head(response.status, &response.status_text, &response.headers)
        .await?;

    if let Some(mut body) = response.body {
        while let Some(chunk) = body.next().await {
            sink.send_data(chunk?).await?;
        }
    }
    sink.finish().await
}

/// Convert a sandbox response into an `http::Response` with a streaming body,
/// for serving directly from hyper. The reason phrase is dropped — the host
/// HTTP stack does not carry one.
pub fn into_http_response(
    response: SandboxResponse,
) -> Result<Response<BoxBody<Bytes, WireError>>, WireError> {
    let mut builder = Response::builder().status(response.status);
    if let Some(headers) = builder.headers_mut() {
        *headers = response.headers;
    }

    let body = match response.body {
        Some(stream) => BoxBody::new(StreamBody::new(stream.map(|r| r.map(Frame::data)))),
        None => BoxBody::new(Empty::<Bytes>::new().map_err(|never| match never {})),
    };

    Ok(builder.body(body)?)
}
