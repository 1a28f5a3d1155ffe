//! Snapshot of the inbound request taken before the downstream handler runs.
//!
//! The handler consumes the request, so everything the record builder and the
//! pluggable hooks need is copied out up front.

use std::net::SocketAddr;

use axum::{
    extract::ConnectInfo,
    http::{header, HeaderMap, Method, Request, Uri, Version},
};

/// Header carrying a caller-assigned request identifier.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Immutable view of one inbound request.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    /// Peer address, when the server was started with connect info.
    pub peer_addr: Option<SocketAddr>,
}

impl RequestInfo {
    pub fn from_request<B>(req: &Request<B>) -> Self {
        Self {
            method: req.method().clone(),
            uri: req.uri().clone(),
            version: req.version(),
            headers: req.headers().clone(),
            peer_addr: req
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|c| c.0),
        }
    }

    /// Header value as a string, ignoring empty and non-UTF-8 values.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn url(&self) -> String {
        self.uri.to_string()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.header(REQUEST_ID_HEADER)
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header(header::USER_AGENT.as_str())
    }

    pub fn referer(&self) -> Option<&str> {
        self.header(header::REFERER.as_str())
    }

    /// Declared request body size.
    pub fn content_length(&self) -> Option<u64> {
        self.header(header::CONTENT_LENGTH.as_str())
            .and_then(|v| v.parse().ok())
    }

    /// Best guess at the originating client address.
    ///
    /// Lookup order: `X-Real-Ip`, the first hop of `X-Forwarded-For`, then the
    /// socket peer.
    pub fn client_ip(&self) -> Option<String> {
        if let Some(ip) = self.header("x-real-ip") {
            return Some(ip.to_owned());
        }
        let forwarded = self
            .header("x-forwarded-for")
            .and_then(|v| v.split(',').map(str::trim).find(|hop| !hop.is_empty()));
        if let Some(ip) = forwarded {
            return Some(ip.to_owned());
        }
        self.peer_addr.map(|addr| addr.ip().to_string())
    }

    /// `HTTP/1.1`-style protocol string.
    pub fn protocol(&self) -> &'static str {
        match self.version {
            Version::HTTP_09 => "HTTP/0.9",
            Version::HTTP_10 => "HTTP/1.0",
            Version::HTTP_2 => "HTTP/2",
            Version::HTTP_3 => "HTTP/3",
            _ => "HTTP/1.1",
        }
    }
}
