//! HTTP adapter for the upstream Appwrite REST API.
//!
//! [`request`] turns `(action, params)` into a concrete request description
//! as a pure function; [`client`] executes it with timeout, conditional
//! retry, and response normalization behind a transport trait so the retry
//! loop is testable without a network.

pub mod client;
pub mod request;

pub use client::{
    HttpResponse, HttpSettings, PreparedRequest, ReqwestTransport, TransportError,
    UpstreamClient, UpstreamTransport, RESPONSE_FORMAT,
};
pub use request::{build_request, HttpMethod, MultipartField, RequestBody, UpstreamRequest};
