//! HTTP transport: the request/response model, a reqwest client, and the resilient
//! execution path layered on top.

mod error;
mod http;
mod reqwest;
mod resilient;

pub use error::TransportError;
pub use http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
pub use reqwest::ReqwestTransport;
pub use resilient::{
    HttpResult, ResilientTransport, TransportConfig, CLIENT_VERSION_HEADER, REQUEST_ID_HEADER,
};
