use bytes::Bytes;
use http_body_util::Full;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::{Client as HyperClient, connect::HttpConnector};

use crate::prelude::*;


/// Body type of all requests we send. Requests are tiny, so they are always
/// fully buffered.
pub type RequestBody = Full<Bytes>;

/// HTTP client shared by all virtual workers. It is cheap to clone and pools
/// connections internally.
pub type HttpClient<B = RequestBody> = HyperClient<HttpsConnector<HttpConnector>, B>;

pub fn http_client<B>(max_idle_per_host: usize) -> HttpClient<B>
where
    B: Send + hyper::body::Body,
    B::Data: Send,
{
    // Minimal containers often have no system certificates. Targets are
    // usually plain HTTP anyway, so we fall back to the bundled roots.
    let builder = match HttpsConnectorBuilder::new().with_native_roots() {
        Ok(builder) => builder,
        Err(e) => {
            debug!("failed to load native certificate roots ({e}), using bundled roots");
            HttpsConnectorBuilder::new().with_webpki_roots()
        }
    };
    let https = builder
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .build();
    HyperClient::builder(hyper_util::rt::TokioExecutor::new())
        .pool_max_idle_per_host(max_idle_per_host)
        .build(https)
}
