//! Helpers shared by tests of several modules.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::{
    Method, Request, Response, StatusCode,
    body::Incoming,
    header,
    server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;


/// A request as seen by the stub server.
#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) cookie: Option<String>,
    pub(crate) body: Bytes,
}

/// Local HTTP server standing in for the API under test.
pub(crate) struct Stub {
    pub(crate) addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl Stub {
    /// Starts a server that answers every request with `status` after
    /// `delay` and sets a `user_token` cookie like the real API does.
    pub(crate) async fn start(status: StatusCode, delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = Arc::clone(&recorded);
                let service = service_fn(move |req: Request<Incoming>| {
                    let recorded = Arc::clone(&recorded);
                    async move {
                        let (parts, body) = req.into_parts();
                        let body = body.collect().await?.to_bytes();
                        recorded.lock().unwrap().push(Recorded {
                            method: parts.method,
                            path: parts.uri.path().to_owned(),
                            cookie: parts.headers.get(header::COOKIE)
                                .map(|v| v.to_str().unwrap().to_owned()),
                            body,
                        });

                        tokio::time::sleep(delay).await;
                        let response = Response::builder()
                            .status(status)
                            .header(header::SET_COOKIE, "user_token=stub-token; Path=/; HttpOnly")
                            .body(Full::new(Bytes::from_static(br#"{"success":true}"#)))
                            .unwrap();
                        Ok::<_, hyper::Error>(response)
                    }
                });
                tokio::spawn(async move {
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self { addr, requests }
    }

    pub(crate) fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub(crate) fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}
