//! The scenario itself: what a single iteration of a virtual worker does.
//!
//! Each iteration picks a random movie slug and one of three request kinds
//! (weighted), sends exactly one request and evaluates two checks on the
//! outcome. Nothing is retried; failures are only recorded.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::{
    Method, Request, StatusCode,
    header::{self, HeaderValue},
};
use rand::Rng;
use serde::Serialize;
use tokio::time::Instant;

use crate::{
    prelude::*,
    util::{HttpClient, RequestBody},
};

mod config;
mod cookies;
mod sampler;

pub use self::{
    config::{BaseUrl, DriverConfig, RequestMix},
    cookies::CookieJar,
    sampler::WeightedSampler,
};


/// The three kinds of requests. The tag is what metrics and thresholds refer
/// to, e.g. `http_req_duration{api:vote}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Movie,
    Rating,
    Vote,
}

impl RequestKind {
    pub const ALL: [Self; 3] = [Self::Movie, Self::Rating, Self::Vote];

    pub fn tag(self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Rating => "rating",
            Self::Vote => "vote",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }
}

/// The two checks evaluated for every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CheckKind {
    /// Status code in `[200, 300)`.
    Status,
    /// Response arrived faster than `driver.max_response_time`.
    ResponseTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Check {
    pub request: RequestKind,
    pub kind: CheckKind,
    pub passed: bool,
}

impl Check {
    /// Name as shown in the summary, e.g. "vote status 2xx".
    pub fn name(&self) -> String {
        let what = match self.kind {
            CheckKind::Status => "status 2xx",
            CheckKind::ResponseTime => "response time",
        };
        format!("{} {}", self.request.tag(), what)
    }
}

/// What an iteration is going to do, decided before any I/O happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan<'a> {
    Movie { slug: &'a str },
    Rating { slug: &'a str },
    Vote { slug: &'a str, option_chosen: u32 },
}

impl<'a> Plan<'a> {
    pub fn kind(&self) -> RequestKind {
        match self {
            Plan::Movie { .. } => RequestKind::Movie,
            Plan::Rating { .. } => RequestKind::Rating,
            Plan::Vote { .. } => RequestKind::Vote,
        }
    }

    pub fn slug(&self) -> &'a str {
        match *self {
            Plan::Movie { slug } | Plan::Rating { slug } | Plan::Vote { slug, .. } => slug,
        }
    }
}

/// JSON body of `POST /api/user/vote`.
#[derive(Debug, Serialize)]
struct VoteBody<'a> {
    movie_slug: &'a str,
    option_chosen: u32,
}

/// Result of a single request.
#[derive(Debug, Clone, Copy)]
pub struct Outcome {
    pub kind: RequestKind,

    /// `None` if no response was received (connection error, timeout, ...).
    pub status: Option<StatusCode>,

    /// Time from handing the request to the client until the response body
    /// was fully received (or until the request failed). Unlike k6's
    /// `http_req_duration`, this includes waiting for a pooled connection and,
    /// if a new one has to be opened, TCP connect and TLS handshake. With
    /// connection reuse that only affects the first requests per connection.
    pub duration: Duration,
}

impl Outcome {
    /// Whether this request counts as failed for `http_req_failed`: no
    /// response at all or a status outside of `[200, 400)`.
    pub fn is_failed(&self) -> bool {
        !self.status.is_some_and(|s| (200..400).contains(&s.as_u16()))
    }
}


/// Immutable scenario state shared by all virtual workers.
#[derive(Debug)]
pub struct Driver {
    base_url: BaseUrl,
    slugs: Vec<String>,
    kinds: WeightedSampler<RequestKind>,
    vote_options: u32,
    max_response_time: Duration,
    request_timeout: Duration,
    keep_cookies: bool,
    reset_cookies: bool,
}

impl Driver {
    pub fn new(config: &DriverConfig) -> Result<Self> {
        let kinds = WeightedSampler::new([
            (RequestKind::Movie, config.mix.movie),
            (RequestKind::Rating, config.mix.rating),
            (RequestKind::Vote, config.mix.vote),
        ]).map_err(|e| anyhow!("invalid request mix: {e}"))?;

        Ok(Self {
            base_url: config.base_url.clone(),
            slugs: config.slugs.clone(),
            kinds,
            vote_options: config.vote_options,
            max_response_time: config.max_response_time,
            request_timeout: config.request_timeout,
            keep_cookies: config.keep_cookies,
            reset_cookies: !config.no_cookies_reset,
        })
    }

    pub fn base_url(&self) -> &BaseUrl {
        &self.base_url
    }

    pub fn request_kinds(&self) -> &WeightedSampler<RequestKind> {
        &self.kinds
    }

    /// Decides what the next iteration does: first the slug (uniformly), then
    /// the request kind (weighted) and for votes the chosen option
    /// (uniformly).
    pub fn plan<R: Rng + ?Sized>(&self, rng: &mut R) -> Plan<'_> {
        let slug = &self.slugs[rng.random_range(0..self.slugs.len())];
        match self.kinds.sample(rng) {
            RequestKind::Movie => Plan::Movie { slug },
            RequestKind::Rating => Plan::Rating { slug },
            RequestKind::Vote => Plan::Vote {
                slug,
                option_chosen: rng.random_range(0..self.vote_options),
            },
        }
    }

    /// Builds the HTTP request for the given plan.
    pub fn build_request(&self, plan: &Plan<'_>, cookies: &CookieJar) -> Result<Request<RequestBody>> {
        let (method, path, body) = match *plan {
            Plan::Movie { slug } => (Method::GET, format!("/api/movies/{slug}"), Bytes::new()),
            Plan::Rating { slug } => (Method::GET, format!("/api/ratings/{slug}"), Bytes::new()),
            Plan::Vote { slug, option_chosen } => {
                let body = serde_json::to_vec(&VoteBody { movie_slug: slug, option_chosen })
                    .context("failed to serialize vote")?;
                (Method::POST, "/api/user/vote".to_owned(), body.into())
            }
        };

        let uri = self.base_url.join(&path)
            .with_context(|| format!("failed to build URI for path '{path}'"))?;
        let mut builder = Request::builder().method(method).uri(uri);
        if plan.kind() == RequestKind::Vote {
            builder = builder.header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        if self.keep_cookies && let Some(cookie) = cookies.header_value() {
            builder = builder.header(header::COOKIE, cookie);
        }

        builder.body(Full::new(body)).context("failed to build request")
    }

    /// Runs one iteration: plan, send, measure. Unless `no_cookies_reset` is
    /// set, the worker's cookies from earlier iterations are dropped first.
    pub async fn iterate<R: Rng + ?Sized>(
        &self,
        client: &HttpClient,
        rng: &mut R,
        cookies: &mut CookieJar,
    ) -> Outcome {
        if self.reset_cookies {
            cookies.clear();
        }
        let plan = self.plan(rng);
        self.execute(&plan, client, cookies).await
    }

    /// Sends the request for `plan` and waits for the complete response.
    /// Never fails: errors are logged and reflected in the outcome.
    pub async fn execute(
        &self,
        plan: &Plan<'_>,
        client: &HttpClient,
        cookies: &mut CookieJar,
    ) -> Outcome {
        let kind = plan.kind();
        let req = match self.build_request(plan, cookies) {
            Ok(req) => req,
            Err(e) => {
                // Slugs and base URL are validated, so this does not happen.
                error!("could not build request for {plan:?}: {e:#}");
                return Outcome { kind, status: None, duration: Duration::ZERO };
            }
        };
        trace!(method = %req.method(), uri = %req.uri(), "sending request");

        let start = Instant::now();
        let result = tokio::select! {
            res = send(client, req) => res,
            _ = tokio::time::sleep(self.request_timeout) => {
                Err(anyhow!("no response after {:?}", self.request_timeout))
            }
        };
        let duration = start.elapsed();

        match result {
            Ok(parts) => {
                if self.keep_cookies {
                    cookies.store_from(&parts.headers);
                }
                if !parts.status.is_success() {
                    debug!(api = kind.tag(), slug = plan.slug(), status = ?parts.status, ?duration, "non-2xx response");
                }
                Outcome { kind, status: Some(parts.status), duration }
            }
            Err(e) => {
                debug!(api = kind.tag(), slug = plan.slug(), ?duration, "request failed: {e:#}");
                Outcome { kind, status: None, duration }
            }
        }
    }

    /// Evaluates the two checks for an outcome. A request without response
    /// fails the status check.
    pub fn checks(&self, outcome: &Outcome) -> [Check; 2] {
        let status_ok = outcome.status.is_some_and(|s| s.is_success());
        let fast_enough = outcome.duration < self.max_response_time;
        [
            Check { request: outcome.kind, kind: CheckKind::Status, passed: status_ok },
            Check { request: outcome.kind, kind: CheckKind::ResponseTime, passed: fast_enough },
        ]
    }
}

async fn send(client: &HttpClient, req: Request<RequestBody>) -> Result<http::response::Parts> {
    let response = client.request(req).await.context("failed to send request")?;
    let (parts, body) = response.into_parts();
    body.collect().await.context("failed to download response body")?;
    Ok(parts)
}
