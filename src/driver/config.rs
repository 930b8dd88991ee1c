use std::time::Duration;

use hyper::Uri;
use serde::Deserialize;


#[derive(Debug, Clone, confique::Config)]
pub struct DriverConfig {
    /// Base URL of the API under test. Request paths like `/api/movies/<slug>`
    /// are appended to it. May contain a path prefix, but no query.
    #[config(default = "http://localhost:8080")]
    pub base_url: BaseUrl,

    /// Slugs of the movies that requests are sent for. Each iteration picks
    /// one uniformly at random. Best use movies that start with zero votes,
    /// so that results can be checked after the run.
    #[config(
        default = [
            "100-kaadhal-2019",
            "hustlers-2019",
            "this-way-up-2019",
            "the-cursed-2020",
            "beyonce-bowl-2024",
        ],
        validate = validate_slugs,
    )]
    pub slugs: Vec<String>,

    /// Relative weights of the three request kinds. They don't have to add up
    /// to 1; a kind with weight 0 is never requested.
    ///
    /// - "movie": `GET /api/movies/<slug>`
    /// - "rating": `GET /api/ratings/<slug>`
    /// - "vote": `POST /api/user/vote`
    #[config(default = { "movie": 0.4, "rating": 0.3, "vote": 0.3 })]
    pub mix: RequestMix,

    /// Number of options a vote can choose from. `option_chosen` is drawn
    /// uniformly from `0..vote_options`.
    #[config(default = 4, validate(*vote_options > 0, "must be positive"))]
    pub vote_options: u32,

    /// Responses slower than this fail the "response time" check. The measured
    /// time includes connection setup for requests that open a new connection.
    #[config(default = "2000ms", deserialize_with = crate::config::deserialize_duration)]
    pub max_response_time: Duration,

    /// Requests without a response after this time are aborted and count as
    /// failed.
    #[config(default = "60s", deserialize_with = crate::config::deserialize_duration)]
    pub request_timeout: Duration,

    /// Whether cookies set by the API (e.g. the anonymous `user_token`) are
    /// stored and sent with later requests of the same iteration.
    #[config(default = true)]
    pub keep_cookies: bool,

    /// By default, every iteration starts with an empty cookie jar, so each
    /// vote comes from a new anonymous user. If `true`, a virtual worker
    /// keeps its cookies across iterations, like one long browser session.
    #[config(default = false)]
    pub no_cookies_reset: bool,

    /// Maximum number of idle connections kept open to the target.
    #[config(default = 512)]
    pub max_idle_connections: usize,
}

fn validate_slugs(slugs: &Vec<String>) -> Result<(), &'static str> {
    crate::config::validate_not_empty(slugs)?;
    crate::config::validate_unique(slugs)?;

    let is_valid_char = |c: char| c.is_ascii_alphanumeric() || "-_.~".contains(c);
    if slugs.iter().any(|s| s.is_empty() || !s.chars().all(is_valid_char)) {
        return Err("slugs must be non-empty and only contain 'A-Za-z0-9-_.~'");
    }

    Ok(())
}


#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "RawRequestMix")]
pub struct RequestMix {
    pub movie: f64,
    pub rating: f64,
    pub vote: f64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRequestMix {
    movie: f64,
    rating: f64,
    vote: f64,
}

impl TryFrom<RawRequestMix> for RequestMix {
    type Error = &'static str;

    fn try_from(raw: RawRequestMix) -> Result<Self, Self::Error> {
        let weights = [raw.movie, raw.rating, raw.vote];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err("weights must be finite and not negative");
        }
        let sum = weights.iter().sum::<f64>();
        if sum <= 0.0 {
            return Err("at least one weight must be positive");
        }
        if !sum.is_finite() {
            return Err("sum of weights is too large");
        }

        Ok(Self { movie: raw.movie, rating: raw.rating, vote: raw.vote })
    }
}


/// Base URL of the target, without trailing slash.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct BaseUrl(String);

impl BaseUrl {
    /// Appends `path` (which has to start with `/`) to this base URL.
    pub fn join(&self, path: &str) -> Result<Uri, hyper::http::uri::InvalidUri> {
        format!("{}{}", self.0, path).parse()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BaseUrl {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let uri: Uri = s.parse().map_err(|e| format!("invalid URL: {e}"))?;

        match uri.scheme_str() {
            Some("http") | Some("https") => {}
            _ => return Err("must start with 'http://' or 'https://'".into()),
        }
        match uri.authority() {
            None => return Err("must have authority part".into()),
            Some(authority) if authority.as_str().contains('@')
                => return Err("must not contain user part".into()),
            _ => {}
        }
        if uri.query().is_some() || s.contains('#') {
            return Err("must not contain query or fragment".into());
        }

        Ok(Self(s.trim_end_matches('/').to_owned()))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn base(s: &str) -> Result<BaseUrl, String> {
        BaseUrl::try_from(s.to_owned())
    }

    #[test]
    fn base_url_join() {
        let url = base("http://localhost:8080").unwrap();
        assert_eq!(
            url.join("/api/movies/foo").unwrap(),
            "http://localhost:8080/api/movies/foo",
        );

        let url = base("https://example.com/prefix/").unwrap();
        assert_eq!(url.as_str(), "https://example.com/prefix");
        assert_eq!(
            url.join("/api/user/vote").unwrap(),
            "https://example.com/prefix/api/user/vote",
        );
    }

    #[test]
    fn base_url_invalid() {
        assert!(base("localhost:8080").is_err());
        assert!(base("ftp://localhost").is_err());
        assert!(base("/api").is_err());
        assert!(base("http://user@localhost").is_err());
        assert!(base("http://localhost/?x=1").is_err());
        assert!(base("http://localhost/#top").is_err());
    }

    #[test]
    fn slugs() {
        let ok = vec!["hustlers-2019".to_owned(), "the-cursed-2020".to_owned()];
        assert!(validate_slugs(&ok).is_ok());
        assert!(validate_slugs(&vec![]).is_err());
        assert!(validate_slugs(&vec!["a".into(), "a".into()]).is_err());
        assert!(validate_slugs(&vec!["a/b".into()]).is_err());
        assert!(validate_slugs(&vec!["".into()]).is_err());
        assert!(validate_slugs(&vec!["with space".into()]).is_err());
    }

    #[test]
    fn request_mix() {
        let mix = |movie, rating, vote| RequestMix::try_from(RawRequestMix { movie, rating, vote });
        assert!(mix(0.4, 0.3, 0.3).is_ok());
        assert!(mix(0.0, 0.0, 1.0).is_ok());
        assert!(mix(0.0, 0.0, 0.0).is_err());
        assert!(mix(-1.0, 1.0, 1.0).is_err());
        assert!(mix(f64::NAN, 1.0, 1.0).is_err());
        assert!(mix(1e308, 1e308, 1e308).is_err());
    }
}
