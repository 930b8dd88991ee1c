use std::collections::BTreeMap;

use hyper::header::{self, HeaderMap, HeaderValue};

use crate::prelude::*;


/// Minimal per-worker cookie store. Only names and values are kept; domain,
/// path and expiry attributes are ignored as all requests go to one target.
#[derive(Debug, Default, Clone)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remembers all cookies from `Set-Cookie` headers in `headers`. A cookie
    /// with an empty value or `Max-Age=0` is removed instead.
    pub fn store_from(&mut self, headers: &HeaderMap) {
        for value in headers.get_all(header::SET_COOKIE) {
            let Ok(value) = value.to_str() else {
                trace!("ignoring non-ASCII Set-Cookie header");
                continue;
            };

            let mut parts = value.split(';');
            let Some((name, cookie_value)) = parts.next().and_then(|p| p.split_once('=')) else {
                continue;
            };
            let name = name.trim();
            let cookie_value = cookie_value.trim().trim_matches('"');
            if name.is_empty() {
                continue;
            }

            let expired = parts.any(|attr| {
                attr.split_once('=').is_some_and(|(k, v)| {
                    k.trim().eq_ignore_ascii_case("max-age") && v.trim().starts_with(['0', '-'])
                })
            });

            if cookie_value.is_empty() || expired {
                self.cookies.remove(name);
            } else {
                self.cookies.insert(name.to_owned(), cookie_value.to_owned());
            }
        }
    }

    pub fn clear(&mut self) {
        self.cookies.clear();
    }

    /// Value for the `Cookie` request header, or `None` if the jar is empty.
    pub fn header_value(&self) -> Option<HeaderValue> {
        if self.cookies.is_empty() {
            return None;
        }

        let joined = self.cookies.iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");

        // Both parts originate from a valid header value.
        HeaderValue::try_from(joined).ok()
    }
}

#[cfg(test)]
impl CookieJar {
    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }
}
