//! Shared post-fetch protocol applied to every response.
//!
//! # Design
//! Both the RPC and REST layers route responses through `fetch_response`
//! before touching the body: status validation (only canonical 200 carries a
//! payload), locale-change detection from `Content-Language`, and cookie
//! capture from `Set-Cookie`. Locale and cookie handling are opportunistic —
//! a malformed header is ignored, never escalated. `fetch_as_json` then
//! enforces the `application/json` content type and parses the body into a
//! `serde_json::Value` for the protocol layer to interpret.

use reqwest::header::{CONTENT_LANGUAGE, CONTENT_TYPE, SET_COOKIE};
use reqwest::{Response, StatusCode};
use serde_json::Value;

use crate::error::Error;
use crate::session::Session;

/// Strategy turning a raw `Set-Cookie` header into the value stored as the
/// outgoing `Cookie` header. Pluggable so the default best-effort pair
/// extraction can be swapped for a real cookie jar without touching the
/// response flow.
pub trait CookieCapture: Send + Sync {
    /// Return the `name=value` string to send back, or `None` to ignore the
    /// header.
    fn capture(&self, set_cookie: &str) -> Option<String>;
}

/// Default capture: the first `name=value` pair, attributes dropped. No
/// expiry, domain, or path handling — a deliberate cookie-jar substitute for
/// non-browser callers that only need the session cookie echoed back.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstPairCapture;

impl CookieCapture for FirstPairCapture {
    fn capture(&self, set_cookie: &str) -> Option<String> {
        let first = set_cookie.split(';').next()?;
        let (name, value) = first.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some(format!("{}={}", name, value.trim()))
    }
}

/// Validate the HTTP status and apply the locale/cookie side effects.
///
/// With the session's `http_errors` policy enabled (the default), anything
/// other than 200 OK fails with `Error::Http` carrying the body text. With
/// the policy disabled the response is handed back as-is and the caller
/// interprets the status itself.
pub(crate) async fn fetch_response(sess: &Session, response: Response) -> Result<Response, Error> {
    let status = response.status();
    if sess.http_errors() && status != StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Http {
            status: status.as_u16(),
            body,
        });
    }

    if let Some(locale) = header_str(&response, CONTENT_LANGUAGE) {
        sess.locale_check(locale);
    }

    if let Some(raw) = header_str(&response, SET_COOKIE) {
        if let Some(pair) = sess.cookie_capture().capture(raw) {
            tracing::debug!("captured session cookie from Set-Cookie");
            sess.header_add("Cookie", pair);
        }
    }

    Ok(response)
}

/// Parse the body as JSON after checking `Content-Type`.
///
/// Only called once `fetch_response` has passed; a non-JSON content type
/// fails with `Error::ContentType`, an unparseable body with `Error::Rest`
/// carrying the raw text.
pub(crate) async fn fetch_as_json(response: Response) -> Result<Value, Error> {
    let observed = header_str(&response, CONTENT_TYPE).unwrap_or("").to_string();
    let mime = observed.split(';').next().unwrap_or("").trim();
    if mime != "application/json" {
        return Err(Error::ContentType { observed });
    }

    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| Error::Rest {
        message: format!("invalid json body: {e}"),
        body,
    })
}

fn header_str(response: &Response, name: reqwest::header::HeaderName) -> Option<&str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}
