//! Per-client session state shared by the RPC and REST layers.
//!
//! # Design
//! A `Session` owns the base service URL, the outgoing header set, the
//! locale-change callback, and the HTTP error policy. It is single-tenant
//! state: one logical user per session, wrapped in an `Arc` and handed to
//! every client built on top of it. The header map and the last seen locale
//! sit behind mutexes because response handling mutates them (cookie
//! capture, locale tracking) while callers only hold `&Session`; the
//! remaining configuration is fixed before the session is shared.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::Error;
use crate::response::{CookieCapture, FirstPairCapture};

/// Callback invoked when the server-reported locale changes.
pub type LocaleFn = Box<dyn Fn(&str) + Send + Sync>;

/// Shared per-client state: service URL, headers, locale tracking, and the
/// HTTP error policy consulted by the response handler.
pub struct Session {
    http: reqwest::Client,
    base_url: String,
    headers: Mutex<HashMap<String, String>>,
    locale_fn: Option<LocaleFn>,
    last_locale: Mutex<Option<String>>,
    http_errors: bool,
    cookie_capture: Box<dyn CookieCapture>,
}

impl Session {
    /// Create a session for the service rooted at `base_url`, typically
    /// ending in `/service`. A trailing slash is stripped so sub-path
    /// concatenation stays predictable.
    ///
    /// # Errors
    /// Fails if the underlying HTTP client cannot be constructed (TLS
    /// backend initialization).
    pub fn new(base_url: impl Into<String>) -> Result<Self, Error> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self::with_client(base_url, http))
    }

    /// Create a session around a caller-configured `reqwest::Client`
    /// (timeouts, proxies, connection pools).
    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            headers: Mutex::new(HashMap::new()),
            locale_fn: None,
            last_locale: Mutex::new(None),
            http_errors: true,
            cookie_capture: Box::new(FirstPairCapture),
        }
    }

    /// Register the function called when the server-reported locale changes.
    /// It fires once per distinct new value, including the first one seen.
    pub fn locale_cb_set(&mut self, f: LocaleFn) {
        self.locale_fn = Some(f);
    }

    /// Replace the strategy that turns a `Set-Cookie` header into the
    /// outgoing `Cookie` value.
    pub fn cookie_capture_set(&mut self, capture: Box<dyn CookieCapture>) {
        self.cookie_capture = capture;
    }

    /// Whether non-200 responses fail eagerly (`true`, the default) or are
    /// left for the caller to interpret.
    pub fn http_errors_set(&mut self, enabled: bool) {
        self.http_errors = enabled;
    }

    pub(crate) fn http_errors(&self) -> bool {
        self.http_errors
    }

    pub(crate) fn cookie_capture(&self) -> &dyn CookieCapture {
        self.cookie_capture.as_ref()
    }

    /// Invoke the locale callback iff one is registered and `locale` differs
    /// from the last value that fired it. `last_locale` is only updated
    /// alongside a fired callback, so registering a callback later still
    /// sees the first locale as a change.
    pub fn locale_check(&self, locale: &str) {
        let Some(f) = &self.locale_fn else { return };
        let mut last = self.last_locale.lock().unwrap();
        if last.as_deref() != Some(locale) {
            tracing::debug!(%locale, "server locale changed");
            f(locale);
            *last = Some(locale.to_string());
        }
    }

    /// Add or overwrite an outgoing header; later calls win.
    pub fn header_add(&self, name: impl Into<String>, value: impl Into<String>) {
        self.headers
            .lock()
            .unwrap()
            .insert(name.into(), value.into());
    }

    /// A fresh copy of the current header set. Callers may extend it (for
    /// example with a `Range` header) without affecting stored state.
    pub fn headers_get(&self) -> HashMap<String, String> {
        self.headers.lock().unwrap().clone()
    }

    /// The bare base service URL.
    pub fn service_url(&self) -> &str {
        &self.base_url
    }

    /// Concatenate `path` onto the base URL, inserting a `/` separator when
    /// `path` does not already start with one.
    pub fn service_url_get(&self, path: &str) -> String {
        if path.is_empty() {
            return self.base_url.clone();
        }
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// URL of the JSON-RPC endpoint (fixed `/json` sub-path).
    pub fn rpc_url_get(&self) -> String {
        self.service_url_get("/json")
    }

    /// Base URL of the REST entity collections (fixed `/entity` sub-path).
    pub fn rest_base_url_get(&self) -> String {
        self.service_url_get("/entity")
    }

    /// Start a request against `url` carrying a snapshot of the current
    /// session headers. Headers added to the session after this point do not
    /// affect the request.
    pub(crate) fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, url);
        for (name, value) in self.headers_get() {
            builder = builder.header(name, value);
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn session() -> Session {
        Session::new("http://localhost:3000/service").unwrap()
    }

    #[test]
    fn trailing_slash_is_stripped() {
        let sess = Session::new("http://localhost:3000/service/").unwrap();
        assert_eq!(sess.service_url(), "http://localhost:3000/service");
    }

    #[test]
    fn service_url_get_inserts_separator() {
        let sess = session();
        assert_eq!(
            sess.service_url_get("json"),
            "http://localhost:3000/service/json"
        );
        assert_eq!(
            sess.service_url_get("/json"),
            "http://localhost:3000/service/json"
        );
        assert_eq!(sess.service_url_get(""), "http://localhost:3000/service");
    }

    #[test]
    fn fixed_sub_paths() {
        let sess = session();
        assert_eq!(sess.rpc_url_get(), "http://localhost:3000/service/json");
        assert_eq!(
            sess.rest_base_url_get(),
            "http://localhost:3000/service/entity"
        );
    }

    #[test]
    fn header_add_overwrites() {
        let sess = session();
        sess.header_add("Authorization", "Bearer one");
        sess.header_add("Authorization", "Bearer two");
        let headers = sess.headers_get();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["Authorization"], "Bearer two");
    }

    #[test]
    fn headers_get_returns_fresh_copy() {
        let sess = session();
        sess.header_add("Cookie", "sid=1");
        let mut headers = sess.headers_get();
        headers.insert("Range".to_string(), "items=0-23".to_string());
        assert_eq!(sess.headers_get().len(), 1);
    }

    #[test]
    fn locale_check_fires_once_per_distinct_value() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut sess = session();
        {
            let count = count.clone();
            let seen = seen.clone();
            sess.locale_cb_set(Box::new(move |locale| {
                count.fetch_add(1, Ordering::SeqCst);
                seen.lock().unwrap().push(locale.to_string());
            }));
        }

        sess.locale_check("en");
        sess.locale_check("en");
        assert_eq!(count.load(Ordering::SeqCst), 1);

        sess.locale_check("sv");
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["en", "sv"]);
    }

    #[test]
    fn locale_check_without_callback_keeps_first_value_pending() {
        let mut sess = session();
        // No callback registered: the baseline is not recorded, so a callback
        // added afterwards still sees the same locale as a change.
        sess.locale_check("en");

        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = count.clone();
            sess.locale_cb_set(Box::new(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        sess.locale_check("en");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
