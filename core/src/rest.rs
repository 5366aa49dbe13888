//! REST entity layer: CRUD per collection and sliding-window pagination.
//!
//! # Design
//! Entities cross the wire as JSON and enter the application through the
//! `Entity` trait's `normalize`/`de_normalize` hooks, which default to plain
//! serde conversions and can be overridden for type fix-ups. `RestIter`
//! tracks the pagination cursor and the optionally-known total; the cursor
//! advances *before* the request is awaited so consecutive `next` calls
//! always request disjoint, contiguous windows. Every response passes
//! through the shared response handler first, so HTTP-error, locale, and
//! cookie behavior is identical to the RPC layer.

use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;
use crate::response::{fetch_as_json, fetch_response};
use crate::session::Session;

/// Default number of items requested per pagination window.
pub const REST_PAGE_SIZE: u64 = 24;

/// Conversion between the wire JSON of an entity and its typed
/// representation. The defaults are straight serde conversions; override
/// them when the raw format needs fix-ups (date parsing, defaulted fields).
pub trait Entity: Serialize + DeserializeOwned {
    /// Build the typed entity from the raw wire value.
    fn normalize(raw: Value) -> Result<Self, Error> {
        serde_json::from_value(raw).map_err(|e| Error::Deserialize(e.to_string()))
    }

    /// Convert the typed entity back to the raw format the server stores.
    fn de_normalize(&self) -> Result<Value, Error> {
        serde_json::to_value(self).map_err(|e| Error::Serialize(e.to_string()))
    }
}

/// CRUD operations against one named collection under the session's REST
/// base URL (`<base>/entity/<name>[/<key>]`).
pub struct RestEntityClient<D> {
    sess: Arc<Session>,
    entity_name: String,
    _entity: PhantomData<D>,
}

impl<D: Entity> RestEntityClient<D> {
    pub fn new(sess: Arc<Session>, entity_name: impl Into<String>) -> Self {
        Self {
            sess,
            entity_name: entity_name.into(),
            _entity: PhantomData,
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/{}", self.sess.rest_base_url_get(), self.entity_name)
    }

    fn item_url(&self, key: impl Display) -> String {
        format!("{}/{key}", self.collection_url())
    }

    /// Fetch one entity by key.
    pub async fn get(&self, key: impl Display) -> Result<D, Error> {
        let raw = self
            .execute(self.sess.request(Method::GET, &self.item_url(key)))
            .await?;
        D::normalize(raw)
    }

    /// Create an entity; the server reply (typically with the assigned key)
    /// is normalized and returned.
    pub async fn create(&self, data: &D) -> Result<D, Error> {
        let body = data.de_normalize()?;
        let raw = self
            .execute(
                self.sess
                    .request(Method::POST, &self.collection_url())
                    .json(&body),
            )
            .await?;
        D::normalize(raw)
    }

    /// Store an entity under `key`. Returns the server's raw boolean
    /// acknowledgement — a status flag, not an entity.
    pub async fn set(&self, key: impl Display, data: &D) -> Result<bool, Error> {
        let body = data.de_normalize()?;
        let raw = self
            .execute(
                self.sess
                    .request(Method::PUT, &self.item_url(key))
                    .json(&body),
            )
            .await?;
        as_ack(raw)
    }

    /// Delete the entity under `key`. Returns the server's raw boolean
    /// acknowledgement.
    pub async fn remove(&self, key: impl Display) -> Result<bool, Error> {
        let raw = self
            .execute(self.sess.request(Method::DELETE, &self.item_url(key)))
            .await?;
        as_ack(raw)
    }

    /// Page through the collection from offset 0 with the default page size.
    pub fn query(&self) -> RestIter<D> {
        self.query_range(0, REST_PAGE_SIZE)
    }

    /// Page through the collection from `offset` in windows of `page_size`.
    pub fn query_range(&self, offset: u64, page_size: u64) -> RestIter<D> {
        RestIter::new(self.sess.clone(), &self.entity_name, offset, page_size)
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<Value, Error> {
        let response = request.send().await?;
        let response = fetch_response(&self.sess, response).await?;
        fetch_as_json(response).await
    }
}

fn as_ack(raw: Value) -> Result<bool, Error> {
    raw.as_bool().ok_or_else(|| Error::Rest {
        message: "expected boolean acknowledgement".to_string(),
        body: raw.to_string(),
    })
}

/// Stateful cursor over a collection using `Range: items=<begin>-<end>`
/// requests and `Content-Range: items <begin>-<end>/<total>` responses.
///
/// `next` returns `Some(page)` while data may remain and `None` once the
/// cursor reaches the known total. An empty page with the total still
/// unknown is a valid, non-terminal result.
pub struct RestIter<D> {
    sess: Arc<Session>,
    url: String,
    total: Option<u64>,
    cursor: u64,
    page_size: u64,
    _entity: PhantomData<D>,
}

impl<D: Entity> RestIter<D> {
    pub fn new(sess: Arc<Session>, entity_name: &str, offset: u64, page_size: u64) -> Self {
        let url = format!("{}/{}", sess.rest_base_url_get(), entity_name);
        Self {
            sess,
            url,
            total: None,
            cursor: offset,
            page_size: page_size.max(1),
            _entity: PhantomData,
        }
    }

    /// Collection size as reported by the first `Content-Range` response
    /// that carried one; `None` until then.
    pub fn total_count(&self) -> Option<u64> {
        self.total
    }

    /// Fetch the next window of the collection.
    ///
    /// When the total is known and the cursor has reached it, returns
    /// `Ok(None)` without touching the network. The cursor is advanced past
    /// the requested window before the request is awaited, so the same
    /// window is never requested twice.
    pub async fn next(&mut self) -> Result<Option<Vec<D>>, Error> {
        let Some((begin, end)) = next_window(self.cursor, self.page_size, self.total) else {
            return Ok(None);
        };
        self.cursor = end + 1;

        tracing::debug!(begin, end, "rest page fetch");
        let response = self
            .sess
            .request(Method::GET, &self.url)
            .header("Range", format!("items={begin}-{end}"))
            .send()
            .await?;
        let response = fetch_response(&self.sess, response).await?;

        if self.total.is_none() {
            // First sighting wins; a consistent server never changes it.
            if let Some(raw) = response
                .headers()
                .get("Content-Range")
                .and_then(|v| v.to_str().ok())
            {
                if let Some((_, _, Some(total))) = parse_content_range(raw) {
                    self.total = Some(total);
                }
            }
        }

        let raw = fetch_as_json(response).await?;
        let Value::Array(items) = raw else {
            return Err(Error::Rest {
                message: "expected json array page".to_string(),
                body: raw.to_string(),
            });
        };
        items
            .into_iter()
            .map(D::normalize)
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}

/// The next `[begin, end]` window for the given cursor, or `None` once the
/// cursor has reached a known total. The end is clamped to `total - 1` so a
/// final partial page never over-requests.
fn next_window(cursor: u64, page_size: u64, total: Option<u64>) -> Option<(u64, u64)> {
    if let Some(total) = total {
        if cursor >= total {
            return None;
        }
    }
    let mut end = cursor + page_size - 1;
    if let Some(total) = total {
        end = end.min(total - 1);
    }
    Some((cursor, end))
}

/// Parse `items <begin>-<end>[/<total>]`; an absent or empty total segment
/// yields `None` for the total. Anything unparseable is ignored by the
/// caller rather than escalated.
fn parse_content_range(raw: &str) -> Option<(u64, u64, Option<u64>)> {
    let rest = raw.strip_prefix("items ")?;
    let (range, total) = match rest.split_once('/') {
        Some((range, "")) => (range, None),
        Some((range, total)) => (range, Some(total.trim().parse().ok()?)),
        None => (rest, None),
    };
    let (begin, end) = range.split_once('-')?;
    Some((begin.trim().parse().ok()?, end.trim().parse().ok()?, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_partition_the_range_when_total_unknown() {
        let mut cursor = 0;
        let mut previous_end = None;
        for _ in 0..4 {
            let (begin, end) = next_window(cursor, 24, None).unwrap();
            assert_eq!(end - begin + 1, 24);
            if let Some(prev) = previous_end {
                assert_eq!(begin, prev + 1);
            } else {
                assert_eq!(begin, 0);
            }
            previous_end = Some(end);
            cursor = end + 1;
        }
    }

    #[test]
    fn window_clamps_to_known_total() {
        assert_eq!(next_window(24, 24, Some(30)), Some((24, 29)));
        assert_eq!(next_window(0, 24, Some(10)), Some((0, 9)));
    }

    #[test]
    fn window_ends_at_known_total() {
        assert_eq!(next_window(30, 24, Some(30)), None);
        assert_eq!(next_window(100, 24, Some(30)), None);
        assert_eq!(next_window(0, 24, Some(0)), None);
    }

    #[test]
    fn window_after_first_full_page_of_one_hundred() {
        // Content-Range: items 0-23/100 leaves the cursor at 24.
        assert_eq!(next_window(24, 24, Some(100)), Some((24, 47)));
    }

    #[test]
    fn content_range_with_total() {
        assert_eq!(
            parse_content_range("items 0-23/100"),
            Some((0, 23, Some(100)))
        );
    }

    #[test]
    fn content_range_without_total() {
        assert_eq!(parse_content_range("items 24-47"), Some((24, 47, None)));
        assert_eq!(parse_content_range("items 24-47/"), Some((24, 47, None)));
    }

    #[test]
    fn content_range_rejects_garbage() {
        assert_eq!(parse_content_range("bytes 0-23/100"), None);
        assert_eq!(parse_content_range("items a-b/c"), None);
        assert_eq!(parse_content_range("items 0-23/*"), None);
        assert_eq!(parse_content_range(""), None);
    }

    #[test]
    fn ack_accepts_only_booleans() {
        assert!(as_ack(serde_json::json!(true)).unwrap());
        assert!(!as_ack(serde_json::json!(false)).unwrap());
        assert!(matches!(
            as_ack(serde_json::json!({"ok": true})),
            Err(Error::Rest { .. })
        ));
    }
}
