//! Client-side access layer for `/service` backends speaking JSON-RPC 2.0
//! and REST entity CRUD with `Range`/`Content-Range` paging.
//!
//! # Overview
//! A `Session` holds the per-client state (base URL, headers, locale
//! tracking, HTTP error policy). `RpcClient` and `RpcBatch` speak JSON-RPC
//! against `<base>/json`; `RestEntityClient` and `RestIter` speak entity
//! CRUD and sliding-window pagination against `<base>/entity/<name>`. Every
//! response from either protocol passes through the shared response handler
//! for status validation, locale-change detection, and cookie propagation.
//!
//! # Design
//! - One request attempt per call: failures surface to the caller as typed
//!   `Error` values with no retry, caching, or queueing.
//! - Correlation ids are owned by each `RpcClient` instance, never process
//!   globals.
//! - Entities cross the `Entity` trait's `normalize`/`de_normalize` hooks,
//!   defaulting to plain serde conversions.
//! - The library emits `tracing` events but installs no subscriber.

pub mod error;
pub mod response;
pub mod rest;
pub mod rpc;
pub mod session;

pub use error::{Error, RpcFault};
pub use response::{CookieCapture, FirstPairCapture};
pub use rest::{Entity, RestEntityClient, RestIter, REST_PAGE_SIZE};
pub use rpc::{BatchCall, RpcBatch, RpcClient, SmdMethod, SmdParam};
pub use session::{LocaleFn, Session};
