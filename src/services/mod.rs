//! Business logic services.
//!
//! The store, the retry executor and the selection rules are independent of
//! HTTP; the `http_*` modules only translate requests into store calls.

pub mod context;
pub mod http_api;
pub mod http_server;
pub mod retry;
pub mod reviewer_selection;
pub mod reviewer_store;

pub use context::OpContext;
pub use http_api::ApiState;
pub use retry::{with_retry, RetryPolicy};
pub use reviewer_store::{ReviewerStore, StoreConfig};
