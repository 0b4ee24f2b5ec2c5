//! Remote-call plumbing shared by the HTTP backends.
//!
//! - [`retry`]: transient error detection (429, 5xx, network timeouts) with
//!   configurable exponential backoff. Never retries 400/401 errors.

pub mod retry;

pub use retry::RetryConfig;
