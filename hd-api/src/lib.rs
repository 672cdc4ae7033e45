//! Huddle API - resilient HTTP client for the backend REST API.
//!
//! This crate provides the single façade for all REST calls made by the
//! client. It owns:
//! - Deduplication of identical in-flight requests (one network call,
//!   shared outcome)
//! - Cancellation handles per in-flight request
//! - Retry with exponential backoff (network/timeout/5xx, never 429)
//! - Bearer token attachment and reactive refresh-and-replay on 401
//! - Error normalization into the `HdError` taxonomy
//! - Breadcrumb/telemetry side effects that never block the request flow
//! - A narrow short-timeout health probe

pub mod auth;
pub mod client;
pub mod request;
pub mod response;

// Re-export key types
pub use reqwest::Method;

pub use auth::{HttpTokenRefresher, SessionController, TokenRefresher, TokenStore};
pub use client::ApiClient;
pub use request::{RequestKey, RequestOptions, RetryPolicy};
pub use response::ApiResponse;
