//! # ndid-client — Protocol API Client
//!
//! The harness drives platform nodes through the [`NodeApi`] trait. This
//! crate provides:
//!
//! - [`NdidClient`]: the reqwest implementation, one shared HTTP client
//!   resolving each node's base URL from [`HarnessConfig`].
//! - [`types`]: request bodies and the [`ApiResponse`] wrapper. Non-2xx
//!   statuses are returned as data so flows can assert on expected
//!   rejections.
//! - [`config`]: YAML configuration with environment overrides.
//!
//! No call is retried.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod types;

pub use api::NodeApi;
pub use client::NdidClient;
pub use config::{HarnessConfig, CONFIG_PATH_VAR};
pub use error::{ConfigError, NodeApiError};
pub use types::{
    ApiResponse, CallbackRegistration, CloseRequestParams, CreateRequestParams,
    DataRequestParams, ErrorResponseParams, ResponseParams, ResponseStatus, RevokeAccessorParams,
    SendDataParams, UpdateNodeParams,
};
