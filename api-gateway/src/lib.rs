//! Atlas API Gateway
//!
//! Resilient entry point over the platform's downstream services: auth, data
//! ingestion, graph/search, embeddings and the tool server. The gateway core
//! composes circuit breaking, bounded retries, fleet-wide rate limiting,
//! distributed caching, service registration and health aggregation so route
//! handlers only ever see one dependable client and a small set of
//! distinguishable error kinds.

pub mod clients;
pub mod config;
pub mod downstream;
pub mod error;
pub mod health;
pub mod metrics;
pub mod middleware;
pub mod rest_api;

pub use clients::{CallRequest, CallResponse, ServiceClient, Transport};
pub use config::Config;
pub use downstream::Downstream;
pub use error::{GatewayError, Result};
