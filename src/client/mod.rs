//! Remote API access: raw requests, retries, pacing and error budget.
//!
//! # Overview
//!
//! - [`ApiClient`] - shared `reqwest` wrapper returning raw status/headers/body
//! - [`ApiRequest`] - explicit request configuration with documented defaults
//! - [`RetryPolicy`] - immediate retries for transport errors, opt-in for 5xx
//! - [`ErrorBudget`] - tracks the advertised error allowance and throttles
//! - [`Pacer`] - fixed minimum gap per lane for bulk phases
//! - [`TokenSource`] - bearer tokens for member-scoped resources

mod budget;
pub mod constants;
mod error;
mod http;
pub mod rate_limiter;
mod retry;
mod token;

pub use budget::{BudgetSnapshot, ErrorBudget};
pub use error::FetchError;
pub use http::{ApiClient, ApiRequest, ApiResponse, ClientConfig, default_user_agent};
pub use rate_limiter::Pacer;
pub use retry::{FailureType, RetryDecision, RetryPolicy, classify_error, classify_status};
pub use token::{ACCESS_TOKEN_ENV, StaticTokenSource, TokenSource};
