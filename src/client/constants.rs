//! Constants for the API client (timeouts, headers, pacing).

use std::time::Duration;

/// Default remote API root.
pub const DEFAULT_BASE_URL: &str = "https://esi.evetech.net/latest";

/// Default HTTP connect timeout (10 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default HTTP read timeout (60 seconds).
pub const READ_TIMEOUT_SECS: u64 = 60;

/// Default attempts per request, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Freshness window applied when a response carries no usable `Expires` header.
pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(60);

/// Remaining error budget advertised by the remote API.
pub const ERROR_LIMIT_REMAIN_HEADER: &str = "x-esi-error-limit-remain";

/// Seconds until the remote error budget resets.
pub const ERROR_LIMIT_RESET_HEADER: &str = "x-esi-error-limit-reset";

/// Page count advertised by paginated endpoints.
pub const PAGES_HEADER: &str = "x-pages";

/// Default error budget floor; at or below it requests wait for the reset window.
pub const DEFAULT_ERROR_BUDGET_FLOOR: u32 = 10;

/// Upper bound on a single error-budget wait.
pub const MAX_BUDGET_WAIT: Duration = Duration::from_secs(120);

/// Warning threshold for cumulative pacing delay per lane (30 seconds).
pub const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Pacing lane used by the bulk catalog import.
pub const LANE_CATALOG: &str = "catalog";

/// Pacing lane used while resolving mail senders and recipients.
pub const LANE_MAIL: &str = "mail";

/// Default gap between catalog import requests.
pub const DEFAULT_CATALOG_DELAY: Duration = Duration::from_millis(100);

/// Default gap between mail participant lookups.
pub const DEFAULT_MAIL_DELAY: Duration = Duration::from_millis(250);
