//! Utility modules for the portfolio guard service.
//! This module contains common utilities used across the application.

mod error;
mod logging;

pub use logging::{
    create_request_span, init_logging, log_ip_blocked, log_rate_limit, log_store_degraded,
    log_store_recovered,
};

pub use error::{GuardError, GuardResult};
