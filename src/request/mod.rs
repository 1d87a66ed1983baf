//! Request layer
//!
//! This module owns every outbound HTTP request:
//! - Proxy rotation over a shuffled pool
//! - Randomized delay between requests
//! - Relative URL resolution against the site root
//! - Detection of the site's anti-scraping page

mod gate;
mod proxy;
mod throttle;

pub use gate::{
    build_http_client, is_block_page, BlockDetected, FetchFailure, FetchedPage, GateError,
    RequestGate,
};
pub use proxy::ProxyRotation;
pub use throttle::Throttle;
