//! Supporting utilities: HTTP, rate limiting, title matching, browser
//! rendering.

mod browser;
mod http;
mod limiter;
mod matcher;

pub use browser::{BrowserError, BrowserRenderer};
pub use http::{HttpClient, HttpClientError, BROWSER_USER_AGENT};
pub use limiter::{LimiterPermit, SourceLimiter};
pub use matcher::{TitleMatcher, DEFAULT_THRESHOLD};
