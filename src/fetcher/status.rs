//! HTTP status policy
//!
//! Maps a response status to what the fetcher does next. The order of the
//! checks matters: a 400 from a quota-limited host is terminal even though
//! 400 is otherwise retried.

/// What a response status means for the current fetch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusClass {
    /// 200: record success, return the body
    Success,
    /// 404: absent, no retry
    NotFound,
    /// 403: absent, no retry
    Forbidden,
    /// 400 from a quota-limited host: absent, no retry
    QuotaExceeded,
    /// 400, 429, 500: retry with backoff
    Transient,
    /// Anything else: absent, no retry
    Unexpected,
}

/// Classify `status` for a request to a host that is (or is not) quota-limited
pub fn classify(status: u16, quota_limited_host: bool) -> StatusClass {
    match status {
        200 => StatusClass::Success,
        404 => StatusClass::NotFound,
        403 => StatusClass::Forbidden,
        400 if quota_limited_host => StatusClass::QuotaExceeded,
        400 | 429 | 500 => StatusClass::Transient,
        _ => StatusClass::Unexpected,
    }
}
