//! Span settlement shared by every request pipeline.
//!
//! Handlers open a span, run their body as an inner async fn borrowing
//! `&mut Span`, then pass the span and the body's result to [`settle`].
//! The span is consumed, so it cannot be ended twice or leaked.

use chrono::{SecondsFormat, Utc};

use crate::observability::{Span, StatusCode};

/// Mark the span OK, or record the error and mark it ERROR; then end it.
/// The result is passed through unchanged.
pub fn settle<T, E>(mut span: Span, result: Result<T, E>) -> Result<T, E>
where
    E: std::error::Error,
{
    // The span is still open here, so recording cannot fail.
    match &result {
        Ok(_) => {
            let _ = span.set_status(StatusCode::Ok, None);
        }
        Err(e) => {
            let _ = span.record_exception(e);
            let _ = span.set_status(StatusCode::Error, Some(e.to_string()));
        }
    }
    span.end();
    result
}

/// Current UTC time as ISO-8601 with millisecond precision.
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
