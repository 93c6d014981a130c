use chrono::{DateTime, Duration, Utc};

/// Returns `next` moved past `previous` so update timestamps never repeat or go back.
pub(crate) fn strictly_after(
    previous: Option<DateTime<Utc>>,
    next: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (previous, next) {
        (Some(previous), Some(next)) if next <= previous => {
            Some(previous + Duration::microseconds(1))
        }
        (_, next) => next,
    }
}
