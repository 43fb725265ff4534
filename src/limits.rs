//! Hard ceilings guarding the store and query paths.

use crate::model::Ms;

/// Timestamps must fall in [2000-01-01, 2100-01-01) UTC.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// No single booking may span more than a week.
pub const MAX_SPAN_DURATION_MS: Ms = 7 * 86_400_000;

pub const MAX_BOOKINGS_PER_BUSINESS: usize = 100_000;

pub const MAX_RULES_PER_DAY: usize = 48;

pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// Cap on slots returned by a single availability query.
pub const MAX_SLOTS_PER_QUERY: usize = 2048;

pub const MIN_GRANULARITY_MIN: u32 = 1;
