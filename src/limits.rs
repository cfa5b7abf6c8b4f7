//! Hard caps enforced on every mutation path. These are sanity bounds, not
//! tuning knobs: anything past them is a malformed or hostile request.

pub const MAX_UNITS: usize = 10_000;
pub const MAX_UNITS_PER_RESERVATION: usize = 12;
pub const MAX_CLAIMS_PER_UNIT: usize = 10_000;

pub const MAX_LABEL_LEN: usize = 120;
pub const MAX_NAME_LEN: usize = 120;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_NOTE_LEN: usize = 2_000;
pub const MAX_FEATURES_PER_UNIT: usize = 16;
pub const MAX_FEATURE_LEN: usize = 60;
pub const MAX_URL_LEN: usize = 500;
pub const MAX_DOCUMENT_REF_LEN: usize = 500;
pub const MAX_PAYMENT_TOKEN_LEN: usize = 200;

pub const MAX_SEARCH_LEN: usize = 120;
pub const MAX_PAGE_LIMIT: usize = 200;
pub const DEFAULT_PAGE_LIMIT: usize = 50;

/// Stored instants must fall between 2000-01-01 and 2100-01-01 UTC.
pub const MIN_VALID_TIMESTAMP_MS: i64 = 946_684_800_000;
pub const MAX_VALID_TIMESTAMP_MS: i64 = 4_102_444_800_000;
