pub const MAX_RESOURCES: usize = 10_000;
pub const MAX_WINDOWS_PER_RESOURCE: usize = 48;
pub const MAX_INTERVALS_PER_RESOURCE: usize = 100_000;
pub const MAX_NAME_LEN: usize = 256;

/// Longest single reservation accepted, in hours (one week).
pub const MAX_RESERVATION_HOURS: i64 = 7 * 24;

/// Upper bound on one seeding run.
pub const MAX_SEED_COUNT: usize = 50_000;
/// Attempts allowed per requested seed reservation.
pub const SEED_ATTEMPTS_PER_RESERVATION: usize = 10;

/// Highest hourly price accepted. Keeps amounts and report sums far from
/// `Decimal`'s range.
pub const MAX_HOURLY_PRICE: i64 = 1_000_000_000;

/// A WAL frame announcing a larger payload is treated as corruption.
pub const MAX_WAL_RECORD_BYTES: usize = 1 << 20;

pub const MAX_MATCH_CAPACITY: u32 = 64;
pub const MAX_MATCHES_PER_RESOURCE: usize = 10_000;
pub const MAX_DESCRIPTION_LEN: usize = 2048;
