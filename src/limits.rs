/// Max length of a tenant name (database name on the wire).
pub const MAX_TENANT_NAME_LEN: usize = 64;

/// Max number of tenants loaded at once.
pub const MAX_TENANTS: usize = 1024;

/// Max length of resource, service, and client names.
pub const MAX_NAME_LEN: usize = 256;

/// Max length of a client email address.
pub const MAX_EMAIL_LEN: usize = 320;

/// Max length of a client phone number.
pub const MAX_PHONE_LEN: usize = 32;

/// Max service duration in minutes (one full day).
pub const MAX_SERVICE_DURATION_MIN: u32 = 1440;

/// Granularity bounds for slot generation, in minutes.
pub const MIN_GRANULARITY_MIN: u32 = 1;
pub const MAX_GRANULARITY_MIN: u32 = 720;

/// Max appointments stored for one resource on one date.
pub const MAX_APPOINTMENTS_PER_DAY: usize = 1440;

/// Max encoded size of one WAL record. A longer length prefix is treated as
/// a torn tail.
pub const MAX_WAL_RECORD_BYTES: usize = 1 << 20;
