use crate::model::Ms;

pub const MAX_SLOTS: usize = 10_000;
pub const MAX_SLOT_ID_LEN: usize = 64;
pub const MAX_CLUSTER_ID_LEN: usize = 64;

/// Cap on same-cluster alternates considered during backup selection.
pub const MAX_CLUSTER_ALTERNATES: usize = 50;

/// Hard cap on the configured backups limit.
pub const MAX_BACKUPS: usize = 16;

pub const MAX_LOOKUP_WINDOW_MS: Ms = 24 * 3_600_000;
pub const MAX_FORECAST_POINTS_PER_SLOT: usize = 4_096;

pub const MAX_OUTBOX_BATCH: usize = 1_000;

pub const MAX_BAY_LABEL_LEN: usize = 32;
pub const MAX_GRACE_MINUTES: i64 = 240;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
