/// Envelope protocol version emitted by this client.
pub const PROTOCOL_VERSION: u32 = 1;
/// Number of one-time pre-keys generated per batch.
pub const PRE_KEY_BATCH_SIZE: u32 = 100;
/// Replenish one-time pre-keys when fewer than this many remain unconsumed.
pub const PRE_KEY_LOW_WATER_MARK: u32 = 20;
/// Devices inactive for longer than this are excluded from encryption fan-out.
pub const DEVICE_FRESHNESS_WINDOW_DAYS: i64 = 7;
/// Maximum size for a single message in bytes.
pub const MAX_MESSAGE_SIZE_BYTES: usize = 8 * 1024;
