pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const SNAPSHOT_KEY: &str = "main";
pub const DEFAULT_SEAL_INTERVAL_SECS: u64 = 10 * 60;
pub const DEFAULT_ACK_COUNT: u32 = 2;
pub const DEFAULT_CONSENSUS_COUNT: u32 = 2;
