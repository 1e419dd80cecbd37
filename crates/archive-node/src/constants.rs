pub(crate) const DEFAULT_LISTEN: &str = "127.0.0.1:8080";
pub(crate) const DEFAULT_DATA_DIR: &str = "./data";
pub(crate) const DEFAULT_CONSENSUS_URL: &str = "http://127.0.0.1:7070";
pub(crate) const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;
