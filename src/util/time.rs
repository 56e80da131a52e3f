//! Time helpers. The wire protocol and on-disk metadata both use
//! fractional-second Unix epoch timestamps (the original source calls
//! `time.time()`), so we standardize on `f64` seconds rather than
//! millisecond integers.
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as seconds since the Unix epoch, matching Python's
/// `time.time()` used throughout the original coordinator/block server.
pub fn now_epoch_secs() -> f64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("system clock is before the Unix epoch")
		.as_secs_f64()
}
