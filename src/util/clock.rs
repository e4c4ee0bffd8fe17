//! Wall-clock helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch as a float, the timestamp format carried in
/// queue payloads.
pub fn epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_secs_is_recent() {
        // Anything after 2020 and not absurdly far in the future.
        let now = epoch_secs();
        assert!(now > 1_577_836_800.0);
        assert!(now < 4_102_444_800.0);
    }
}
