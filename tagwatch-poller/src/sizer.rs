//! Partition sizing: how many items one account may commit per cycle.

use tagwatch_core::Account;

/// The account's own ceiling when set and non-zero, else `default`.
pub fn upper_threshold(account: &Account, default: u32) -> u32 {
    match account.item_upper_threshold {
        Some(threshold) if threshold > 0 => threshold,
        _ => default,
    }
}
