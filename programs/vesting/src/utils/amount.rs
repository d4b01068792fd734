//! Exact decimal rendering of base-unit amounts for user-facing messages.

use crate::constants::MAX_COIN_POWER;

/// Render `value` base units as a decimal with `coin_power` implied places,
/// keeping at most `precision` fractional digits (truncating, never rounding).
///
/// Scales above 38 are clamped, since `10^39` does not fit in a `u128`.
pub fn format_amount(value: u128, coin_power: u32, precision: u32) -> String {
    let coin_power = coin_power.min(MAX_COIN_POWER);
    if coin_power == 0 {
        return value.to_string();
    }
    let scale = 10u128.pow(coin_power);
    let whole = value / scale;
    let frac = value % scale;

    let digits = precision.min(coin_power) as usize;
    if digits == 0 {
        return whole.to_string();
    }
    let frac = format!("{frac:0width$}", width = coin_power as usize);
    format!("{whole}.{}", &frac[..digits])
}
