// =============================================================================
// Price Converter — USD stop distance -> absolute price level
// =============================================================================
//
// Production policy is never to guess a pip value: if the symbol info does
// not carry one and the symbol is not in the static fallback table, the
// conversion fails loudly rather than silently defaulting.
// =============================================================================

use crate::error::ConverterError;

/// Static fallback table of well-known majors' pip value per standard lot,
/// consulted only when the broker's symbol info does not carry one.
fn fallback_pip_value(symbol: &str) -> Option<f64> {
    match symbol {
        "EURUSD" | "GBPUSD" | "AUDUSD" | "NZDUSD" => Some(10.0),
        "USDJPY" | "USDCHF" | "USDCAD" => Some(10.0),
        _ => None,
    }
}

fn is_jpy_pair(symbol: &str) -> bool {
    symbol.ends_with("JPY")
}

/// `digits` as read from symbol info, when present.
#[derive(Debug, Clone, Copy)]
pub struct SymbolPricing {
    pub pip_value_per_lot: Option<f64>,
    pub digits: Option<u32>,
}

/// Result of converting a USD stop/target distance to absolute prices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopTarget {
    pub sl_price: Option<f64>,
    pub tp_price: Option<f64>,
}

/// Convert USD-denominated SL/TP distances into absolute price levels for
/// an order of `direction` (+1 long, -1 short) at `entry_price` with
/// `volume` lots. A distance of 0 means "not set" and produces `None`.
pub fn convert(
    symbol: &str,
    entry_price: f64,
    direction: i8,
    volume: f64,
    sl_usd: f64,
    tp_usd: f64,
    pricing: SymbolPricing,
) -> Result<StopTarget, ConverterError> {
    let pip_value_per_lot = pricing
        .pip_value_per_lot
        .or_else(|| fallback_pip_value(symbol))
        .ok_or_else(|| ConverterError::UnknownPipValue(symbol.to_string()))?;

    let digits = pricing.digits.unwrap_or(if is_jpy_pair(symbol) { 3 } else { 5 });
    let pip_size = if is_jpy_pair(symbol) { 0.01 } else { 0.0001 };

    let sl_price = usd_to_price(sl_usd, entry_price, direction, -1, volume, pip_value_per_lot, pip_size, digits);
    let tp_price = usd_to_price(tp_usd, entry_price, direction, 1, volume, pip_value_per_lot, pip_size, digits);

    Ok(StopTarget { sl_price, tp_price })
}

/// `side_sign` is -1 for the stop-loss direction (against the position),
/// +1 for the take-profit direction (in favor of the position).
fn usd_to_price(
    usd: f64,
    entry_price: f64,
    direction: i8,
    side_sign: i8,
    volume: f64,
    pip_value_per_lot: f64,
    pip_size: f64,
    digits: u32,
) -> Option<f64> {
    if usd == 0.0 {
        return None;
    }
    let distance_pips = usd / (pip_value_per_lot * volume);
    let offset = distance_pips * pip_size * direction as f64 * side_sign as f64;
    let raw = entry_price + offset;
    let factor = 10f64.powi(digits as i32);
    Some((raw * factor).round() / factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pricing(pip_value: Option<f64>, digits: Option<u32>) -> SymbolPricing {
        SymbolPricing { pip_value_per_lot: pip_value, digits }
    }

    #[test]
    fn zero_usd_produces_no_stop_or_target() {
        let result = convert("EURUSD", 1.1000, 1, 1.0, 0.0, 0.0, pricing(Some(10.0), Some(5))).unwrap();
        assert_eq!(result, StopTarget { sl_price: None, tp_price: None });
    }

    #[test]
    fn long_sl_is_below_entry_tp_is_above() {
        let result = convert("EURUSD", 1.1000, 1, 1.0, 50.0, 100.0, pricing(Some(10.0), Some(5))).unwrap();
        assert!(result.sl_price.unwrap() < 1.1000);
        assert!(result.tp_price.unwrap() > 1.1000);
    }

    #[test]
    fn short_sl_is_above_entry_tp_is_below() {
        let result = convert("EURUSD", 1.1000, -1, 1.0, 50.0, 100.0, pricing(Some(10.0), Some(5))).unwrap();
        assert!(result.sl_price.unwrap() > 1.1000);
        assert!(result.tp_price.unwrap() < 1.1000);
    }

    #[test]
    fn jpy_pair_uses_3_digit_precision() {
        let result = convert("USDJPY", 150.000, 1, 1.0, 50.0, 0.0, pricing(Some(10.0), None)).unwrap();
        let sl = result.sl_price.unwrap();
        let scaled = sl * 1000.0;
        assert!((scaled - scaled.round()).abs() < 1e-6);
    }

    #[test]
    fn standard_pair_uses_5_digit_precision() {
        let result = convert("EURUSD", 1.10000, 1, 1.0, 50.0, 0.0, pricing(Some(10.0), None)).unwrap();
        let sl = result.sl_price.unwrap();
        let scaled = sl * 100_000.0;
        assert!((scaled - scaled.round()).abs() < 1e-6);
    }

    #[test]
    fn missing_pip_value_falls_back_to_static_table() {
        let result = convert("EURUSD", 1.1000, 1, 1.0, 50.0, 0.0, pricing(None, Some(5)));
        assert!(result.is_ok());
    }

    #[test]
    fn unknown_symbol_with_no_pip_value_fails_loudly() {
        let result = convert("XAGZZZ", 1.1000, 1, 1.0, 50.0, 0.0, pricing(None, Some(5)));
        assert_eq!(result.unwrap_err(), ConverterError::UnknownPipValue("XAGZZZ".to_string()));
    }

    #[test]
    fn larger_volume_reduces_pip_distance() {
        let small = convert("EURUSD", 1.1000, 1, 1.0, 100.0, 0.0, pricing(Some(10.0), Some(5))).unwrap();
        let large = convert("EURUSD", 1.1000, 1, 2.0, 100.0, 0.0, pricing(Some(10.0), Some(5))).unwrap();
        let small_distance = (1.1000 - small.sl_price.unwrap()).abs();
        let large_distance = (1.1000 - large.sl_price.unwrap()).abs();
        assert!(large_distance < small_distance);
    }
}
