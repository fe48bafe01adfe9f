//! Indicator output lookup.
//!
//! Upstream indicator computation exposes component values under several
//! naming conventions (`MACD_signal_line`, `MACD_Signal Line`, `MACD_Signal`,
//! bare `signal`, ...). Lookups walk a fixed fallback chain so a condition
//! resolves no matter which convention produced the columns.

use crate::market::indicators::IndicatorColumns;

/// Component aliases per indicator family, first entry canonical.
fn aliases(indicator: &str, component: &str) -> Option<&'static [&'static str]> {
    let component = component.trim().to_ascii_lowercase().replace([' ', '-'], "_");
    let family = indicator.to_ascii_uppercase();

    if family.starts_with("MACD") {
        return match component.as_str() {
            "macd_line" | "macd" | "line" | "value" => {
                Some(&["macd_line", "MACD", "MACD Line", "macd", "line"])
            }
            "signal_line" | "signal" => Some(&["signal_line", "Signal Line", "Signal", "signal"]),
            "histogram" | "hist" => Some(&["histogram", "Histogram", "hist", "Hist"]),
            _ => None,
        };
    }

    if family.starts_with("BB") || family.starts_with("BOLL") {
        return match component.as_str() {
            "upper" | "upper_band" => Some(&["upper", "Upper", "upper_band", "Upper Band"]),
            "middle" | "middle_band" | "basis" => {
                Some(&["middle", "Middle", "middle_band", "Middle Band", "basis"])
            }
            "lower" | "lower_band" => Some(&["lower", "Lower", "lower_band", "Lower Band"]),
            _ => None,
        };
    }

    if family.contains("MA") {
        return match component.as_str() {
            "fast" | "fast_ma" | "ma_fast" => Some(&["fast", "fast_ma", "Fast MA", "ma_fast"]),
            "slow" | "slow_ma" | "ma_slow" => Some(&["slow", "slow_ma", "Slow MA", "ma_slow"]),
            _ => None,
        };
    }

    None
}

/// Column names tried for (indicator, component), in order.
pub fn candidates(indicator: &str, component: &str) -> Vec<String> {
    let comps: Vec<&str> = match aliases(indicator, component) {
        Some(list) => std::iter::once(component).chain(list.iter().copied()).collect(),
        None => vec![component],
    };

    let mut out: Vec<String> = Vec::new();
    let mut push = |name: String| {
        if !name.is_empty() && !out.contains(&name) {
            out.push(name);
        }
    };
    for c in comps {
        push(format!("{indicator}_{c}"));
        push(format!("{indicator}_{}", c.to_lowercase()));
        push(c.to_string());
    }
    push(indicator.to_string());
    out
}

fn is_zero_line(indicator: &str, component: &str) -> bool {
    indicator.to_ascii_uppercase().starts_with("MACD")
        && matches!(
            component.trim().to_ascii_lowercase().replace(' ', "_").as_str(),
            "zero_line" | "zero"
        )
}

/// Resolve a component value, or `None` when no candidate column exists.
pub fn resolve(columns: &IndicatorColumns, indicator: &str, component: &str) -> Option<f64> {
    if let Some(v) = candidates(indicator, component)
        .iter()
        .find_map(|name| columns.get(name).copied())
    {
        return Some(v);
    }
    // MACD's zero line is a constant unless upstream provides one.
    is_zero_line(indicator, component).then_some(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(pairs: &[(&str, f64)]) -> IndicatorColumns {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_macd_signal_line_all_conventions() {
        for column in ["MACD_signal_line", "MACD_Signal Line", "MACD_Signal"] {
            let columns = cols(&[(column, 1.25), ("MACD_MACD", 9.0)]);
            assert_eq!(
                resolve(&columns, "MACD", "signal_line"),
                Some(1.25),
                "column {column}"
            );
        }
    }

    #[test]
    fn test_lowercase_component_fallback() {
        let columns = cols(&[("STOCH_k", 80.0)]);
        assert_eq!(resolve(&columns, "STOCH", "K"), Some(80.0));
    }

    #[test]
    fn test_bare_component_then_bare_indicator() {
        assert_eq!(resolve(&cols(&[("value", 3.0)]), "CCI", "value"), Some(3.0));
        assert_eq!(resolve(&cols(&[("RSI", 28.0)]), "RSI", "RSI"), Some(28.0));
        assert_eq!(resolve(&cols(&[("ATR", 2.0)]), "ATR", "value"), Some(2.0));
    }

    #[test]
    fn test_specific_name_wins_over_bare_indicator() {
        let columns = cols(&[("MACD", 5.0), ("MACD_Histogram", -1.0)]);
        assert_eq!(resolve(&columns, "MACD", "histogram"), Some(-1.0));
        assert_eq!(resolve(&columns, "MACD", "macd_line"), Some(5.0));
    }

    #[test]
    fn test_macd_zero_line_is_constant() {
        assert_eq!(resolve(&cols(&[]), "MACD", "zero_line"), Some(0.0));
    }

    #[test]
    fn test_ma_fast_slow_aliases() {
        let columns = cols(&[("fast_ma", 101.0), ("slow_ma", 99.0)]);
        assert_eq!(resolve(&columns, "MA_CROSS", "fast"), Some(101.0));
        assert_eq!(resolve(&columns, "MA_CROSS", "slow"), Some(99.0));
    }

    #[test]
    fn test_unresolvable() {
        assert_eq!(resolve(&cols(&[("EMA", 1.0)]), "RSI", "RSI"), None);
    }

    #[test]
    fn test_candidate_order() {
        let c = candidates("RSI", "Value");
        assert_eq!(c, vec!["RSI_Value", "RSI_value", "Value", "RSI"]);
    }
}
