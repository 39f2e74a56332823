use std::sync::Arc;

use thiserror::Error;

use crate::currency::rates::RateSource;

/// Trade-site currency codes priced at 1:1.
const CHAOS_ALIASES: &[&str] = &["chaos", "chaos orb", "c"];

/// Trade-site currency code → display name used by the rate source.
const CURRENCY_ALIASES: &[(&str, &str)] = &[
    ("divine", "Divine Orb"),
    ("div", "Divine Orb"),
    ("divine orb", "Divine Orb"),
    ("exalted", "Exalted Orb"),
    ("exa", "Exalted Orb"),
    ("ex", "Exalted Orb"),
    ("exalted orb", "Exalted Orb"),
    ("mirror", "Mirror of Kalandra"),
    ("alch", "Orb of Alchemy"),
    ("alchemy", "Orb of Alchemy"),
    ("alt", "Orb of Alteration"),
    ("alteration", "Orb of Alteration"),
    ("aug", "Orb of Augmentation"),
    ("transmute", "Orb of Transmutation"),
    ("chrome", "Chromatic Orb"),
    ("fusing", "Orb of Fusing"),
    ("fuse", "Orb of Fusing"),
    ("jewellers", "Jeweller's Orb"),
    ("chance", "Orb of Chance"),
    ("regal", "Regal Orb"),
    ("vaal", "Vaal Orb"),
    ("gcp", "Gemcutter's Prism"),
    ("annul", "Orb of Annulment"),
    ("scour", "Orb of Scouring"),
    ("regret", "Orb of Regret"),
    ("blessed", "Blessed Orb"),
    ("chisel", "Cartographer's Chisel"),
];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    #[error("unknown currency '{0}'")]
    UnknownCurrency(String),

    #[error("no exchange rate for '{0}'")]
    MissingRate(String),

    #[error("non-positive exchange rate {rate} for '{name}'")]
    NonPositiveRate { name: String, rate: f64 },
}

/// Resolve a trade-site currency code to the rate source's display name.
/// None for the canonical currency and for anything unrecognized.
pub fn display_name(currency: &str) -> Option<&'static str> {
    let key = currency.trim().to_ascii_lowercase();
    CURRENCY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, name)| *name)
}

pub fn is_chaos(currency: &str) -> bool {
    let key = currency.trim().to_ascii_lowercase();
    CHAOS_ALIASES.contains(&key.as_str())
}

/// Converts listing prices into chaos.
pub struct CurrencyConverter {
    rates: Arc<dyn RateSource>,
}

impl CurrencyConverter {
    pub fn new(rates: Arc<dyn RateSource>) -> Self {
        Self { rates }
    }

    pub fn convert(&self, amount: f64, currency: &str) -> Result<f64, ConversionError> {
        if is_chaos(currency) {
            return Ok(amount);
        }

        let name = display_name(currency)
            .ok_or_else(|| ConversionError::UnknownCurrency(currency.to_string()))?;
        let rate = self
            .rates
            .rate(name)
            .ok_or_else(|| ConversionError::MissingRate(name.to_string()))?;
        if rate.is_nan() || rate <= 0.0 {
            return Err(ConversionError::NonPositiveRate { name: name.to_string(), rate });
        }
        Ok(amount * rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::rates::CachedRateSource;

    fn converter(rates: &[(&str, f64)]) -> CurrencyConverter {
        let source = CachedRateSource::new();
        for (name, rate) in rates {
            source.set(name, *rate);
        }
        CurrencyConverter::new(Arc::new(source))
    }

    #[test]
    fn chaos_is_identity() {
        let c = converter(&[]);
        assert_eq!(c.convert(12.0, "chaos"), Ok(12.0));
        assert_eq!(c.convert(3.5, " Chaos Orb "), Ok(3.5));
    }

    #[test]
    fn aliases_resolve_through_rate_source() {
        let c = converter(&[("Divine Orb", 150.0)]);
        assert_eq!(c.convert(2.0, "divine"), Ok(300.0));
        assert_eq!(c.convert(1.0, "DIV"), Ok(150.0));
    }

    #[test]
    fn missing_rate_fails() {
        let c = converter(&[]);
        assert_eq!(
            c.convert(1.0, "exalted"),
            Err(ConversionError::MissingRate("Exalted Orb".to_string()))
        );
    }

    #[test]
    fn non_positive_rate_fails() {
        let c = converter(&[("Divine Orb", 0.0)]);
        assert!(matches!(c.convert(1.0, "divine"), Err(ConversionError::NonPositiveRate { .. })));
        let c = converter(&[("Divine Orb", f64::NAN)]);
        assert!(c.convert(1.0, "divine").is_err());
    }

    #[test]
    fn unknown_currency_fails_closed() {
        let c = converter(&[("Divine Orb", 150.0)]);
        assert_eq!(
            c.convert(1.0, "shiny-pebble"),
            Err(ConversionError::UnknownCurrency("shiny-pebble".to_string()))
        );
    }
}
