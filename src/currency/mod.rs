pub mod converter;
pub mod rates;

pub use converter::{ConversionError, CurrencyConverter};
pub use rates::{CachedRateSource, RateRefresher, RateSource};
