use crate::config::ConfigError;

const YEN_PIP_MULTIPLIER: f64 = 1000.0;
const DEFAULT_PIP_MULTIPLIER: f64 = 10.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstrumentClass {
    Yen,
    Metal,
    Standard,
}

impl InstrumentClass {
    pub fn classify(instrument: &str) -> Result<Self, ConfigError> {
        let code = instrument.trim().to_ascii_uppercase();
        if code.is_empty() {
            return Err(ConfigError::EmptyInstrument);
        }
        if code.contains("JPY") {
            Ok(Self::Yen)
        } else if code.contains("XAU") || code.contains("XAG") {
            Ok(Self::Metal)
        } else {
            Ok(Self::Standard)
        }
    }

    /// Money per one whole price unit for one lot.
    ///
    /// Metals share the standard multiplier.
    pub fn multiplier(self) -> f64 {
        match self {
            Self::Yen => YEN_PIP_MULTIPLIER,
            Self::Metal | Self::Standard => DEFAULT_PIP_MULTIPLIER,
        }
    }
}

/// Monetary value of a one-unit price move for `lot_size` lots of `instrument`.
pub fn pip_value(instrument: &str, lot_size: f64) -> Result<f64, ConfigError> {
    Ok(InstrumentClass::classify(instrument)?.multiplier() * lot_size)
}
