//! Tagged electrical current quantities.
//!
//! Sweep parameters are entered in convenient units (µA for the range, nA for the
//! step) while instruments are always commanded in amps. Every conversion goes
//! through [`convert`], so a value never changes scale without its unit tag
//! changing with it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unit of an electrical current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrentUnit {
    /// A
    Ampere,
    /// mA
    Milliampere,
    /// µA
    Microampere,
    /// nA
    Nanoampere,
}

impl CurrentUnit {
    /// Size of one unit expressed in amps.
    pub const fn in_amps(self) -> f64 {
        match self {
            CurrentUnit::Ampere => 1.0,
            CurrentUnit::Milliampere => 1e-3,
            CurrentUnit::Microampere => 1e-6,
            CurrentUnit::Nanoampere => 1e-9,
        }
    }

    /// Conventional symbol.
    pub const fn symbol(self) -> &'static str {
        match self {
            CurrentUnit::Ampere => "A",
            CurrentUnit::Milliampere => "mA",
            CurrentUnit::Microampere => "µA",
            CurrentUnit::Nanoampere => "nA",
        }
    }
}

/// A current value tagged with its unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Current {
    value: f64,
    unit: CurrentUnit,
}

impl Current {
    /// Tag `value` with `unit`.
    pub const fn new(value: f64, unit: CurrentUnit) -> Self {
        Self { value, unit }
    }

    /// A current given in amps.
    pub const fn amps(value: f64) -> Self {
        Self::new(value, CurrentUnit::Ampere)
    }

    /// A current given in microamps.
    pub const fn microamps(value: f64) -> Self {
        Self::new(value, CurrentUnit::Microampere)
    }

    /// A current given in nanoamps.
    pub const fn nanoamps(value: f64) -> Self {
        Self::new(value, CurrentUnit::Nanoampere)
    }

    /// Numeric value in this quantity's own unit.
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Unit tag.
    pub const fn unit(&self) -> CurrentUnit {
        self.unit
    }

    /// Same quantity expressed in `unit`.
    pub fn to(self, unit: CurrentUnit) -> Current {
        convert(self, unit)
    }

    /// Numeric value in amps.
    pub fn as_amps(self) -> f64 {
        convert(self, CurrentUnit::Ampere).value
    }
}

impl fmt::Display for Current {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit.symbol())
    }
}

/// Convert `quantity` into `unit`.
///
/// Scales through the ratio of the two unit sizes, so converting between equal
/// units returns the value untouched.
pub fn convert(quantity: Current, unit: CurrentUnit) -> Current {
    if quantity.unit == unit {
        return quantity;
    }
    let from = quantity.unit.in_amps();
    let to = unit.in_amps();
    // Divide by the smaller factor's reciprocal to stay on exact powers of ten.
    let value = if from >= to {
        quantity.value * (from / to).round()
    } else {
        quantity.value / (to / from).round()
    };
    Current::new(value, unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12 * b.abs().max(1e-30)
    }

    #[test]
    fn test_sweep_parameter_units() {
        // Range is entered in µA, step in nA.
        assert!(close(Current::microamps(0.1).as_amps(), 1e-7));
        assert!(close(Current::nanoamps(10.0).as_amps(), 1e-8));
        assert!(close(Current::microamps(1.0).as_amps(), 1e-6));
    }

    #[test]
    fn test_convert_between_sub_units() {
        let step = convert(Current::nanoamps(10.0), CurrentUnit::Microampere);
        assert_eq!(step.unit(), CurrentUnit::Microampere);
        assert!(close(step.value(), 0.01));

        let range = convert(Current::microamps(0.1), CurrentUnit::Nanoampere);
        assert_eq!(range.value(), 100.0);
    }

    #[test]
    fn test_convert_same_unit_is_identity() {
        let q = Current::new(1.234, CurrentUnit::Milliampere);
        assert_eq!(convert(q, CurrentUnit::Milliampere), q);
    }

    #[test]
    fn test_round_trip() {
        let q = Current::amps(3.3e-5);
        let back = q.to(CurrentUnit::Nanoampere).to(CurrentUnit::Ampere);
        assert!(close(back.value(), 3.3e-5));
    }

    #[test]
    fn test_display() {
        assert_eq!(Current::nanoamps(10.0).to_string(), "10 nA");
    }
}
