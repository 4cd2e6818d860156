//! Parsing of Kubernetes resource quantity strings (`500m`, `128Mi`, `1.5`, `2e3`)

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid quantity {0:?}")]
pub struct QuantityError(pub String);

/// A parsed resource quantity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity(f64);

impl Quantity {
    pub fn parse(raw: &str) -> Result<Self, QuantityError> {
        let s = raw.trim();
        let invalid = || QuantityError(raw.to_string());

        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
            .unwrap_or(s.len());
        let (number, suffix) = s.split_at(split);
        if number.is_empty() {
            return Err(invalid());
        }
        let base: f64 = number.parse().map_err(|_| invalid())?;

        let multiplier = match suffix {
            "" => 1.0,
            "n" => 1e-9,
            "u" => 1e-6,
            "m" => 1e-3,
            "k" => 1e3,
            "M" => 1e6,
            "G" => 1e9,
            "T" => 1e12,
            "P" => 1e15,
            "E" => 1e18,
            "Ki" => 1024f64,
            "Mi" => 1024f64.powi(2),
            "Gi" => 1024f64.powi(3),
            "Ti" => 1024f64.powi(4),
            "Pi" => 1024f64.powi(5),
            "Ei" => 1024f64.powi(6),
            exp if exp.starts_with('e') || exp.starts_with('E') => {
                let exponent: i32 = exp[1..].parse().map_err(|_| invalid())?;
                10f64.powi(exponent)
            }
            _ => return Err(invalid()),
        };

        Ok(Quantity(base * multiplier))
    }

    /// Whole units, rounded up
    pub fn value(&self) -> i64 {
        round_up(self.0)
    }

    /// Thousandths of a unit, rounded up
    pub fn milli_value(&self) -> i64 {
        round_up(self.0 * 1000.0)
    }
}

// Multiplying by a power of ten leaves float noise (0.1 * 1000 = 100.00000000000001);
// anything that close to an integer is that integer.
fn round_up(value: f64) -> i64 {
    let nearest = value.round();
    if (value - nearest).abs() < 1e-9 {
        nearest as i64
    } else {
        value.ceil() as i64
    }
}
