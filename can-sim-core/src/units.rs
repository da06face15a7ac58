//! Unit conversion between native physical units and signal display units
//!
//! Native units are meters for distance, meters per hour for speed and
//! degrees Celsius for temperature. A signal's unit string selects the target.

const METERS_TO_MILES: f64 = 0.000621371;
const METERS_TO_KM: f64 = 0.001;
const MPH_TO_MPS: f64 = 0.000277778;

/// Physical unit carried by a signal's unit string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    None,
    Miles,
    Kilometers,
    KilometersPerHour,
    MilesPerHour,
    MetersPerSecond,
    Fahrenheit,
    Kelvin,
}

impl Unit {
    /// Map a DBC unit string onto a convertible unit; unknown units convert 1:1
    pub fn from_name(name: &str) -> Self {
        match name.trim() {
            "mi" => Unit::Miles,
            "km" => Unit::Kilometers,
            "km/h" => Unit::KilometersPerHour,
            "mi/h" | "mph" => Unit::MilesPerHour,
            "m/s" => Unit::MetersPerSecond,
            "F" => Unit::Fahrenheit,
            "K" => Unit::Kelvin,
            _ => Unit::None,
        }
    }

    /// Convert a value given in native units into this unit
    pub fn from_native(self, v: f64) -> f64 {
        match self {
            Unit::None => v,
            Unit::Miles => v * METERS_TO_MILES,
            Unit::Kilometers => v * METERS_TO_KM,
            Unit::KilometersPerHour => v * METERS_TO_KM,
            Unit::MilesPerHour => v * METERS_TO_MILES,
            Unit::MetersPerSecond => v * MPH_TO_MPS,
            Unit::Fahrenheit => v * 1.8 + 32.0,
            Unit::Kelvin => v + 273.15,
        }
    }

    /// Convert a value given in this unit back into native units
    pub fn to_native(self, v: f64) -> f64 {
        match self {
            Unit::None => v,
            Unit::Miles | Unit::MilesPerHour => v / METERS_TO_MILES,
            Unit::Kilometers | Unit::KilometersPerHour => v / METERS_TO_KM,
            Unit::MetersPerSecond => v / MPH_TO_MPS,
            Unit::Fahrenheit => (v - 32.0) / 1.8,
            Unit::Kelvin => v - 273.15,
        }
    }
}

/// Convert a native value for display in `unit`
pub fn convert_from_native(unit: &str, v: f64) -> f64 {
    Unit::from_name(unit).from_native(v)
}

/// Convert a value expressed in `unit` back to native units
pub fn convert_to_native(unit: &str, v: f64) -> f64 {
    Unit::from_name(unit).to_native(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_distance() {
        assert!(close(convert_from_native("km", 1500.0), 1.5));
        assert!(close(convert_from_native("mi", 1609.344), 1.0));
    }

    #[test]
    fn test_speed() {
        assert!(close(convert_from_native("km/h", 100_000.0), 100.0));
        assert!(close(convert_from_native("m/s", 3600.0), 1.0));
    }

    #[test]
    fn test_temperature() {
        assert!(close(convert_from_native("F", 100.0), 212.0));
        assert!(close(convert_from_native("K", 0.0), 273.15));
        assert!(close(convert_to_native("F", 32.0), 0.0));
    }

    #[test]
    fn test_unknown_unit_is_identity() {
        assert_eq!(convert_from_native("rpm", 123.0), 123.0);
        assert_eq!(convert_from_native("", -4.0), -4.0);
        assert_eq!(Unit::from_name("none"), Unit::None);
    }

    #[test]
    fn test_reverse_conversion() {
        for unit in ["mi", "km", "km/h", "mi/h", "m/s", "F", "K"] {
            let native = 1234.5;
            let back = convert_to_native(unit, convert_from_native(unit, native));
            assert!(close(back, native), "unit {}", unit);
        }
    }
}
