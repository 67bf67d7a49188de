// Cents distance between two frequencies
// 1200 cents = one octave

/// Signed log-frequency distance, or `Undefined` when it cannot be computed.
///
/// Callers must branch on `Undefined` explicitly; it is neither "no change"
/// nor "large change".
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cents {
    Defined(f64),
    Undefined,
}

impl Cents {
    /// The numeric distance, if defined
    pub fn value(self) -> Option<f64> {
        match self {
            Cents::Defined(c) => Some(c),
            Cents::Undefined => None,
        }
    }

    pub fn is_defined(self) -> bool {
        matches!(self, Cents::Defined(_))
    }
}

/// `1200 * log2(f2 / f1)`, undefined if either input is non-positive or not finite
pub fn cents_distance(f1: f64, f2: f64) -> Cents {
    let usable = |f: f64| f.is_finite() && f > 0.0;

    if !usable(f1) || !usable(f2) {
        return Cents::Undefined;
    }

    Cents::Defined(1200.0 * (f2 / f1).log2())
}
