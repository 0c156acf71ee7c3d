use std::fmt;

use crate::types::CacheBusterParam;

/// The version marker a cache entry was created with.
///
/// Numeric markers are ordered: a request with a larger number replaces the cached renderer,
/// while a smaller one reuses it. Opaque markers can only be equal or different.
#[derive(Debug, Clone)]
pub enum CacheBuster {
    Number(f64),
    Opaque(String),
}

impl CacheBuster {
    /// Derives the cache-buster for a request.
    ///
    /// A missing value counts as `0`, and numbers are capped to `now_millis` so that a request
    /// cannot pin an entry arbitrarily far into the future.
    pub fn from_param(param: Option<&CacheBusterParam>, now_millis: f64) -> Self {
        match param {
            None => Self::Number(0.0),
            // `f64::min` would turn `NaN` into `now_millis`
            Some(&CacheBusterParam::Number(value)) => {
                Self::Number(if value > now_millis { now_millis } else { value })
            }
            Some(CacheBusterParam::Text(value)) => Self::Opaque(value.clone()),
        }
    }

    /// Returns the numeric value of this marker, if it has one.
    ///
    /// Opaque markers are parsed from their leading numeric prefix, so `"12px"` reads as `12`
    /// and `"v12"` has no numeric value.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value).filter(|value| !value.is_nan()),
            Self::Opaque(value) => parse_float(value),
        }
    }

    /// Whether a request carrying `self` needs to replace an entry created with `current`.
    pub fn supersedes(&self, current: &CacheBuster) -> bool {
        match (self.as_number(), current.as_number()) {
            (Some(requested), Some(current)) => requested > current,
            _ => self != current,
        }
    }
}

/// Raw value equality: numbers never equal strings, and `NaN` never equals anything.
impl PartialEq for CacheBuster {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Opaque(a), Self::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for CacheBuster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Opaque(value) => f.write_str(value),
        }
    }
}

/// Parses the longest floating point prefix of `s`, after skipping leading whitespace.
///
/// This accepts an optional sign, digits with an optional fraction, an optional exponent, and
/// `Infinity`. Trailing garbage is ignored, and `None` is returned when no digits were found.
fn parse_float(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    if s[end..].starts_with("Infinity") {
        let negative = bytes.first() == Some(&b'-');
        return Some(if negative {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        });
    }

    let int_digits = count_digits(&bytes[end..]);
    end += int_digits;
    let mut frac_digits = 0;
    if bytes.get(end) == Some(&b'.') {
        frac_digits = count_digits(&bytes[end + 1..]);
        if int_digits > 0 || frac_digits > 0 {
            end += 1 + frac_digits;
        }
    }
    if int_digits == 0 && frac_digits == 0 {
        return None;
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = count_digits(&bytes[exp_end..]);
        if exp_digits > 0 {
            end = exp_end + exp_digits;
        }
    }

    s[..end].parse().ok()
}

fn count_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}
