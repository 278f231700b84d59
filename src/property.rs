//! Typed property values and the coercions between them.
//!
//! A `Property` is one named slot of a property set. Reading it as a
//! different type than it was written converts on the fly: numbers render
//! to strings (cached on first request), strings parse to numbers with C
//! `strtoll`/`atof` prefix rules, and everything but pointers reads as a
//! boolean. Pointer properties only ever read back as pointers.

use core::any::Any;
use core::fmt;
use std::sync::{Arc, OnceLock};

/// Shared handle stored by pointer properties.
pub type PointerData = Arc<dyn Any + Send + Sync>;

/// Run once with the stored pointer when a pointer property is released.
pub type Cleanup = Box<dyn FnOnce(PointerData) + Send>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PropertyType {
    Invalid,
    Pointer,
    String,
    Number,
    Float,
    Boolean,
}

impl PropertyType {
    pub fn name(self) -> &'static str {
        match self {
            PropertyType::Invalid => "invalid",
            PropertyType::Pointer => "pointer",
            PropertyType::String => "string",
            PropertyType::Number => "number",
            PropertyType::Float => "float",
            PropertyType::Boolean => "boolean",
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A pointer property's payload. If a cleanup was attached it runs exactly
/// once, when this value is dropped.
pub struct PointerValue {
    data: PointerData,
    cleanup: Option<Cleanup>,
}

impl PointerValue {
    pub fn new(data: PointerData) -> Self {
        Self {
            data,
            cleanup: None,
        }
    }

    pub fn with_cleanup<F>(data: PointerData, cleanup: F) -> Self
    where
        F: FnOnce(PointerData) + Send + 'static,
    {
        Self {
            data,
            cleanup: Some(Box::new(cleanup)),
        }
    }

    pub fn data(&self) -> &PointerData {
        &self.data
    }

    pub fn has_cleanup(&self) -> bool {
        self.cleanup.is_some()
    }
}

impl Drop for PointerValue {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup(Arc::clone(&self.data));
        }
    }
}

impl fmt::Debug for PointerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PointerValue")
            .field("data", &Arc::as_ptr(&self.data))
            .field("cleanup", &self.cleanup.is_some())
            .finish()
    }
}

#[derive(Debug)]
pub enum PropertyValue {
    Pointer(PointerValue),
    String(Arc<str>),
    Number(i64),
    Float(f32),
    Boolean(bool),
}

impl PropertyValue {
    pub fn property_type(&self) -> PropertyType {
        match self {
            PropertyValue::Pointer(_) => PropertyType::Pointer,
            PropertyValue::String(_) => PropertyType::String,
            PropertyValue::Number(_) => PropertyType::Number,
            PropertyValue::Float(_) => PropertyType::Float,
            PropertyValue::Boolean(_) => PropertyType::Boolean,
        }
    }
}

#[derive(Debug)]
pub struct Property {
    value: PropertyValue,
    string_storage: OnceLock<Arc<str>>,
}

impl Property {
    pub fn new(value: PropertyValue) -> Self {
        Self {
            value,
            string_storage: OnceLock::new(),
        }
    }

    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    pub fn into_value(self) -> PropertyValue {
        self.value
    }

    pub fn property_type(&self) -> PropertyType {
        self.value.property_type()
    }

    pub fn as_pointer(&self) -> Option<&PointerData> {
        match &self.value {
            PropertyValue::Pointer(p) => Some(p.data()),
            _ => None,
        }
    }

    /// String form of the value. Numbers and floats are rendered once and
    /// the text is reused on later calls.
    pub fn to_str(&self) -> Option<Arc<str>> {
        match &self.value {
            PropertyValue::Pointer(_) => None,
            PropertyValue::String(s) => Some(Arc::clone(s)),
            PropertyValue::Number(n) => Some(Arc::clone(
                self.string_storage.get_or_init(|| Arc::from(n.to_string())),
            )),
            PropertyValue::Float(f) => Some(Arc::clone(
                self.string_storage.get_or_init(|| Arc::from(format_float(*f))),
            )),
            PropertyValue::Boolean(b) => Some(Arc::from(if *b { "true" } else { "false" })),
        }
    }

    pub fn to_number(&self) -> Option<i64> {
        match &self.value {
            PropertyValue::Pointer(_) => None,
            PropertyValue::String(s) => Some(parse_integer(s)),
            PropertyValue::Number(n) => Some(*n),
            PropertyValue::Float(f) => Some(f64::from(*f).round() as i64),
            PropertyValue::Boolean(b) => Some(i64::from(*b)),
        }
    }

    pub fn to_float(&self) -> Option<f32> {
        match &self.value {
            PropertyValue::Pointer(_) => None,
            PropertyValue::String(s) => Some(parse_float(s) as f32),
            PropertyValue::Number(n) => Some(*n as f32),
            PropertyValue::Float(f) => Some(*f),
            PropertyValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
        }
    }

    /// `default` is only consulted for an empty string.
    pub fn to_boolean(&self, default: bool) -> Option<bool> {
        match &self.value {
            PropertyValue::Pointer(_) => None,
            PropertyValue::String(s) => Some(string_boolean(s, default)),
            PropertyValue::Number(n) => Some(*n != 0),
            PropertyValue::Float(f) => Some(*f != 0.0),
            PropertyValue::Boolean(b) => Some(*b),
        }
    }

    /// Independent copy for another set. Pointers carrying a cleanup are
    /// owned by exactly one set and cannot be copied.
    pub fn try_clone(&self) -> Option<Property> {
        let value = match &self.value {
            PropertyValue::Pointer(p) if p.has_cleanup() => return None,
            PropertyValue::Pointer(p) => PropertyValue::Pointer(PointerValue::new(Arc::clone(p.data()))),
            PropertyValue::String(s) => PropertyValue::String(Arc::clone(s)),
            PropertyValue::Number(n) => PropertyValue::Number(*n),
            PropertyValue::Float(f) => PropertyValue::Float(*f),
            PropertyValue::Boolean(b) => PropertyValue::Boolean(*b),
        };
        Some(Property::new(value))
    }

    /// Human-readable rendering used when dumping a set.
    pub fn describe(&self) -> String {
        match &self.value {
            PropertyValue::Pointer(p) => format!("{:p}", Arc::as_ptr(p.data())),
            PropertyValue::String(s) => format!("\"{s}\""),
            PropertyValue::Number(n) => n.to_string(),
            PropertyValue::Float(f) => format_float(*f),
            PropertyValue::Boolean(b) => b.to_string(),
        }
    }
}

impl From<PropertyValue> for Property {
    fn from(value: PropertyValue) -> Self {
        Property::new(value)
    }
}

/// `%f` rendering: six fractional digits.
fn format_float(f: f32) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    format!("{:.6}", f64::from(f))
}

fn skip_space(s: &str) -> &str {
    s.trim_start_matches(|c: char| matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0b' | '\x0c'))
}

/// Integer prefix of `s` with base auto-detection: `0x` hex, leading `0`
/// octal, otherwise decimal. Stops at the first invalid digit, yields 0 when
/// there are no digits and saturates on overflow.
pub fn parse_integer(s: &str) -> i64 {
    let s = skip_space(s);
    let (negative, s) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let bytes = s.as_bytes();
    let (radix, digits) = match bytes {
        [b'0', b'x' | b'X', d, ..] if d.is_ascii_hexdigit() => (16, &bytes[2..]),
        [b'0', ..] => (8, bytes),
        _ => (10, bytes),
    };

    let mut magnitude: u64 = 0;
    let mut overflow = false;
    for &b in digits {
        let d = match (b as char).to_digit(radix) {
            Some(d) => u64::from(d),
            None => break,
        };
        match magnitude
            .checked_mul(u64::from(radix))
            .and_then(|m| m.checked_add(d))
        {
            Some(m) => magnitude = m,
            None => overflow = true,
        }
    }

    if negative {
        if overflow || magnitude > i64::MIN.unsigned_abs() {
            i64::MIN
        } else {
            (magnitude as i64).wrapping_neg()
        }
    } else if overflow || magnitude > i64::MAX as u64 {
        i64::MAX
    } else {
        magnitude as i64
    }
}

/// Floating-point prefix of `s`, 0.0 when nothing parses. Accepts decimal
/// and `0x` hexadecimal forms with an optional exponent.
pub fn parse_float(s: &str) -> f64 {
    let s = skip_space(s);
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }

    let rest = &s[end..];
    for word in ["infinity", "inf", "nan"] {
        if rest.get(..word.len()).is_some_and(|w| w.eq_ignore_ascii_case(word)) {
            return s[..end + word.len()].parse().unwrap_or(0.0);
        }
    }

    if let Some(value) = parse_hex_float(&bytes[end..]) {
        return if bytes.first() == Some(&b'-') { -value } else { value };
    }

    let digits_from = |mut i: usize| {
        while bytes.get(i).is_some_and(u8::is_ascii_digit) {
            i += 1;
        }
        i
    };
    let int_end = digits_from(end);
    let mut mantissa_end = int_end;
    if bytes.get(int_end) == Some(&b'.') {
        mantissa_end = digits_from(int_end + 1);
    }
    // A lone "." or sign is not a number.
    if mantissa_end == end || (int_end == end && mantissa_end == int_end + 1) {
        return 0.0;
    }
    end = mantissa_end;

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let exp_end = digits_from(exp);
        if exp_end > exp {
            end = exp_end;
        }
    }

    s[..end].parse().unwrap_or(0.0)
}

/// `0x<hex>[.<hex>][p<exp>]` prefix of `bytes`.
/// `None` unless at least one hex digit follows the prefix.
fn parse_hex_float(bytes: &[u8]) -> Option<f64> {
    let [b'0', b'x' | b'X', ..] = bytes else {
        return None;
    };
    let hex_at = |i: usize| bytes.get(i).and_then(|&b| (b as char).to_digit(16));

    let mut i = 2;
    let mut mantissa = 0.0f64;
    let mut exponent: i32 = 0;
    let mut any_digit = false;
    while let Some(d) = hex_at(i) {
        mantissa = mantissa * 16.0 + f64::from(d);
        any_digit = true;
        i += 1;
    }
    if bytes.get(i) == Some(&b'.') {
        let mut j = i + 1;
        while let Some(d) = hex_at(j) {
            mantissa = mantissa * 16.0 + f64::from(d);
            exponent = exponent.saturating_sub(4);
            any_digit = true;
            j += 1;
        }
        if any_digit {
            i = j;
        }
    }
    if !any_digit {
        return None;
    }

    if matches!(bytes.get(i), Some(b'p' | b'P')) {
        let mut j = i + 1;
        let negative = bytes.get(j) == Some(&b'-');
        if matches!(bytes.get(j), Some(b'+' | b'-')) {
            j += 1;
        }
        let start = j;
        let mut power: i32 = 0;
        while let Some(d) = bytes.get(j).filter(|b| b.is_ascii_digit()) {
            power = power.saturating_mul(10).saturating_add(i32::from(d - b'0'));
            j += 1;
        }
        if j > start {
            let power = if negative { -power } else { power };
            exponent = exponent.saturating_add(power);
            i = j;
        }
    }

    Some(mantissa * 2f64.powi(exponent))
}

/// Empty → `default`; leading `0` or `false` (any case) → false; anything
/// else → true.
pub fn string_boolean(s: &str, default: bool) -> bool {
    if s.is_empty() {
        return default;
    }
    !(s.starts_with('0') || s.eq_ignore_ascii_case("false"))
}
