// used for date valued elements
use chrono::NaiveDate;

use lazy_static::lazy_static;
use regex::Regex;

// used to print out readable forms of a value
use std::fmt;
use std::str::FromStr;

lazy_static! {
    static ref NUMBER_FORM: Regex = Regex::new(r"^-?[0-9]+(\.[0-9]+)?$").unwrap();
    static ref DATE_FORM: Regex = Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").unwrap();
}

/// Marker token used by flat imports for tag-valued elements.
pub const TAG_MARK: &str = "TAG";

/// The value of a single named element in the repository.
///
/// The import layer hands the repository raw tokens; [`Value::sniff`] applies
/// the same simple classification it uses (numeric, date, tag, string).
/// `Undefined` stands for "currently has no value" and is what every absent
/// read resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Date(NaiveDate),
    Text(String),
    Tag,
    Undefined,
}

impl Value {
    /// Classifies a raw import token: numeric literal, ISO date, bare tag
    /// marker, anything else a string.
    pub fn sniff(token: &str) -> Value {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Value::Undefined;
        }
        if trimmed == TAG_MARK {
            return Value::Tag;
        }
        if NUMBER_FORM.is_match(trimmed) {
            if let Ok(number) = trimmed.parse::<f64>() {
                return Value::Number(number);
            }
        }
        if DATE_FORM.is_match(trimmed) {
            if let Ok(date) = NaiveDate::from_str(trimmed) {
                return Value::Date(date);
            }
        }
        Value::Text(trimmed.to_owned())
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self, Value::Undefined)
    }

    /// Truthiness as seen by conditions: undefined, zero, and the empty
    /// string are false; everything else is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined => false,
            Value::Number(number) => *number != 0.0,
            Value::Text(text) => !text.is_empty(),
            Value::Date(_) | Value::Tag => true,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(number) => Some(*number),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Number(number) => write!(f, "{}", number),
            Value::Date(date) => write!(f, "{}", date),
            Value::Text(text) => write!(f, "{}", text),
            Value::Tag => write!(f, "{}", TAG_MARK),
            Value::Undefined => write!(f, "?"),
        }
    }
}

/// A stored value together with its editability. Freshly computed expression
/// results are demoted to read-only; plain puts stay editable.
#[derive(Debug, Clone)]
pub struct Datum {
    value: Value,
    editable: bool,
}

impl Datum {
    pub fn new(value: Value) -> Self {
        Self { value, editable: true }
    }
    pub fn read_only(value: Value) -> Self {
        Self { value, editable: false }
    }
    pub fn value(&self) -> &Value {
        &self.value
    }
    pub fn editable(&self) -> bool {
        self.editable
    }
}
