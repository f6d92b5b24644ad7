use super::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
};

/// An attribute value as seen by the query engine.
///
/// `Timestamp` only exists on the entity side. Operations implementations encode it (and `Bool`)
/// according to the configured [`crate::MarshallingMode`] before anything is stored or compared.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    /// Numbers are kept in their decimal string form, as DynamoDB does.
    N(String),
    S(String),
    B(Vec<u8>),
    Timestamp(DateTime<Utc>),
    L(Vec<Value>),
    M(BTreeMap<String, Value>),
}

pub type Item = HashMap<String, Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::S(s) => Some(s),
            _ => None,
        }
    }

    /// Compares two values the way DynamoDB orders them: numerically for numbers, lexically for
    /// strings and bytes. Values of different types are unordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::N(a), Self::N(b)) => Some(Decimal::parse(a)?.cmp(&Decimal::parse(b)?)),
            (Self::S(a), Self::S(b)) => Some(a.cmp(b)),
            (Self::B(a), Self::B(b)) => Some(a.cmp(b)),
            (Self::Timestamp(a), Self::Timestamp(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) if a == b => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// Equality with numeric normalization, so `1` and `1.0` are the same number.
    pub fn matches(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::N(_), Self::N(_)) => self.compare(other) == Some(Ordering::Equal),
            (Self::L(a), Self::L(b)) => a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.matches(b)),
            _ => self == other,
        }
    }

    /// A stable textual form used to key items by their primary key.
    pub fn key_string(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Bool(b) => format!("BOOL:{}", b),
            Self::N(n) => format!("N:{}", Decimal::parse(n).map(|d| d.to_string()).unwrap_or_else(|| n.clone())),
            Self::S(s) => format!("S:{}", s),
            Self::B(b) => format!("B:{:?}", b),
            Self::Timestamp(t) => format!("T:{}", t.timestamp_millis()),
            Self::L(l) => format!("L:[{}]", l.iter().map(|v| v.key_string()).collect::<Vec<_>>().join(",")),
            Self::M(m) => format!(
                "M:{{{}}}",
                m.iter().map(|(k, v)| format!("{}={}", k, v.key_string())).collect::<Vec<_>>().join(",")
            ),
        }
    }
}

/// An exact decimal, `0.digits × 10^exponent`. DynamoDB numbers carry up to 38 significant digits,
/// which is more than a float holds.
#[derive(Debug, PartialEq, Eq)]
struct Decimal {
    negative: bool,
    /// Significant digits without leading or trailing zeros. Empty for zero.
    digits: String,
    exponent: i64,
}

impl Decimal {
    fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (negative, s) = match s.as_bytes().first()? {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };
        let (mantissa, exp) = match s.find(|c: char| c == 'e' || c == 'E') {
            Some(i) => (&s[..i], s[i + 1..].parse::<i64>().ok()?),
            None => (s, 0),
        };
        let (int, frac) = mantissa.split_once('.').unwrap_or((mantissa, ""));
        if int.is_empty() && frac.is_empty() {
            return None;
        }
        if !int.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }
        let all = format!("{}{}", int, frac);
        let leading = all.len() - all.trim_start_matches('0').len();
        let digits = all.trim_matches('0').to_string();
        if digits.is_empty() {
            return Some(Self {
                negative: false,
                digits,
                exponent: 0,
            });
        }
        Some(Self {
            negative,
            digits,
            exponent: int.len() as i64 - leading as i64 + exp,
        })
    }

    fn signum(&self) -> i8 {
        match (self.digits.is_empty(), self.negative) {
            (true, _) => 0,
            (false, true) => -1,
            (false, false) => 1,
        }
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_sign = self.signum().cmp(&other.signum());
        if by_sign != Ordering::Equal || self.signum() == 0 {
            return by_sign;
        }
        let magnitude = self.exponent.cmp(&other.exponent).then_with(|| self.digits.cmp(&other.digits));
        if self.negative {
            magnitude.reverse()
        } else {
            magnitude
        }
    }
}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for Decimal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.digits.is_empty() {
            return write!(f, "0");
        }
        write!(f, "{}0.{}e{}", if self.negative { "-" } else { "" }, self.digits, self.exponent)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::S(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::S(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Self::S(v.clone())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::B(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::L(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

macro_rules! number_conversions {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Self::N(v.to_string())
                }
            }

            impl FromValue for $t {
                fn from_value(v: &Value) -> Result<Self> {
                    match v {
                        Value::N(n) => n.parse().map_err(|_| Error::Mapping(format!("{} is not a valid {}", n, stringify!($t)))),
                        other => Err(Error::Mapping(format!("expected a number, found {:?}", other))),
                    }
                }
            }
        )*
    };
}

/// Conversion from a stored attribute value into a field value.
///
/// Conversions accept both encodings produced by [`crate::MarshallingMode`], so entities don't need
/// to know which mode wrote an item.
pub trait FromValue: Sized {
    fn from_value(v: &Value) -> Result<Self>;

    /// Called when the attribute is absent from the item.
    fn missing(name: &str) -> Result<Self> {
        Err(Error::Mapping(format!("missing attribute {}", name)))
    }
}

number_conversions!(i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64);

impl FromValue for String {
    fn from_value(v: &Value) -> Result<Self> {
        match v {
            Value::S(s) => Ok(s.clone()),
            other => Err(Error::Mapping(format!("expected a string, found {:?}", other))),
        }
    }
}

impl FromValue for bool {
    fn from_value(v: &Value) -> Result<Self> {
        match v {
            Value::Bool(b) => Ok(*b),
            Value::N(n) if n == "1" => Ok(true),
            Value::N(n) if n == "0" => Ok(false),
            other => Err(Error::Mapping(format!("expected a boolean, found {:?}", other))),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(v: &Value) -> Result<Self> {
        match v {
            Value::B(b) => Ok(b.clone()),
            other => Err(Error::Mapping(format!("expected binary, found {:?}", other))),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(v: &Value) -> Result<Self> {
        match v {
            Value::Timestamp(t) => Ok(*t),
            Value::N(n) => n
                .parse::<i64>()
                .ok()
                .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
                .ok_or_else(|| Error::Mapping(format!("{} is not a valid epoch timestamp", n))),
            Value::S(s) => DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| Error::Mapping(format!("{} is not a valid ISO-8601 timestamp: {}", s, e))),
            other => Err(Error::Mapping(format!("expected a timestamp, found {:?}", other))),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(v: &Value) -> Result<Self> {
        match v {
            Value::Null => Ok(None),
            v => T::from_value(v).map(Some),
        }
    }

    fn missing(_name: &str) -> Result<Self> {
        Ok(None)
    }
}

/// Reads a property from an item produced by [`crate::Entity::to_item`].
pub fn attr<T: FromValue>(item: &Item, name: &str) -> Result<T> {
    match item.get(name) {
        Some(v) => T::from_value(v).map_err(|e| match e {
            Error::Mapping(msg) => Error::Mapping(format!("{}: {}", name, msg)),
            e => e,
        }),
        None => T::missing(name),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_numbers_compare_numerically() {
        assert_eq!(Value::from(9).compare(&Value::from(10)), Some(Ordering::Less));
        assert!(Value::N("1".into()).matches(&Value::N("1.0".into())));
        assert_eq!(Value::from("9").compare(&Value::from("10")), Some(Ordering::Greater));
        assert_eq!(Value::from(1).compare(&Value::from("1")), None);
    }

    #[test]
    fn test_numbers_keep_full_precision() {
        let a = Value::N("9007199254740992".into());
        let b = Value::N("9007199254740993".into());
        assert_eq!(a.compare(&b), Some(Ordering::Less));
        assert!(!a.matches(&b));
        assert_ne!(a.key_string(), b.key_string());

        let n = |s: &str| Value::N(s.into());
        assert_eq!(n("-0").key_string(), n("0.000").key_string());
        assert_eq!(n("007.50").key_string(), n("7.5").key_string());
        assert_eq!(n("1e2").key_string(), n("100").key_string());
        assert_eq!(n("-2").compare(&n("-10")), Some(Ordering::Greater));
        assert_eq!(n("0.05").compare(&n("0.5")), Some(Ordering::Less));
        assert_eq!(n("-0.1").compare(&n("0")), Some(Ordering::Less));
        assert_eq!(n("12").compare(&n("12.5")), Some(Ordering::Less));
        assert_eq!(n("abc").compare(&n("1")), None);
    }

    #[test]
    fn test_timestamps_accept_both_encodings() {
        let t = Utc.timestamp_millis_opt(1_600_000_000_123).unwrap();
        assert_eq!(DateTime::<Utc>::from_value(&Value::N("1600000000123".into())).unwrap(), t);
        assert_eq!(DateTime::<Utc>::from_value(&Value::S(t.to_rfc3339())).unwrap(), t);
    }

    #[test]
    fn test_booleans_accept_both_encodings() {
        assert!(bool::from_value(&Value::Bool(true)).unwrap());
        assert!(!bool::from_value(&Value::N("0".into())).unwrap());
        assert!(bool::from_value(&Value::S("true".into())).is_err());
    }

    #[test]
    fn test_attr_missing() {
        let item = Item::new();
        assert_eq!(attr::<Option<String>>(&item, "name").unwrap(), None);
        assert!(matches!(attr::<String>(&item, "name"), Err(Error::Mapping(_))));
    }
}
