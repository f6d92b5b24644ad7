use super::{
    value::{Item, Value},
    Error, Result,
};
use chrono::SecondsFormat;
use serde::Deserialize;
use std::str::FromStr;

/// Selects how booleans and dates are written. The mode is chosen once per mapping context and
/// applied to every stored item and every condition value.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarshallingMode {
    /// Booleans as native `BOOL`, dates as epoch milliseconds in an `N`.
    #[default]
    SdkV2Compatible,
    /// Booleans as `N` `1`/`0`, dates as ISO-8601 strings.
    SdkV1Compatible,
}

impl MarshallingMode {
    pub fn marshal(&self, v: &Value) -> Value {
        match (self, v) {
            (Self::SdkV2Compatible, Value::Timestamp(t)) => Value::N(t.timestamp_millis().to_string()),
            (Self::SdkV1Compatible, Value::Timestamp(t)) => Value::S(t.to_rfc3339_opts(SecondsFormat::Millis, true)),
            (Self::SdkV1Compatible, Value::Bool(b)) => Value::N(if *b { "1" } else { "0" }.to_string()),
            (_, Value::L(l)) => Value::L(l.iter().map(|v| self.marshal(v)).collect()),
            (_, Value::M(m)) => Value::M(m.iter().map(|(k, v)| (k.clone(), self.marshal(v))).collect()),
            (_, v) => v.clone(),
        }
    }

    /// Marshals every attribute of an item. Null attributes are dropped rather than stored.
    pub fn marshal_item(&self, item: &Item) -> Item {
        item.iter().filter(|(_, v)| !v.is_null()).map(|(k, v)| (k.clone(), self.marshal(v))).collect()
    }
}

impl FromStr for MarshallingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "SDK_V2_COMPATIBLE" | "V2" => Ok(Self::SdkV2Compatible),
            "SDK_V1_COMPATIBLE" | "V1" => Ok(Self::SdkV1Compatible),
            _ => Err(Error::Configuration(format!("unknown marshalling mode {}", s))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_modes() {
        let t = Value::Timestamp(Utc.timestamp_millis_opt(1_500_000_000_000).unwrap());

        assert_eq!(MarshallingMode::SdkV2Compatible.marshal(&t), Value::N("1500000000000".into()));
        assert_eq!(MarshallingMode::SdkV2Compatible.marshal(&Value::Bool(true)), Value::Bool(true));

        assert_eq!(MarshallingMode::SdkV1Compatible.marshal(&t), Value::S("2017-07-14T02:40:00.000Z".into()));
        assert_eq!(MarshallingMode::SdkV1Compatible.marshal(&Value::Bool(false)), Value::N("0".into()));
    }

    #[test]
    fn test_marshal_item_drops_nulls() {
        let mut item = Item::new();
        item.insert("a".into(), Value::Null);
        item.insert("b".into(), Value::L(vec![Value::Bool(true)]));
        let item = MarshallingMode::SdkV1Compatible.marshal_item(&item);
        assert_eq!(item.len(), 1);
        assert_eq!(item["b"], Value::L(vec![Value::N("1".into())]));
    }

    #[test]
    fn test_from_str() {
        assert_eq!("sdk-v1-compatible".parse::<MarshallingMode>().unwrap(), MarshallingMode::SdkV1Compatible);
        assert!("v3".parse::<MarshallingMode>().is_err());
    }
}
