//! Serde helpers for flexible deserialization of server payloads.

use std::fmt;

use serde::de::{self, Visitor};

/// A `serde_as` type that deserializes strings or integers as `String`.
///
/// Identifiers such as `studyId` arrive as either JSON strings or numbers depending on the
/// server build. Use with `#[serde_as(as = "Option<StringFromAny>")]` for `Option<String>`.
pub struct StringFromAny;

impl<'de> serde_with::DeserializeAs<'de, String> for StringFromAny {
    fn deserialize_as<D>(deserializer: D) -> std::result::Result<String, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct StringOrNumberVisitor;

        impl Visitor<'_> for StringOrNumberVisitor {
            type Value = String;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("string or integer")
            }

            fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(v.to_owned())
            }

            fn visit_string<E>(self, v: String) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(v)
            }

            fn visit_i64<E>(self, v: i64) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(v.to_string())
            }

            fn visit_u64<E>(self, v: u64) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(v.to_string())
            }
        }

        deserializer.deserialize_any(StringOrNumberVisitor)
    }
}

impl serde_with::SerializeAs<String> for StringFromAny {
    fn serialize_as<S>(source: &String, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(source)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_with::serde_as;

    use super::*;

    #[serde_as]
    #[derive(Debug, Deserialize, Serialize)]
    struct Holder {
        #[serde_as(as = "Option<StringFromAny>")]
        id: Option<String>,
    }

    #[test]
    fn accepts_string_and_number() {
        let from_str: Holder = serde_json::from_str(r#"{"id":"42"}"#).unwrap();
        let from_num: Holder = serde_json::from_str(r#"{"id":42}"#).unwrap();
        let missing: Holder = serde_json::from_str("{}").unwrap();

        assert_eq!(from_str.id.as_deref(), Some("42"));
        assert_eq!(from_num.id.as_deref(), Some("42"));
        assert_eq!(missing.id, None);
    }

    #[test]
    fn rejects_other_shapes() {
        let result = serde_json::from_str::<Holder>(r#"{"id":[1]}"#);

        assert!(result.is_err(), "arrays are not identifiers");
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_string(&Holder {
            id: Some("7".to_owned()),
        })
        .unwrap();

        assert_eq!(json, r#"{"id":"7"}"#);
    }
}
