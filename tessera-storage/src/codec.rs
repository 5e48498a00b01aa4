//! Remote-tier attribute codec.
//!
//! # Byte Layout
//!
//! ASCII, colon-delimited:
//!
//! ```text
//! <timestamp: 13 chars, left-justified, space-padded>:<type tag>:<has value 0|1>[:<payload>]
//! ```
//!
//! The attribute name is not part of the payload. It is resolved on decode
//! from the key-name dictionary using the key id carried by the cache key.
//!
//! # Wire Formats
//!
//! [`WireFormat::V1`] reproduces the legacy STRING layout, where the raw
//! string is followed by the absent-double rendering `null`. [`WireFormat::V2`]
//! encodes every type independently. A cache must hold one format only.

use tessera_core::{AttributeValue, CacheError, DataType, KvValue, WireFormat};

use crate::dictionary::KeyDictionary;

/// Largest timestamp that fits the 13-digit field.
pub const MAX_TIMESTAMP: i64 = 9_999_999_999_999;

const TIMESTAMP_WIDTH: usize = 13;
const SEPARATOR: char = ':';
const V1_STRING_TAIL: &str = "null";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttributeCodec {
    format: WireFormat,
}

impl AttributeCodec {
    pub fn new(format: WireFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    pub fn serialize(&self, value: &AttributeValue) -> Result<Vec<u8>, CacheError> {
        let ts = value.last_update_ts;
        if !(0..=MAX_TIMESTAMP).contains(&ts) {
            return Err(CacheError::Serialization {
                reason: format!("timestamp {} does not fit {} digits", ts, TIMESTAMP_WIDTH),
            });
        }

        let mut out = format!("{:<width$}", ts, width = TIMESTAMP_WIDTH);
        out.push(SEPARATOR);
        out.push_str(&value.data_type.tag().to_string());
        out.push(SEPARATOR);

        match &value.value {
            None => out.push('0'),
            Some(payload) => {
                if payload.data_type() != value.data_type {
                    return Err(CacheError::Serialization {
                        reason: format!(
                            "{} declared {} but holds {}",
                            value.key,
                            value.data_type,
                            payload.data_type()
                        ),
                    });
                }
                out.push('1');
                out.push(SEPARATOR);
                self.write_payload(&mut out, payload);
            }
        }
        Ok(out.into_bytes())
    }

    /// Decode bytes written by [`serialize`](Self::serialize), resolving the
    /// attribute name for `key_id`.
    pub fn deserialize(
        &self,
        bytes: &[u8],
        key_id: i32,
        dictionary: &dyn KeyDictionary,
    ) -> Result<AttributeValue, CacheError> {
        let key = dictionary
            .key_name(key_id)?
            .ok_or(CacheError::UnknownKeyId { key_id })?;
        self.decode_named(bytes, key)
    }

    fn decode_named(&self, bytes: &[u8], key: String) -> Result<AttributeValue, CacheError> {
        let text = std::str::from_utf8(bytes).map_err(|e| malformed(format!("not UTF-8: {}", e)))?;
        let mut fields = text.splitn(4, SEPARATOR);

        let ts_field = fields.next().unwrap_or_default();
        if ts_field.len() != TIMESTAMP_WIDTH {
            return Err(malformed(format!(
                "timestamp field is {} chars, expected {}",
                ts_field.len(),
                TIMESTAMP_WIDTH
            )));
        }
        let last_update_ts: i64 = ts_field
            .trim_end_matches(' ')
            .parse()
            .map_err(|_| malformed(format!("bad timestamp {:?}", ts_field)))?;

        let tag_field = fields.next().ok_or_else(|| malformed("missing type tag"))?;
        let data_type = tag_field
            .parse::<u8>()
            .ok()
            .and_then(DataType::from_tag)
            .ok_or_else(|| malformed(format!("unknown type tag {:?}", tag_field)))?;

        let flag = fields.next().ok_or_else(|| malformed("missing value flag"))?;
        let payload = fields.next();
        match (flag, payload) {
            ("0", None) => Ok(AttributeValue::unset(key, data_type, last_update_ts)),
            ("1", Some(payload)) => {
                let value = self.read_payload(data_type, payload)?;
                Ok(AttributeValue::new(key, value, last_update_ts))
            }
            ("0", Some(_)) => Err(malformed("payload present on unset value")),
            ("1", None) => Err(malformed("missing payload")),
            (other, _) => Err(malformed(format!("bad value flag {:?}", other))),
        }
    }

    fn write_payload(&self, out: &mut String, payload: &KvValue) {
        match payload {
            KvValue::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
            KvValue::String(s) => {
                out.push_str(s);
                if self.format == WireFormat::V1 {
                    out.push_str(V1_STRING_TAIL);
                }
            }
            KvValue::Double(d) => out.push_str(&d.to_string()),
            KvValue::Long(l) => out.push_str(&l.to_string()),
            KvValue::Json(json) => out.push_str(json),
        }
    }

    fn read_payload(&self, data_type: DataType, payload: &str) -> Result<KvValue, CacheError> {
        match data_type {
            DataType::Boolean => match payload {
                "true" => Ok(KvValue::Boolean(true)),
                "false" => Ok(KvValue::Boolean(false)),
                other => Err(malformed(format!("bad boolean {:?}", other))),
            },
            DataType::String => match self.format {
                WireFormat::V1 => payload
                    .strip_suffix(V1_STRING_TAIL)
                    .map(|s| KvValue::String(s.to_string()))
                    .ok_or_else(|| malformed("v1 string payload lacks trailing null")),
                WireFormat::V2 => Ok(KvValue::String(payload.to_string())),
            },
            DataType::Double => payload
                .parse::<f64>()
                .map(KvValue::Double)
                .map_err(|_| malformed(format!("bad double {:?}", payload))),
            DataType::Long => payload
                .parse::<i64>()
                .map(KvValue::Long)
                .map_err(|_| malformed(format!("bad long {:?}", payload))),
            DataType::Json => Ok(KvValue::Json(payload.to_string())),
        }
    }
}

fn malformed(reason: impl Into<String>) -> CacheError {
    CacheError::Deserialization {
        reason: reason.into(),
    }
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::dictionary::InMemoryKeyDictionary;
    use proptest::prelude::*;

    fn kv_strategy() -> impl Strategy<Value = KvValue> {
        prop_oneof![
            any::<bool>().prop_map(KvValue::Boolean),
            ".*".prop_map(KvValue::String),
            any::<f64>()
                .prop_filter("finite", |d| d.is_finite())
                .prop_map(KvValue::Double),
            any::<i64>().prop_map(KvValue::Long),
            "[a-z0-9:{}\"]*".prop_map(KvValue::Json),
        ]
    }

    fn format_strategy() -> impl Strategy<Value = WireFormat> {
        prop_oneof![Just(WireFormat::V1), Just(WireFormat::V2)]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Every data type decodes back to the value that was encoded, in
        /// both wire formats, across the whole timestamp range.
        #[test]
        fn prop_roundtrip(
            format in format_strategy(),
            payload in kv_strategy(),
            ts in 0i64..=MAX_TIMESTAMP,
        ) {
            let codec = AttributeCodec::new(format);
            let dict = InMemoryKeyDictionary::new();
            let id = dict.key_id("attr").expect("key_id should succeed");
            let value = AttributeValue::new("attr", payload, ts);
            let bytes = codec.serialize(&value).expect("serialize should succeed");
            let decoded = codec.deserialize(&bytes, id, &dict).expect("deserialize should succeed");
            prop_assert_eq!(decoded, value);
        }

        /// The timestamp field is always exactly 13 characters wide.
        #[test]
        fn prop_timestamp_field_width(ts in 0i64..=MAX_TIMESTAMP) {
            let bytes = AttributeCodec::default()
                .serialize(&AttributeValue::long("n", 0, ts))
                .expect("serialize should succeed");
            prop_assert_eq!(bytes[TIMESTAMP_WIDTH], b':');
        }
    }
}
