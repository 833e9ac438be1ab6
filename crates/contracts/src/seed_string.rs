//! Seeds and entity keys travel as decimal strings so JSON consumers that
//! parse numbers as doubles do not lose precision; plain numbers are accepted
//! on input.

use serde::de::Error;
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(value)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SeedInput {
        Text(String),
        Number(u64),
    }

    match SeedInput::deserialize(deserializer)? {
        SeedInput::Text(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|err| D::Error::custom(format!("invalid seed {raw:?}: {err}"))),
        SeedInput::Number(value) => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct Keyed {
        #[serde(with = "super")]
        key: u64,
    }

    #[test]
    fn large_keys_serialize_as_strings() {
        let encoded = serde_json::to_string(&Keyed { key: u64::MAX }).expect("encode");
        assert_eq!(encoded, format!(r#"{{"key":"{}"}}"#, u64::MAX));
    }

    #[test]
    fn padded_text_and_numbers_both_decode() {
        let text: Keyed = serde_json::from_str(r#"{"key":" 77 "}"#).expect("text key");
        let number: Keyed = serde_json::from_str(r#"{"key":77}"#).expect("number key");
        assert_eq!(text, number);
    }

    #[test]
    fn negative_text_is_rejected() {
        assert!(serde_json::from_str::<Keyed>(r#"{"key":"-1"}"#).is_err());
    }
}
