//! Serde helpers for on-chain quantities that must persist as decimal
//! strings.

/// `U256` as a decimal string. Accepts `0x`-prefixed hex on the way in for
/// rows written by older collectors.
pub mod u256_dec {
    use alloy_primitives::U256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_u256(&raw).map_err(de::Error::custom)
    }

    pub fn parse_u256(raw: &str) -> Result<U256, String> {
        let (digits, radix) = match raw.strip_prefix("0x") {
            Some(hex) => (hex, 16),
            None => (raw, 10)
        };
        U256::from_str_radix(digits, radix)
            .map_err(|e| format!("invalid 256-bit integer {raw:?}: {e}"))
    }
}

/// `u128` as a decimal string, matching how liquidity is stored on rows.
pub mod u128_dec {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<u128>()
            .map_err(|e| de::Error::custom(format!("invalid 128-bit integer {raw:?}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::U256;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Row {
        #[serde(with = "super::u256_dec")]
        value: U256
    }

    #[test]
    fn u256_round_trips_as_decimal() {
        let row = Row { value: U256::MAX };
        let json = serde_json::to_string(&row).unwrap();
        assert!(json.contains(&U256::MAX.to_string()));

        let back: Row = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value, U256::MAX);
    }

    #[test]
    fn u256_accepts_hex_rows() {
        let back: Row = serde_json::from_str(r#"{"value":"0xff"}"#).unwrap();
        assert_eq!(back.value, U256::from(255u64));
    }
}
