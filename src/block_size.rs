//! fio-style block size parsing
//!
//! fio's default `kb_base=1024` treats every suffix as a power of two, so
//! "4k", "4K", "4KB" and "4KiB" are all 4096 bytes. A trailing "B" after a
//! plain number ("4096B") is accepted since that is how commands are emitted.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Deserializer};

/// Parse a block size into bytes
///
/// Examples:
/// - "4096" → 4096
/// - "4096B" → 4096
/// - "4k" / "4KiB" / "4KB" → 4096
/// - "4M" → 4,194,304
pub fn parse_block_size(input: &str) -> Result<u64> {
    let input = input.trim();

    if let Ok(num) = input.parse::<u64>() {
        return Ok(num);
    }

    let suffix_start = input
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| anyhow!("Invalid block size: {}", input))?;
    let (number, suffix) = input.split_at(suffix_start);

    if number.is_empty() {
        return Err(anyhow!("No number found in block size: {}", input));
    }

    let value: u64 = number
        .parse()
        .map_err(|_| anyhow!("Invalid number in block size: {}", input))?;

    let multiplier = match suffix.to_uppercase().as_str() {
        "B" => 1,
        "K" | "KB" | "KI" | "KIB" => 1 << 10,
        "M" | "MB" | "MI" | "MIB" => 1 << 20,
        "G" | "GB" | "GI" | "GIB" => 1 << 30,
        "T" | "TB" | "TI" | "TIB" => 1 << 40,
        _ => return Err(anyhow!("Unknown block size suffix '{}' in {}", suffix, input)),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow!("Block size overflows u64: {}", input))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BlockSizeValue {
    Number(u64),
    String(String),
}

/// Deserialize a block size from either a number of bytes or a suffixed string
pub fn deserialize_block_size<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match BlockSizeValue::deserialize(deserializer)? {
        BlockSizeValue::Number(n) => Ok(n),
        BlockSizeValue::String(s) => parse_block_size(&s).map_err(serde::de::Error::custom),
    }
}

/// Optional variant of [`deserialize_block_size`] for per-workload overrides
pub fn deserialize_opt_block_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<BlockSizeValue>::deserialize(deserializer)? {
        None => Ok(None),
        Some(BlockSizeValue::Number(n)) => Ok(Some(n)),
        Some(BlockSizeValue::String(s)) => parse_block_size(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_bytes() {
        assert_eq!(parse_block_size("4096").unwrap(), 4096);
        assert_eq!(parse_block_size("4096B").unwrap(), 4096);
        assert_eq!(parse_block_size(" 512 ").unwrap(), 512);
    }

    #[test]
    fn test_suffixes_are_binary() {
        assert_eq!(parse_block_size("4k").unwrap(), 4096);
        assert_eq!(parse_block_size("4KB").unwrap(), 4096);
        assert_eq!(parse_block_size("4KiB").unwrap(), 4096);
        assert_eq!(parse_block_size("4M").unwrap(), 4_194_304);
        assert_eq!(parse_block_size("1g").unwrap(), 1_073_741_824);
    }

    #[test]
    fn test_errors() {
        assert!(parse_block_size("").is_err());
        assert!(parse_block_size("k").is_err());
        assert!(parse_block_size("4X").is_err());
        assert!(parse_block_size("1.5M").is_err());
    }

    #[test]
    fn test_deserialize_number_or_string() {
        #[derive(Deserialize)]
        struct Sizes {
            #[serde(deserialize_with = "deserialize_block_size")]
            a: u64,
            #[serde(default, deserialize_with = "deserialize_opt_block_size")]
            b: Option<u64>,
        }

        let s: Sizes = serde_yaml::from_str("a: 4M\nb: 65536").unwrap();
        assert_eq!(s.a, 4_194_304);
        assert_eq!(s.b, Some(65536));

        let s: Sizes = serde_yaml::from_str("a: 8192").unwrap();
        assert_eq!(s.b, None);
    }
}
