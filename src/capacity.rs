use thiserror::Error;

/// Capacity applied when the configured string does not parse.
pub const DEFAULT_CAPACITY: &str = "1GB";

/// Byte value of [`DEFAULT_CAPACITY`].
pub(crate) const DEFAULT_CAPACITY_BYTES: i64 = 1 << 30;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid size string {input:?}")]
pub struct ParseSizeError {
  input: String,
}

/// Parses a human-readable size string into bytes.
///
/// Suffixes `K`, `M`, `G`, `T` are accepted bare (`1G`), in decimal
/// spelling (`1GB`), and in binary spelling (`1GiB`); all three mean the
/// binary multiple, the usual convention for RAM-style capacities. A bare
/// number is bytes, fractional values are allowed (`1.5G`).
pub fn parse_size(input: &str) -> Result<i64, ParseSizeError> {
  let error = || ParseSizeError {
    input: input.to_owned(),
  };
  let trimmed = input.trim();
  let split = trimmed
    .find(|c: char| !(c.is_ascii_digit() || c == '.'))
    .unwrap_or(trimmed.len());
  let (number, suffix) = trimmed.split_at(split);
  let value: f64 = number.parse().map_err(|_| error())?;
  let multiplier: i64 = match suffix.trim().to_lowercase().as_str() {
    "" | "b" => 1,
    "k" | "kb" | "kib" => 1 << 10,
    "m" | "mb" | "mib" => 1 << 20,
    "g" | "gb" | "gib" => 1 << 30,
    "t" | "tb" | "tib" => 1 << 40,
    _ => return Err(error()),
  };
  Ok((value * multiplier as f64) as i64)
}
