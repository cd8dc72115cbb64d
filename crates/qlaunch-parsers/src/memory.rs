//! Memory size parsing for PBS resource values.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Empty memory size")]
    Empty,
    #[error("Invalid memory amount in {0:?}")]
    InvalidAmount(String),
    #[error("Unknown memory unit {unit:?} in {input:?}")]
    UnknownUnit { input: String, unit: String },
}

/// PBS size units (`b`, `kb`, `mb`, `gb`, `tb`), powers of 1024.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MemoryUnit {
    Bytes,
    Kilobytes,
    Megabytes,
    Gigabytes,
    Terabytes,
}

impl MemoryUnit {
    fn suffix(self) -> &'static str {
        match self {
            Self::Bytes => "b",
            Self::Kilobytes => "kb",
            Self::Megabytes => "mb",
            Self::Gigabytes => "gb",
            Self::Terabytes => "tb",
        }
    }

    fn bytes(self) -> u64 {
        match self {
            Self::Bytes => 1,
            Self::Kilobytes => 1 << 10,
            Self::Megabytes => 1 << 20,
            Self::Gigabytes => 1 << 30,
            Self::Terabytes => 1 << 40,
        }
    }

    fn from_suffix(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            // A bare number is bytes for PBS
            "" | "b" => Some(Self::Bytes),
            "kb" | "k" => Some(Self::Kilobytes),
            "mb" | "m" => Some(Self::Megabytes),
            "gb" | "g" => Some(Self::Gigabytes),
            "tb" | "t" => Some(Self::Terabytes),
            _ => None,
        }
    }
}

/// A memory request such as `4000mb`.
///
/// The unit is kept as given so that a rendered directive reproduces the
/// value it was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemorySize {
    pub amount: u64,
    pub unit: MemoryUnit,
}

impl MemorySize {
    pub const fn new(amount: u64, unit: MemoryUnit) -> Self {
        Self { amount, unit }
    }

    pub const fn megabytes(amount: u64) -> Self {
        Self::new(amount, MemoryUnit::Megabytes)
    }

    pub fn as_bytes(&self) -> u64 {
        self.amount.saturating_mul(self.unit.bytes())
    }

    /// Size in whole megabytes (rounded down).
    pub fn as_mb(&self) -> u64 {
        self.as_bytes() / MemoryUnit::Megabytes.bytes()
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }
}

impl fmt::Display for MemorySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.suffix())
    }
}

impl FromStr for MemorySize {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_memory(s)
    }
}

/// Parse a PBS size value (e.g., "4000mb", "4gb", "1048576kb", "512").
pub fn parse_memory(s: &str) -> Result<MemorySize, MemoryError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(MemoryError::Empty);
    }

    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, suffix) = s.split_at(split);
    if digits.is_empty() {
        return Err(MemoryError::InvalidAmount(s.to_string()));
    }
    let amount = digits
        .parse::<u64>()
        .map_err(|_| MemoryError::InvalidAmount(s.to_string()))?;
    let unit = MemoryUnit::from_suffix(suffix).ok_or_else(|| MemoryError::UnknownUnit {
        input: s.to_string(),
        unit: suffix.to_string(),
    })?;

    Ok(MemorySize { amount, unit })
}
