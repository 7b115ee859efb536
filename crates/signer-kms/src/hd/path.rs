//! Derivation prefixes below which child indices are appended.

use core::{fmt, str::FromStr};

use bitcoin::bip32::{ChildNumber, DerivationPath};

use super::DerivationError;

/// BIP44 Ethereum account path; the address index is appended to it.
pub const DEFAULT_BASE_PATH: &str = "m/44'/60'/0'/0";

/// Parsed derivation prefix, e.g. `m/44'/60'/0'/0`.
///
/// Accepts `'`, `h` or `H` as the hardened marker. Components must be
/// decimal and below `2^31`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasePath(Vec<ChildNumber>);

impl BasePath {
    /// Parse a path string.
    pub fn parse(s: &str) -> Result<Self, DerivationError> {
        let mut parts = s.trim().split('/');
        if parts.next() != Some("m") {
            return Err(DerivationError::DerivationPath(format!("{s:?} must start with \"m\"")));
        }
        parts.map(|part| parse_component(s, part)).collect::<Result<Vec<_>, _>>().map(Self)
    }

    /// `self/index` with a non-hardened index.
    pub fn child(&self, index: u32) -> Result<DerivationPath, DerivationError> {
        let leaf = ChildNumber::from_normal_idx(index)
            .map_err(|_| DerivationError::DerivationPath(format!("index {index} out of range")))?;
        let mut path = self.0.clone();
        path.push(leaf);
        Ok(DerivationPath::from(path))
    }

    /// Components of the path.
    pub fn components(&self) -> &[ChildNumber] {
        &self.0
    }
}

fn parse_component(path: &str, part: &str) -> Result<ChildNumber, DerivationError> {
    let invalid = || DerivationError::DerivationPath(format!("bad component {part:?} in {path:?}"));
    let (digits, hardened) = match part.strip_suffix(['\'', 'h', 'H']) {
        Some(digits) => (digits, true),
        None => (part, false),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let index: u32 = digits.parse().map_err(|_| invalid())?;
    let child = if hardened {
        ChildNumber::from_hardened_idx(index)
    } else {
        ChildNumber::from_normal_idx(index)
    };
    child.map_err(|_| invalid())
}

impl Default for BasePath {
    fn default() -> Self {
        Self(vec![
            ChildNumber::Hardened { index: 44 },
            ChildNumber::Hardened { index: 60 },
            ChildNumber::Hardened { index: 0 },
            ChildNumber::Normal { index: 0 },
        ])
    }
}

impl FromStr for BasePath {
    type Err = DerivationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for BasePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for child in &self.0 {
            match child {
                ChildNumber::Normal { index } => write!(f, "/{index}")?,
                ChildNumber::Hardened { index } => write!(f, "/{index}'")?,
            }
        }
        Ok(())
    }
}
