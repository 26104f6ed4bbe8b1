//! Byte-array transforms applied before a field is interpreted

use crate::{Error, Result};
use tracing::trace;

/// A transform over raw field bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Process {
    /// XOR with a key, cycling when the key is shorter than the data
    Xor(Vec<u8>),
    /// Rotate every byte left by N bits
    Rol(u32),
    /// Rotate every byte right by N bits
    Ror(u32),
}

impl Process {
    /// Build a transform from a process name and its integer arguments
    pub fn from_parts(name: &str, args: &[u8]) -> Result<Self> {
        match name {
            "xor" if !args.is_empty() => Ok(Self::Xor(args.to_vec())),
            "rol" | "ror" if args.len() == 1 => {
                let amount = u32::from(args[0]) % 8;
                Ok(if name == "rol" {
                    Self::Rol(amount)
                } else {
                    Self::Ror(amount)
                })
            }
            _ => Err(Error::unknown_process(name)),
        }
    }

    /// Apply the transform, producing a new buffer
    pub fn apply(&self, data: &[u8]) -> Vec<u8> {
        trace!("Applying {:?} to {} bytes", self, data.len());
        match self {
            Self::Xor(key) => data
                .iter()
                .zip(key.iter().cycle())
                .map(|(b, k)| b ^ k)
                .collect(),
            Self::Rol(n) => data.iter().map(|b| b.rotate_left(*n)).collect(),
            Self::Ror(n) => data.iter().map(|b| b.rotate_right(*n)).collect(),
        }
    }
}
