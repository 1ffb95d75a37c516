// Core types shared across the graph.
//
// `Identifier` names both nodes and graphs. It is a 128-bit value rendered as
// four dot-separated hex groups and totally ordered by its numeric value; the
// ordering decides which of two linked nodes owns the link between them.
// `Direction` is the traversal bitmask stored on a link.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Identifier
// ---------------------------------------------------------------------------

/// A globally unique, ordered key for nodes and graphs.
///
/// The zero value is the "empty" identifier: it is what `nearest_node`
/// returns for an empty graph and what a node has before it is loaded.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Identifier(u128);

/// Returned when a string is not four dot-separated hex groups.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid identifier {0:?}")]
pub struct ParseIdentifierError(pub String);

impl Identifier {
    pub const ZERO: Self = Self(0);

    pub const fn from_u128(value: u128) -> Self {
        Self(value)
    }

    pub const fn as_u128(self) -> u128 {
        self.0
    }

    /// Build from the four 32-bit groups, most significant first.
    pub const fn from_parts(a: u32, b: u32, c: u32, d: u32) -> Self {
        Self(((a as u128) << 96) | ((b as u128) << 64) | ((c as u128) << 32) | d as u128)
    }

    pub const fn parts(self) -> [u32; 4] {
        [
            (self.0 >> 96) as u32,
            (self.0 >> 64) as u32,
            (self.0 >> 32) as u32,
            self.0 as u32,
        ]
    }

    /// A fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().as_u128())
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl FromStr for Identifier {
    type Err = ParseIdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseIdentifierError(s.to_string());
        let mut parts = [0u32; 4];
        let mut groups = s.split('.');
        for part in &mut parts {
            let group = groups.next().ok_or_else(err)?;
            let hex = group.bytes().all(|b| b.is_ascii_hexdigit());
            if group.is_empty() || group.len() > 8 || !hex {
                return Err(err());
            }
            *part = u32::from_str_radix(group, 16).map_err(|_| err())?;
        }
        if groups.next().is_some() {
            return Err(err());
        }
        Ok(Self::from_parts(parts[0], parts[1], parts[2], parts[3]))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.parts();
        write!(f, "{a:08X}.{b:08X}.{c:08X}.{d:08X}")
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({self})")
    }
}

// Serialize as the dotted string so identifiers can be JSON map keys.
impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Link direction
// ---------------------------------------------------------------------------

/// Which ways a link may be traversed, relative to its start and end nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Direction(u8);

impl Direction {
    pub const NONE: Self = Self(0);
    /// Start node to end node.
    pub const START_END: Self = Self(1);
    /// End node to start node.
    pub const END_START: Self = Self(2);
    pub const BOTH: Self = Self(3);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self((self.0 | other.0) & Self::BOTH.0)
    }

    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0 & Self::BOTH.0)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match *self {
            Self::NONE => "none",
            Self::START_END => "start->end",
            Self::END_START => "end->start",
            _ => "both",
        };
        f.write_str(text)
    }
}
