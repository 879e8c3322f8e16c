//! Small shared types.

use std::fmt;

/// One of the two entity collections being reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The A-side collection.
    A,
    /// The B-side collection.
    B,
}

impl Side {
    /// Returns the other side.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::A => f.write_str("A"),
            Side::B => f.write_str("B"),
        }
    }
}

/// Direction of a one-way synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// A is authoritative, B is the target.
    AToB,
    /// B is authoritative, A is the target.
    BToA,
}

impl Direction {
    /// Returns the side that receives the changes.
    #[must_use]
    pub const fn target(self) -> Side {
        match self {
            Direction::AToB => Side::B,
            Direction::BToA => Side::A,
        }
    }

    /// Returns the authoritative side.
    #[must_use]
    pub const fn source(self) -> Side {
        self.target().other()
    }
}
