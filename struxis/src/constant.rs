use std::fmt::{Display, Formatter};

/// Bar timeframe. Ordered coarsest-last so `as_str`/`parse` round-trip and
/// the confluence per-timeframe weight table (see `confluence.rs`) can be a
/// plain match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "1m" => Some(Self::M1),
            "5m" => Some(Self::M5),
            "15m" => Some(Self::M15),
            "1h" | "60m" => Some(Self::H1),
            "4h" | "240m" => Some(Self::H4),
            "1d" => Some(Self::D1),
            _ => None,
        }
    }
}

impl Display for Timeframe {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction of a swing or a big move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }
}

/// Kind of pivot a fractal marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FractalKind {
    High,
    Low,
}

/// Supply/demand zone classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZoneKind {
    Supply,
    Demand,
    Continuation,
}

impl ZoneKind {
    pub fn opposite(self) -> Self {
        match self {
            Self::Supply => Self::Demand,
            Self::Demand => Self::Supply,
            Self::Continuation => Self::Continuation,
        }
    }
}

/// Zone lifecycle status, per the state machine in `zone_state.rs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZoneStatus {
    Active,
    Tested,
    Broken,
    Flipped,
    Expired,
}

/// Classification of a single bar's interaction with a zone boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestKind {
    Touch,
    Penetration,
    Break,
}

/// Why a `ZoneStateUpdate` occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionReason {
    ZoneTest,
    PriceBreak,
    ZoneFlip,
    AgeExpiry,
}

/// Dominant side implied by a confluence query, aggregated across zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DominantSide {
    Supply,
    Demand,
    Neutral,
}
