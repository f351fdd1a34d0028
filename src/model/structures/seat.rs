use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

/// One of the four fixed seats at the table.
///
/// Declaration order is the canonical seat order. It fixes the order in which
/// participants are handed to the rating model, and it breaks ties in final score
/// (the earlier seat takes the higher placement).
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Seat {
    East = 0,
    South = 1,
    West = 2,
    North = 3
}

impl Seat {
    pub const COUNT: usize = 4;
    pub const ALL: [Seat; Seat::COUNT] = [Seat::East, Seat::South, Seat::West, Seat::North];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        self.into()
    }
}
