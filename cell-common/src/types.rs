use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a registered disc type. Only meaningful for the registry that issued it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DiscTypeId(pub u32);

impl DiscTypeId {
    #[inline(always)]
    pub fn index(self) -> usize { self.0 as usize }
}

impl fmt::Display for DiscTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The closed palette disc types are drawn with.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscColor {
    Black,
    White,
    Red,
    Green,
    Blue,
    Yellow,
    Cyan,
    Magenta,
}

impl DiscColor {
    pub const ALL: [DiscColor; 8] = [
        DiscColor::Black,
        DiscColor::White,
        DiscColor::Red,
        DiscColor::Green,
        DiscColor::Blue,
        DiscColor::Yellow,
        DiscColor::Cyan,
        DiscColor::Magenta,
    ];

    /// RGBA value for renderers.
    pub fn rgba(self) -> [u8; 4] {
        match self {
            DiscColor::Black => [0, 0, 0, 255],
            DiscColor::White => [255, 255, 255, 255],
            DiscColor::Red => [255, 0, 0, 255],
            DiscColor::Green => [0, 255, 0, 255],
            DiscColor::Blue => [0, 0, 255, 255],
            DiscColor::Yellow => [255, 255, 0, 255],
            DiscColor::Cyan => [0, 255, 255, 255],
            DiscColor::Magenta => [255, 0, 255, 255],
        }
    }
}
