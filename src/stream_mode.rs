use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::str::FromStr;

/// One of the three data streams a depth camera can deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modality {
    /// Color image, 3-channel byte triplets
    Rgb,
    /// Infrared image, one 16-bit sample per pixel
    Ir,
    /// Depth map, delivered by the driver in millimetres
    Depth,
}

impl Modality {
    /// All modalities in the order streams are started
    pub const ALL: [Modality; 3] = [Modality::Ir, Modality::Depth, Modality::Rgb];

    /// Canonical bit of this modality inside a [`StreamMode`]
    pub fn bit(&self) -> u8 {
        match self {
            Modality::Rgb => 1,
            Modality::Ir => 2,
            Modality::Depth => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Modality::Rgb => "RGB",
            Modality::Ir => "IR",
            Modality::Depth => "DEPTH",
        }
    }

    /// Index used by per-modality counters
    pub(crate) fn index(&self) -> usize {
        match self {
            Modality::Rgb => 0,
            Modality::Ir => 1,
            Modality::Depth => 2,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bitmask over {RGB, IR, DEPTH}.
///
/// A union is requested and tracked as one opaque value: a rendezvous for
/// `RGB | DEPTH` releases only once both bits have been observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamMode(u8);

impl StreamMode {
    pub const NONE: StreamMode = StreamMode(0);
    pub const RGB: StreamMode = StreamMode(1);
    pub const IR: StreamMode = StreamMode(2);
    pub const DEPTH: StreamMode = StreamMode(4);
    pub const DEPTH_RGB: StreamMode = StreamMode(1 | 4);
    pub const DEPTH_IR: StreamMode = StreamMode(2 | 4);

    const MASK: u8 = 0b111;

    /// Build a mode from raw bits, discarding anything outside the three canonical bits
    pub fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::MASK)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, modality: Modality) -> bool {
        self.0 & modality.bit() != 0
    }

    pub fn is_subset_of(&self, other: StreamMode) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn insert(&mut self, modality: Modality) {
        self.0 |= modality.bit();
    }

    /// Modalities whose bit is set, in stream start order
    pub fn modalities(&self) -> impl Iterator<Item = Modality> + '_ {
        Modality::ALL.into_iter().filter(|m| self.contains(*m))
    }

    /// Modalities in `self` that are not yet in `other`
    pub fn missing_from(&self, other: StreamMode) -> StreamMode {
        StreamMode(self.0 & !other.0)
    }
}

impl From<Modality> for StreamMode {
    fn from(modality: Modality) -> Self {
        StreamMode(modality.bit())
    }
}

impl BitOr for StreamMode {
    type Output = StreamMode;

    fn bitor(self, rhs: StreamMode) -> StreamMode {
        StreamMode(self.0 | rhs.0)
    }
}

impl BitOr<Modality> for StreamMode {
    type Output = StreamMode;

    fn bitor(self, rhs: Modality) -> StreamMode {
        StreamMode(self.0 | rhs.bit())
    }
}

impl BitOrAssign<Modality> for StreamMode {
    fn bitor_assign(&mut self, rhs: Modality) {
        self.insert(rhs);
    }
}

impl BitAnd for StreamMode {
    type Output = StreamMode;

    fn bitand(self, rhs: StreamMode) -> StreamMode {
        StreamMode(self.0 & rhs.0)
    }
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        // Display order follows the canonical bit order, not the start order
        let names: Vec<&str> = [Modality::Rgb, Modality::Ir, Modality::Depth]
            .iter()
            .filter(|m| self.contains(**m))
            .map(|m| m.name())
            .collect();
        f.write_str(&names.join("|"))
    }
}

impl FromStr for StreamMode {
    type Err = String;

    /// Accepts `none`, single names and unions joined by `|`, `+`, `,` or `_`
    /// (`"rgb|depth"`, `"DEPTH_IR"`), or the raw bitmask as a number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(bits) = trimmed.parse::<u8>() {
            if bits & !Self::MASK != 0 {
                return Err(format!("stream mode bits out of range: {}", bits));
            }
            return Ok(StreamMode(bits));
        }

        let mut mode = StreamMode::NONE;
        for part in trimmed.split(['|', '+', ',', '_']) {
            match part.trim().to_ascii_lowercase().as_str() {
                "none" | "" => {}
                "rgb" | "image" | "color" => mode.insert(Modality::Rgb),
                "ir" => mode.insert(Modality::Ir),
                "depth" => mode.insert(Modality::Depth),
                other => return Err(format!("unknown stream modality '{}'", other)),
            }
        }
        Ok(mode)
    }
}

impl TryFrom<String> for StreamMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StreamMode> for String {
    fn from(mode: StreamMode) -> String {
        mode.to_string()
    }
}
