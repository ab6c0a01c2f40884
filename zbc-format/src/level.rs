//! Compression level enumeration and codec cookie mapping

use crate::error::{Result, ZbcError};

/// Logical compression level stored in the frame header.
///
/// Tags are stable and append-only: a frame written today must report the
/// same level when read by any future version. Tags 20..=101 are reserved
/// for new positive levels, 123..=254 for new fast levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Level {
    /// Inherit the level from the containing dataset
    Inherit = 0,
    /// Positive level 1 (fastest of the standard levels)
    L1 = 1,
    /// Positive level 2
    L2 = 2,
    /// Positive level 3
    L3 = 3,
    /// Positive level 4
    L4 = 4,
    /// Positive level 5
    L5 = 5,
    /// Positive level 6
    L6 = 6,
    /// Positive level 7
    L7 = 7,
    /// Positive level 8
    L8 = 8,
    /// Positive level 9
    L9 = 9,
    /// Positive level 10
    L10 = 10,
    /// Positive level 11
    L11 = 11,
    /// Positive level 12
    L12 = 12,
    /// Positive level 13
    L13 = 13,
    /// Positive level 14
    L14 = 14,
    /// Positive level 15
    L15 = 15,
    /// Positive level 16
    L16 = 16,
    /// Positive level 17
    L17 = 17,
    /// Positive level 18
    L18 = 18,
    /// Positive level 19 (slowest, smallest output)
    L19 = 19,
    /// Fast level 1 (codec cookie -1)
    Fast1 = 102,
    /// Fast level 2
    Fast2 = 103,
    /// Fast level 3
    Fast3 = 104,
    /// Fast level 4
    Fast4 = 105,
    /// Fast level 5
    Fast5 = 106,
    /// Fast level 6
    Fast6 = 107,
    /// Fast level 7
    Fast7 = 108,
    /// Fast level 8
    Fast8 = 109,
    /// Fast level 9
    Fast9 = 110,
    /// Fast level 10
    Fast10 = 111,
    /// Fast level 20
    Fast20 = 112,
    /// Fast level 30
    Fast30 = 113,
    /// Fast level 40
    Fast40 = 114,
    /// Fast level 50
    Fast50 = 115,
    /// Fast level 60
    Fast60 = 116,
    /// Fast level 70
    Fast70 = 117,
    /// Fast level 80
    Fast80 = 118,
    /// Fast level 90
    Fast90 = 119,
    /// Fast level 100
    Fast100 = 120,
    /// Fast level 500
    Fast500 = 121,
    /// Fast level 1000 (coarsest, fastest)
    Fast1000 = 122,
    /// Use the system default level
    Default = 255,
}

/// The system default positive level applied when a caller passes
/// [`Level::Inherit`] or [`Level::Default`].
pub const DEFAULT_LEVEL: Level = Level::L3;

/// One row of the level map: wire tag, codec cookie, logical level.
struct LevelMapEntry {
    tag: u8,
    cookie: i32,
    level: Level,
}

const fn entry(tag: u8, cookie: i32, level: Level) -> LevelMapEntry {
    LevelMapEntry { tag, cookie, level }
}

/// Every concrete level. `Inherit` and `Default` are sentinels and never
/// appear here (nor in a stored frame).
static LEVEL_MAP: [LevelMapEntry; 40] = [
    entry(1, 1, Level::L1),
    entry(2, 2, Level::L2),
    entry(3, 3, Level::L3),
    entry(4, 4, Level::L4),
    entry(5, 5, Level::L5),
    entry(6, 6, Level::L6),
    entry(7, 7, Level::L7),
    entry(8, 8, Level::L8),
    entry(9, 9, Level::L9),
    entry(10, 10, Level::L10),
    entry(11, 11, Level::L11),
    entry(12, 12, Level::L12),
    entry(13, 13, Level::L13),
    entry(14, 14, Level::L14),
    entry(15, 15, Level::L15),
    entry(16, 16, Level::L16),
    entry(17, 17, Level::L17),
    entry(18, 18, Level::L18),
    entry(19, 19, Level::L19),
    entry(102, -1, Level::Fast1),
    entry(103, -2, Level::Fast2),
    entry(104, -3, Level::Fast3),
    entry(105, -4, Level::Fast4),
    entry(106, -5, Level::Fast5),
    entry(107, -6, Level::Fast6),
    entry(108, -7, Level::Fast7),
    entry(109, -8, Level::Fast8),
    entry(110, -9, Level::Fast9),
    entry(111, -10, Level::Fast10),
    entry(112, -20, Level::Fast20),
    entry(113, -30, Level::Fast30),
    entry(114, -40, Level::Fast40),
    entry(115, -50, Level::Fast50),
    entry(116, -60, Level::Fast60),
    entry(117, -70, Level::Fast70),
    entry(118, -80, Level::Fast80),
    entry(119, -90, Level::Fast90),
    entry(120, -100, Level::Fast100),
    entry(121, -500, Level::Fast500),
    entry(122, -1000, Level::Fast1000),
];

impl Level {
    /// Wire tag stored in the frame header's level byte.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Resolve `Inherit`/`Default` to the concrete [`DEFAULT_LEVEL`].
    pub fn normalize(self) -> Level {
        match self {
            Level::Inherit | Level::Default => DEFAULT_LEVEL,
            concrete => concrete,
        }
    }

    /// Signed level cookie understood by the codec library.
    ///
    /// Total over the whole enumeration: the sentinels map to the default
    /// level's cookie rather than failing.
    pub fn cookie(self) -> i32 {
        let concrete = self.normalize();
        LEVEL_MAP
            .iter()
            .find(|e| e.level == concrete)
            .map(|e| e.cookie)
            .unwrap_or(DEFAULT_LEVEL as u8 as i32)
    }

    /// Look up the logical level for a codec cookie.
    ///
    /// A cookie outside the map means the frame (or the caller's state) is
    /// corrupt.
    pub fn from_cookie(cookie: i32) -> Result<Level> {
        LEVEL_MAP
            .iter()
            .find(|e| e.cookie == cookie)
            .map(|e| e.level)
            .ok_or(ZbcError::UnknownCookie(cookie))
    }

    /// Decode a frame header level byte.
    ///
    /// Only concrete levels are valid on the wire; the `Inherit`/`Default`
    /// sentinels are resolved before a frame is written.
    pub fn from_tag(tag: u8) -> Result<Level> {
        LEVEL_MAP
            .iter()
            .find(|e| e.tag == tag)
            .map(|e| e.level)
            .ok_or(ZbcError::UnknownLevelTag(tag))
    }

    /// True for the negative "fast" levels.
    pub fn is_fast(self) -> bool {
        self.cookie() < 0
    }

    /// All concrete levels, in map order.
    pub fn all_concrete() -> impl Iterator<Item = Level> {
        LEVEL_MAP.iter().map(|e| e.level)
    }
}
