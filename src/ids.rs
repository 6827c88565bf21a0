// Display identity shared across the resource manager, composition
// manager, and engine (spec.md §3.5, §6).
//
// The original core keys per-display hardware context off a small
// `HWBlockType` enum (`kHWPrimary`/`kHWHDMI`/`kHWVirtual`); generalized here
// into a fixed-size, indexable `DisplayId` so `ResourceManager` can keep
// flat per-kind arrays instead of a hash map.

/// The three display kinds the core composes for (spec.md §6). At most one
/// display of each kind may be registered at a time, mirroring the
/// original's one-hw-block-per-type assumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayId {
    Primary,
    Hdmi,
    Virtual,
}

pub const NUM_DISPLAY_KINDS: usize = 3;

impl DisplayId {
    pub fn index(&self) -> usize {
        match self {
            DisplayId::Primary => 0,
            DisplayId::Hdmi => 1,
            DisplayId::Virtual => 2,
        }
    }

    pub fn all() -> [DisplayId; NUM_DISPLAY_KINDS] {
        [DisplayId::Primary, DisplayId::Hdmi, DisplayId::Virtual]
    }
}
