//! Vision mode tags and the bitmask set used throughout the pipeline.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One independently schedulable vision algorithm.
///
/// The discriminant order is load-bearing: the schedule balancer uses it as
/// the stable tie-break when two modes have equal cost, so recomputing a
/// schedule for the same subscriber set always yields the same result.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    IntoPrimitive,
    TryFromPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
#[serde(rename_all = "snake_case")]
pub enum VisionMode {
    Markers = 0,
    Faces = 1,
    Pets = 2,
    Motion = 3,
    OverheadEdges = 4,
    Calibration = 5,
    AutoExposure = 6,
    WhiteBalance = 7,
    Illumination = 8,
    SaveImages = 9,
    Viz = 10,
    MirrorMode = 11,
}

impl VisionMode {
    pub const COUNT: usize = 12;

    /// All modes, in discriminant order.
    pub const ALL: [VisionMode; Self::COUNT] = [
        VisionMode::Markers,
        VisionMode::Faces,
        VisionMode::Pets,
        VisionMode::Motion,
        VisionMode::OverheadEdges,
        VisionMode::Calibration,
        VisionMode::AutoExposure,
        VisionMode::WhiteBalance,
        VisionMode::Illumination,
        VisionMode::SaveImages,
        VisionMode::Viz,
        VisionMode::MirrorMode,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for VisionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Named cadence request, mapped to a tick period by [`crate::ModeSetting`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeTier {
    Low,
    Med,
    High,
    Standard,
}

/// Bitmask set of [`VisionMode`]s.
///
/// Cheap to copy and compare; used for the per-tick "modes to process" set
/// and the `modes_processed` field of a processing result.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VisionModeSet(u16);

impl VisionModeSet {
    pub const EMPTY: VisionModeSet = VisionModeSet(0);

    pub const fn empty() -> Self {
        Self::EMPTY
    }

    pub fn insert(&mut self, mode: VisionMode) {
        self.0 |= 1 << mode.index();
    }

    pub fn remove(&mut self, mode: VisionMode) {
        self.0 &= !(1 << mode.index());
    }

    pub const fn contains(self, mode: VisionMode) -> bool {
        self.0 & (1 << mode.index()) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub const fn union(self, other: VisionModeSet) -> VisionModeSet {
        VisionModeSet(self.0 | other.0)
    }

    pub const fn intersection(self, other: VisionModeSet) -> VisionModeSet {
        VisionModeSet(self.0 & other.0)
    }

    pub fn iter(self) -> impl Iterator<Item = VisionMode> {
        VisionMode::ALL.into_iter().filter(move |m| self.contains(*m))
    }
}

impl FromIterator<VisionMode> for VisionModeSet {
    fn from_iter<I: IntoIterator<Item = VisionMode>>(iter: I) -> Self {
        let mut set = VisionModeSet::empty();
        for mode in iter {
            set.insert(mode);
        }
        set
    }
}

impl fmt::Debug for VisionModeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for VisionModeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for mode in self.iter() {
            if !first {
                write!(f, "+")?;
            }
            write!(f, "{mode}")?;
            first = false;
        }
        if first {
            write!(f, "<none>")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_roundtrip_u8() {
        for mode in VisionMode::ALL {
            let raw: u8 = mode.into();
            assert_eq!(VisionMode::try_from(raw).unwrap(), mode);
        }
        assert!(VisionMode::try_from(VisionMode::COUNT as u8).is_err());
    }

    #[test]
    fn test_all_is_discriminant_ordered() {
        for (i, mode) in VisionMode::ALL.iter().enumerate() {
            assert_eq!(mode.index(), i);
        }
    }

    #[test]
    fn test_set_insert_remove_contains() {
        let mut set = VisionModeSet::empty();
        assert!(set.is_empty());

        set.insert(VisionMode::Faces);
        set.insert(VisionMode::Motion);
        assert!(set.contains(VisionMode::Faces));
        assert!(set.contains(VisionMode::Motion));
        assert!(!set.contains(VisionMode::Markers));
        assert_eq!(set.len(), 2);

        set.remove(VisionMode::Faces);
        assert!(!set.contains(VisionMode::Faces));
        assert_eq!(set.len(), 1);

        // Removing an absent mode is a no-op
        set.remove(VisionMode::Faces);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_set_union_and_iter() {
        let a: VisionModeSet = [VisionMode::Markers, VisionMode::Pets].into_iter().collect();
        let b: VisionModeSet = [VisionMode::Pets, VisionMode::Viz].into_iter().collect();
        let u = a.union(b);
        let modes: Vec<_> = u.iter().collect();
        assert_eq!(modes, vec![VisionMode::Markers, VisionMode::Pets, VisionMode::Viz]);
    }

    #[test]
    fn test_set_display() {
        let set: VisionModeSet = [VisionMode::Faces, VisionMode::Motion].into_iter().collect();
        assert_eq!(set.to_string(), "Faces+Motion");
        assert_eq!(VisionModeSet::empty().to_string(), "<none>");
    }
}
