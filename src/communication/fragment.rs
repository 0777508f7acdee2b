/// One of the 27 base-3 direction codes over `{-1,0,1}^3` that label a
/// neighbour subdomain, or the bulk (self) fragment (spec.md §4.4).
///
/// Encoded as `9*(dx+1) + 3*(dy+1) + (dz+1)`, so the bulk fragment
/// `(0,0,0)` is slot 13... except the spec fixes the bulk slot at index
/// 26, matching the source's convention of reserving the *last* slot for
/// self rather than the row-major middle. We follow the spec's indexing
/// here since other components (the exchange engine's posted-receive
/// loop) are written against "slot 26 is bulk".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fragment(pub i8, pub i8, pub i8);

impl Fragment {
    pub const BULK: Fragment = Fragment(0, 0, 0);
    pub const BULK_SLOT: usize = 26;
    pub const COUNT: usize = 27;

    pub fn all() -> impl Iterator<Item = Fragment> {
        (-1..=1).flat_map(move |dx| {
            (-1..=1).flat_map(move |dy| (-1..=1).map(move |dz| Fragment(dx, dy, dz)))
        })
    }

    pub fn is_bulk(&self) -> bool {
        *self == Self::BULK
    }

    /// Deterministic slot index in `[0, 27)`, with `BULK` always at 26.
    pub fn slot(&self) -> usize {
        if self.is_bulk() {
            return Self::BULK_SLOT;
        }
        let mut idx = 0usize;
        for f in Self::all() {
            if f.is_bulk() {
                continue;
            }
            if f == *self {
                return idx;
            }
            idx += 1;
        }
        unreachable!("every non-bulk fragment is enumerated by Fragment::all")
    }

    pub fn from_slot(slot: usize) -> Fragment {
        if slot == Self::BULK_SLOT {
            return Self::BULK;
        }
        Self::all().filter(|f| !f.is_bulk()).nth(slot).expect("slot in range")
    }

    pub fn opposite(&self) -> Fragment {
        Fragment(-self.0, -self.1, -self.2)
    }

    pub fn shift(&self, local_size: glam::DVec3) -> glam::DVec3 {
        glam::DVec3::new(
            self.0 as f64 * local_size.x,
            self.1 as f64 * local_size.y,
            self.2 as f64 * local_size.z,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_27_fragments_bulk_at_26() {
        let all: Vec<_> = Fragment::all().collect();
        assert_eq!(all.len(), Fragment::COUNT);
        assert_eq!(Fragment::BULK.slot(), Fragment::BULK_SLOT);
    }

    #[test]
    fn slots_are_a_bijection() {
        let mut seen = std::collections::HashSet::new();
        for f in Fragment::all() {
            assert!(seen.insert(f.slot()), "duplicate slot for {:?}", f);
            assert_eq!(Fragment::from_slot(f.slot()), f);
        }
    }

    #[test]
    fn opposite_is_involutive() {
        for f in Fragment::all() {
            assert_eq!(f.opposite().opposite(), f);
        }
    }
}
