use std::fmt;

/// Highest rank a [`Permutation`] can describe.
pub const MAX_RANK: usize = 8;

/// Axis permutation: output axis `i` reads input axis `self[i]`.
///
/// This matches the operand of a `Transpose` node, so `Transpose(x, p)` has shape
/// `p.apply(shape(x))`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Permutation {
    axes: [u8; MAX_RANK],
    rank: u8,
}

impl Permutation {
    pub fn identity(rank: usize) -> Self {
        assert!(rank <= MAX_RANK, "permutation rank {rank} exceeds {MAX_RANK}");
        let mut axes = [0u8; MAX_RANK];
        for (i, axis) in axes.iter_mut().enumerate().take(rank) {
            *axis = i as u8;
        }
        Self {
            axes,
            rank: rank as u8,
        }
    }

    /// Builds a permutation, rejecting out-of-range or repeated axes.
    pub fn from_slice(axes: &[usize]) -> Option<Self> {
        if axes.len() > MAX_RANK {
            return None;
        }
        let mut seen = [false; MAX_RANK];
        let mut out = [0u8; MAX_RANK];
        for (i, &axis) in axes.iter().enumerate() {
            if axis >= axes.len() || seen[axis] {
                return None;
            }
            seen[axis] = true;
            out[i] = axis as u8;
        }
        Some(Self {
            axes: out,
            rank: axes.len() as u8,
        })
    }

    /// Builds a permutation from a signed axis list, accepting negative axes.
    pub fn from_i64s(axes: &[i64]) -> Option<Self> {
        let rank = axes.len() as i64;
        let normalized: Option<Vec<usize>> = axes
            .iter()
            .map(|&a| {
                let a = if a < 0 { a + rank } else { a };
                (0..rank).contains(&a).then_some(a as usize)
            })
            .collect();
        Self::from_slice(&normalized?)
    }

    pub fn rank(&self) -> usize {
        self.rank as usize
    }

    pub fn axes(&self) -> &[u8] {
        &self.axes[..self.rank()]
    }

    pub fn get(&self, index: usize) -> usize {
        self.axes()[index] as usize
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.axes().iter().map(|a| *a as usize).collect()
    }

    pub fn to_i64s(&self) -> Vec<i64> {
        self.axes().iter().map(|a| i64::from(*a)).collect()
    }

    pub fn is_identity(&self) -> bool {
        self.axes().iter().enumerate().all(|(i, a)| *a as usize == i)
    }

    pub fn inverse(&self) -> Self {
        let mut axes = [0u8; MAX_RANK];
        for (i, &a) in self.axes().iter().enumerate() {
            axes[a as usize] = i as u8;
        }
        Self {
            axes,
            rank: self.rank,
        }
    }

    /// Permutation equivalent to transposing by `self` and then by `other`.
    pub fn compose(&self, other: &Permutation) -> Self {
        assert_eq!(
            self.rank, other.rank,
            "cannot compose permutations of rank {} and {}",
            self.rank, other.rank
        );
        let mut axes = [0u8; MAX_RANK];
        for (i, slot) in axes.iter_mut().enumerate().take(self.rank()) {
            *slot = self.axes[other.axes[i] as usize];
        }
        Self {
            axes,
            rank: self.rank,
        }
    }

    /// Reorders `values` the way a transpose by `self` reorders a shape.
    pub fn apply<T: Clone>(&self, values: &[T]) -> Vec<T> {
        assert_eq!(values.len(), self.rank(), "rank mismatch applying permutation");
        self.axes().iter().map(|&a| values[a as usize].clone()).collect()
    }

    /// Position that canonical axis `axis` occupies after transposing by `self`.
    pub fn remap_axis(&self, axis: usize) -> usize {
        self.inverse().get(axis)
    }
}

impl fmt::Debug for Permutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Permutation{:?}", self.axes())
    }
}
