use ndarray::ArrayViewMut1;

use super::MIN_LOG_DENSITY;

/// Bounded, descending-sorted list of the best `(log density, index)` pairs
/// seen so far, written directly into a caller-owned row of the density
/// scratch.
///
/// Ties: a value only displaces an entry it is strictly greater than, so among
/// equal values the one inserted first keeps the earlier slot, and a value
/// equal to the current worst entry is not inserted at all.
pub struct TopN<'a> {
    den: ArrayViewMut1<'a, f64>,
    idx: ArrayViewMut1<'a, u32>,
}

impl<'a> TopN<'a> {
    /// Empty list: every slot holds `MIN_LOG_DENSITY` and the invalid index
    /// `n_density + 1`.
    pub fn empty(
        mut den: ArrayViewMut1<'a, f64>,
        mut idx: ArrayViewMut1<'a, u32>,
        n_density: usize,
    ) -> Self {
        debug_assert_eq!(den.len(), idx.len());
        den.fill(MIN_LOG_DENSITY);
        idx.fill(n_density as u32 + 1);
        Self { den, idx }
    }

    /// List built from already scored candidates, typically the previous
    /// frame's winners. Candidates are insertion-sorted in the given order;
    /// slots left over are empty as in [`TopN::empty`].
    pub fn seeded(
        mut den: ArrayViewMut1<'a, f64>,
        mut idx: ArrayViewMut1<'a, u32>,
        n_density: usize,
        candidates: impl IntoIterator<Item = (f64, u32)>,
    ) -> Self {
        let n = den.len();
        let mut filled = 0;
        for (d, i) in candidates.into_iter().take(n) {
            let mut k = filled;
            while k > 0 && d > den[k - 1] {
                den[k] = den[k - 1];
                idx[k] = idx[k - 1];
                k -= 1;
            }
            den[k] = d;
            idx[k] = i;
            filled += 1;
        }
        for k in filled..n {
            den[k] = MIN_LOG_DENSITY;
            idx[k] = n_density as u32 + 1;
        }
        Self { den, idx }
    }

    pub fn len(&self) -> usize {
        self.den.len()
    }

    pub fn is_empty(&self) -> bool {
        self.den.is_empty()
    }

    /// Value a candidate has to beat to get in.
    #[inline]
    pub fn worst(&self) -> f64 {
        self.den[self.den.len() - 1]
    }

    pub fn contains(&self, index: u32) -> bool {
        self.idx.iter().any(|&i| i == index)
    }

    /// Inserts `(value, index)` if it beats the current worst entry.
    pub fn try_insert(&mut self, value: f64, index: u32) -> bool {
        let n = self.den.len();
        if n == 0 || !(value > self.worst()) {
            return false;
        }
        let mut k = n - 1;
        while k > 0 && value > self.den[k - 1] {
            self.den[k] = self.den[k - 1];
            self.idx[k] = self.idx[k - 1];
            k -= 1;
        }
        self.den[k] = value;
        self.idx[k] = index;
        true
    }
}
