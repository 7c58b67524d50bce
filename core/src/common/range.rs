use ndarray::Slice;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range<N> {
    pub min: N,
    pub max: N,
}

impl<N> Range<N> {
    pub fn new(min: N, max: N) -> Self {
        Self { min, max }
    }
}

impl<N: PartialOrd + Copy> Range<N> {
    pub fn contains(&self, value: N) -> bool {
        self.min <= value && value <= self.max
    }

    pub fn clamp(&self, value: N) -> N {
        if value < self.min {
            self.min
        } else if value > self.max {
            self.max
        } else {
            value
        }
    }

    pub fn expand(&self, new: N) -> Self {
        Self::new(
            if self.min < new { self.min } else { new },
            if self.max > new { self.max } else { new },
        )
    }

    pub fn from_iter_val(iter: impl IntoIterator<Item = N>) -> Option<Range<N>> {
        iter.into_iter().fold(None, |acc, n| match acc {
            Some(acc) => Some(acc.expand(n)),
            None => Some(Range::new(n, n)),
        })
    }
}

/// A resolved run of indices into one array axis, `start, start + step, ...`
/// with exactly `len` entries. `step` is never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexRange {
    pub start: usize,
    pub len: usize,
    pub step: isize,
}

impl IndexRange {
    pub fn full(n: usize) -> Self {
        Self {
            start: 0,
            len: n,
            step: 1,
        }
    }

    pub fn single(index: usize) -> Self {
        Self {
            start: index,
            len: 1,
            step: 1,
        }
    }

    pub fn empty() -> Self {
        Self {
            start: 0,
            len: 0,
            step: 1,
        }
    }

    /// Normalizes an open `start:stop:step` triple against an axis of
    /// length `n`, with negative bounds counting from the end and
    /// out-of-bounds values clipped. Returns `None` for a zero step.
    pub fn from_slice(start: Option<isize>, stop: Option<isize>, step: isize, n: usize) -> Option<Self> {
        if step == 0 {
            return None;
        }
        let n = n as isize;
        let (lower, upper) = if step > 0 { (0, n) } else { (-1, n - 1) };
        let clip = |v: isize| {
            if v < 0 {
                (v + n).max(lower)
            } else {
                v.min(upper)
            }
        };
        let start = start.map(clip).unwrap_or(if step > 0 { lower } else { upper });
        let stop = stop.map(clip).unwrap_or(if step > 0 { upper } else { lower });

        let len = if step > 0 && stop > start {
            (stop - start - 1) / step + 1
        } else if step < 0 && start > stop {
            (start - stop - 1) / (-step) + 1
        } else {
            0
        };

        if len == 0 {
            return Some(Self {
                start: 0,
                len: 0,
                step,
            });
        }
        Some(Self {
            start: start as usize,
            len: len as usize,
            step,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, i: usize) -> Option<usize> {
        (i < self.len).then(|| (self.start as isize + i as isize * self.step) as usize)
    }

    pub fn first(&self) -> Option<usize> {
        self.get(0)
    }

    pub fn last(&self) -> Option<usize> {
        self.len.checked_sub(1).and_then(|i| self.get(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter_map(move |i| self.get(i))
    }

    /// The equivalent ndarray slice. ndarray walks negative steps from the
    /// end of `start..end`, so the bounds are given lowest-first.
    pub fn to_slice(&self) -> Slice {
        match (self.first(), self.last()) {
            (Some(first), Some(last)) if self.step > 0 => {
                Slice::new(first as isize, Some(last as isize + 1), self.step)
            }
            (Some(first), Some(last)) => Slice::new(last as isize, Some(first as isize + 1), self.step),
            _ => Slice::new(0, Some(0), 1),
        }
    }
}
