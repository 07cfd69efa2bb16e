//! Size classes of the fixed region, in words.

pub const SIZE_STEP: usize = 2;
pub const PRECISE_CUTOFF: usize = 16;
/// Requests above this many words get an exact-size slot on the large free list.
pub const LARGE_CUTOFF: usize = 2048;
pub const DEFAULT_PROGRESSION: f64 = 1.4;

const fn round_up_to_multiple_of(divisor: usize, x: usize) -> usize {
    (x + (divisor - 1)) & !(divisor - 1)
}

/// Step classes up to [`PRECISE_CUTOFF`], then a geometric progression up to [`LARGE_CUTOFF`].
pub fn size_classes(size_class_progression: f64) -> Vec<usize> {
    let mut result = Vec::new();

    let mut size = SIZE_STEP;
    while size < PRECISE_CUTOFF {
        result.push(size);
        size += SIZE_STEP;
    }

    for i in 0.. {
        let approximate_size = PRECISE_CUTOFF as f64 * size_class_progression.powi(i);
        let approximate_words = approximate_size as usize;
        if approximate_words > LARGE_CUTOFF {
            break;
        }

        let size_class = round_up_to_multiple_of(SIZE_STEP, approximate_words);
        if Some(&size_class) == result.last() {
            continue;
        }
        result.push(size_class);
    }

    result.push(LARGE_CUTOFF);
    result.sort_unstable();
    result.dedup();
    result
}

pub struct SizeClasses {
    classes: Vec<usize>,
}

impl SizeClasses {
    pub fn new(progression: f64) -> Self {
        Self {
            classes: size_classes(progression),
        }
    }

    /// Index of the large class. Also the number of regular classes.
    pub fn large(&self) -> usize {
        self.classes.len()
    }

    /// Smallest class holding `words`, or [`SizeClasses::large`].
    pub fn index_for(&self, words: usize) -> usize {
        self.classes.partition_point(|&class| class < words)
    }

    /// Slot size of a class. The large class rounds to the step instead.
    pub fn capacity(&self, index: usize, words: usize) -> usize {
        match self.classes.get(index) {
            Some(&class) => class,
            None => round_up_to_multiple_of(SIZE_STEP, words),
        }
    }
}
