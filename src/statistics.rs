use crate::util::formatted_size;

/// Snapshot returned by [`Heap::statistics`](crate::Heap::statistics). Sizes are in bytes.
#[derive(Clone, Debug, Default)]
pub struct HeapStatistics {
    pub minor_collections: usize,
    pub full_collections: usize,
    /// Bytes copied out of the birth region by minor collections.
    pub total_promoted: usize,
    /// Bytes copied by the last collection of either kind.
    pub last_copied: usize,
    pub barrier_records: usize,
    /// Barrier calls absorbed by the dedup window.
    pub barrier_duplicates: usize,
    pub fixed_allocated: usize,
    pub fixed_reclaimed: usize,
    pub destructors_run: usize,
    pub fixed_live: usize,
    pub fixed_live_bytes: usize,
    pub birth_used: usize,
    pub birth_capacity: usize,
    pub remembered: usize,
    pub old_used: usize,
    pub old_capacity: usize,
}

impl std::fmt::Display for HeapStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Heap statistics:")?;
        writeln!(
            f,
            "  Birth region: {} of {} ({} remembered slots)",
            formatted_size(self.birth_used),
            formatted_size(self.birth_capacity),
            self.remembered
        )?;
        writeln!(
            f,
            "  Old region: {} of {}",
            formatted_size(self.old_used),
            formatted_size(self.old_capacity)
        )?;
        writeln!(
            f,
            "  Fixed region: {} objects, {}",
            self.fixed_live,
            formatted_size(self.fixed_live_bytes)
        )?;
        writeln!(
            f,
            "  Collections: {} minor, {} full",
            self.minor_collections, self.full_collections
        )?;
        writeln!(
            f,
            "  Total promoted: {} (last cycle copied {})",
            formatted_size(self.total_promoted),
            formatted_size(self.last_copied)
        )?;
        writeln!(
            f,
            "  Barrier records: {} ({} duplicates skipped)",
            self.barrier_records, self.barrier_duplicates
        )?;
        writeln!(
            f,
            "  Fixed objects allocated: {}, reclaimed: {}, destructors run: {}",
            self.fixed_allocated, self.fixed_reclaimed, self.destructors_run
        )?;
        Ok(())
    }
}
