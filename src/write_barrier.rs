use crate::generational::GcReason;
use crate::heap::Heap;
use crate::value::{Address, Space, Value};
use crate::visitor::ObjectTracer;

impl<T: ObjectTracer> Heap<T> {
    /// Record that `slot`, outside the birth region, may now hold a birth reference.
    ///
    /// Runs a minor collection when the store buffer is about to meet the allocation cursor.
    #[track_caller]
    pub fn notify_store(&mut self, slot: Address) {
        if slot.space() == Space::Birth {
            return;
        }
        if self.config.store_buffer_dedup && self.regions.nursery.recently_remembered(slot) {
            self.stats.barrier_duplicates += 1;
            return;
        }
        tracing::trace!(slot = ?slot, "slot remembered");
        self.stats.barrier_records += 1;
        if self.regions.nursery.remember(slot) {
            self.collect_with(0, false, GcReason::StoreBufferFull);
        }
    }

    /// Store `value` into `slot` and apply the write barrier.
    #[track_caller]
    pub fn write(&mut self, slot: Address, value: Value) {
        self.store(slot, value.raw());
        let young = value
            .as_address()
            .map_or(false, |target| target.space() == Space::Birth);
        if young && slot.space() != Space::Birth {
            self.notify_store(slot);
        }
    }
}
