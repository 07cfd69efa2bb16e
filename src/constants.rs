use crate::value::Value;
use bit_vec::BitVec;

/// Slots covered by one dirty bit.
pub const DIRTY_GROUP: usize = 8;

/// Indexed table of global roots with a dirty bit per group of [`DIRTY_GROUP`] slots.
pub struct ConstantTable {
    slots: Vec<Value>,
    dirty: BitVec,
}

impl ConstantTable {
    /// `capacity` is rounded up to a power of two.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(DIRTY_GROUP).next_power_of_two();
        Self {
            slots: vec![Value::NULL; capacity],
            dirty: BitVec::from_elem(capacity / DIRTY_GROUP, false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Null for slots never written.
    pub fn get(&self, index: usize) -> Value {
        self.slots.get(index).copied().unwrap_or(Value::NULL)
    }

    /// Store `value` and mark its group dirty, growing the table to the next power of two when
    /// `index` is past the end.
    pub fn set(&mut self, index: usize, value: Value) {
        if index >= self.slots.len() {
            let capacity = (index + 1).next_power_of_two();
            self.slots.resize(capacity, Value::NULL);
            let groups = capacity / DIRTY_GROUP;
            self.dirty.grow(groups - self.dirty.len(), false);
        }
        self.slots[index] = value;
        self.dirty.set(index / DIRTY_GROUP, true);
    }

    pub fn is_dirty(&self, index: usize) -> bool {
        self.dirty.get(index / DIRTY_GROUP).unwrap_or(false)
    }

    pub fn dirty_groups(&self) -> usize {
        self.dirty.iter().filter(|&bit| bit).count()
    }

    /// Slots of every dirty group.
    pub(crate) fn walk_dirty(&mut self, mut visitor: impl FnMut(&mut Value)) {
        for (group, dirty) in self.dirty.iter().enumerate() {
            if !dirty {
                continue;
            }
            let start = group * DIRTY_GROUP;
            for slot in &mut self.slots[start..start + DIRTY_GROUP] {
                visitor(slot);
            }
        }
    }

    pub(crate) fn walk_all(&mut self, mut visitor: impl FnMut(&mut Value)) {
        for slot in &mut self.slots {
            visitor(slot);
        }
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_mark_their_group() {
        let mut table = ConstantTable::with_capacity(20);
        assert_eq!(table.capacity(), 32);
        table.set(9, Value::tagged(3));
        assert!(table.is_dirty(8));
        assert!(table.is_dirty(15));
        assert!(!table.is_dirty(16));
        assert_eq!(table.dirty_groups(), 1);

        let mut visited = 0;
        table.walk_dirty(|_| visited += 1);
        assert_eq!(visited, DIRTY_GROUP);

        table.clear_dirty();
        assert_eq!(table.dirty_groups(), 0);
        assert_eq!(table.get(9), Value::tagged(3));
        assert_eq!(table.get(1000), Value::NULL);
    }

    #[test]
    fn grows_to_power_of_two() {
        let mut table = ConstantTable::with_capacity(8);
        table.set(100, Value::tagged(1));
        assert_eq!(table.capacity(), 128);
        assert!(table.is_dirty(100));
        assert_eq!(table.get(100), Value::tagged(1));
    }
}
