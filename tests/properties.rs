use proptest::prelude::*;
use qish::{
    Address, Config, FatalMode, Heap, ObjectTracer, Value, ValueKind, Visitor, Word, WORD_SIZE,
};
use std::collections::HashMap;

/// Nodes are `[tagged 3, tagged id, left, right]`.
struct Nodes;

const NODE_WORDS: usize = 4;

impl ObjectTracer for Nodes {
    fn copy(&self, dst: &mut [Word], src: &[Word]) -> usize {
        let words = Value::from_raw(src[0]).as_integer().unwrap_or(0) as usize + 1;
        dst[..words].copy_from_slice(&src[..words]);
        words
    }

    fn scan_minor(&self, object: Address, visitor: &mut Visitor<'_, Self>) -> Address {
        let fields = visitor.load_value(object).as_integer().unwrap_or(0) as usize;
        for field in 1..=fields {
            visitor.visit_slot(object.add(field));
        }
        object.add(fields + 1)
    }

    fn scan_fixed_minor(&self, payload: Address, words: usize, visitor: &mut Visitor<'_, Self>) {
        for word in 0..words {
            visitor.visit_slot(payload.add(word));
        }
    }
}

qish::frame_descriptor!(static ROOTS: "roots", params = 0, locals = 8);

fn heap(dedup: bool) -> Heap<Nodes> {
    let config = Config {
        birth_size: 64 * 1024,
        old_size: 256 * 1024,
        store_buffer_dedup: dedup,
        on_fatal: FatalMode::Panic,
        ..Config::default()
    };
    Heap::new(config, Nodes).unwrap()
}

fn node(heap: &mut Heap<Nodes>, id: usize) -> Address {
    let object = heap.allocate(NODE_WORDS * WORD_SIZE);
    heap.store(object, Value::tagged(3).raw());
    heap.store(object.add(1), Value::tagged(id as isize).raw());
    heap.store(object.add(2), Value::NULL.raw());
    heap.store(object.add(3), Value::NULL.raw());
    object
}

fn id_of(heap: &Heap<Nodes>, value: Value) -> Option<isize> {
    value
        .as_address()
        .and_then(|object| heap.read(object.add(1)).as_integer())
}

/// Walk everything reachable from `roots` and return each node's children by id. Fails if a
/// reachable reference is not in the old region.
fn shape(heap: &Heap<Nodes>, roots: &[Value]) -> Result<HashMap<isize, [Option<isize>; 2]>, String> {
    let mut seen = HashMap::new();
    let mut pending: Vec<Value> = roots.to_vec();
    while let Some(value) = pending.pop() {
        let Some(object) = value.as_address() else {
            continue;
        };
        if !matches!(heap.classify(value), ValueKind::Old(_)) {
            return Err(format!("{:?} is {:?}", object, heap.classify(value)));
        }
        let id = heap.read(object.add(1)).as_integer().unwrap_or(-1);
        if seen.contains_key(&id) {
            continue;
        }
        let left = heap.read(object.add(2));
        let right = heap.read(object.add(3));
        seen.insert(id, [id_of(heap, left), id_of(heap, right)]);
        pending.push(left);
        pending.push(right);
    }
    Ok(seen)
}

fn graph() -> impl Strategy<Value = (usize, Vec<(usize, usize, usize)>, Vec<usize>)> {
    (2usize..40).prop_flat_map(|count| {
        (
            Just(count),
            prop::collection::vec((0..count, 0..2usize, 0..count), 0..80),
            prop::collection::vec(0..count, 1..8),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn integers_survive_tagging(n in (qish::Value::MIN_INTEGER..=qish::Value::MAX_INTEGER)) {
        let value = Value::tagged(n);
        prop_assert!(value.is_integer());
        prop_assert_eq!(value.as_integer(), Some(n));
        prop_assert_eq!(value.as_address(), None);
    }

    #[test]
    fn collections_preserve_reachable_graph((count, edges, roots) in graph(), full in any::<bool>()) {
        let mut heap = heap(true);
        let frame = heap.enter_frame(&ROOTS, &[]);
        let nodes: Vec<Address> = (0..count).map(|id| node(&mut heap, id)).collect();
        let mut expected: HashMap<isize, [Option<isize>; 2]> = HashMap::new();
        for &(from, side, to) in &edges {
            heap.store(nodes[from].add(2 + side), nodes[to].raw());
        }
        for (index, &root) in roots.iter().enumerate() {
            heap.set_local(frame, index, nodes[root].into());
        }
        let mut pending: Vec<usize> = roots.clone();
        while let Some(id) = pending.pop() {
            if expected.contains_key(&(id as isize)) {
                continue;
            }
            let mut children = [None, None];
            for side in 0..2 {
                let child = heap.read(nodes[id].add(2 + side));
                if let Some(child_id) = id_of(&heap, child) {
                    children[side] = Some(child_id);
                    pending.push(child_id as usize);
                }
            }
            expected.insert(id as isize, children);
        }

        heap.collect(0, full);
        let roots: Vec<Value> = (0..roots.len()).map(|index| heap.local(frame, index)).collect();
        let after = shape(&heap, &roots).map_err(TestCaseError::fail)?;
        prop_assert_eq!(after, expected);
        prop_assert_eq!(heap.birth_region().cur, heap.birth_region().low);
        heap.exit_frame(frame);
    }

    #[test]
    fn barrier_keeps_old_to_young_references(
        writes in prop::collection::vec((0..6usize, prop::option::of(0..10usize)), 1..60),
        dedup in any::<bool>(),
    ) {
        let mut heap = heap(dedup);
        let frame = heap.enter_frame(&ROOTS, &[]);
        let holder = heap.allocate(7 * WORD_SIZE);
        heap.store(holder, Value::tagged(6).raw());
        for field in 1..=6 {
            heap.store(holder.add(field), Value::NULL.raw());
        }
        heap.set_local(frame, 0, holder.into());
        heap.collect(0, false);
        let holder = heap.local(frame, 0).as_address().unwrap();

        let young: Vec<Address> = (0..10).map(|id| node(&mut heap, id)).collect();
        let mut expected = [None; 6];
        for &(field, target) in &writes {
            let value = target.map_or(Value::tagged(-1), |id| young[id].into());
            heap.write(holder.add(1 + field), value);
            expected[field] = Some(target.map(|id| id as isize));
        }
        heap.collect(0, false);

        for (field, expected) in expected.iter().enumerate() {
            let value = heap.read(holder.add(1 + field));
            match expected {
                None => prop_assert_eq!(value, Value::NULL),
                Some(None) => prop_assert_eq!(value, Value::tagged(-1)),
                Some(Some(id)) => {
                    prop_assert!(matches!(heap.classify(value), ValueKind::Old(_)));
                    prop_assert_eq!(id_of(&heap, value), Some(*id));
                }
            }
        }
        heap.exit_frame(frame);
    }

    #[test]
    fn frames_pop_in_reverse_order(depth in 1usize..20) {
        let mut heap = heap(true);
        let frames: Vec<_> = (0..depth).map(|_| heap.enter_frame(&ROOTS, &[])).collect();
        prop_assert_eq!(heap.frame_depth(), depth);
        for frame in frames.iter().rev() {
            prop_assert_eq!(heap.current_frame(), Some(*frame));
            heap.exit_frame(*frame);
        }
        prop_assert_eq!(heap.current_frame(), None);
    }
}
