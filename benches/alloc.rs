use criterion::Criterion;
use std::hint::black_box;

use genheap::{HeapBuilder, ObjectReference};

pub fn bench(c: &mut Criterion) {
    c.bench_function("alloc_no_gc", |b| {
        // A large Eden so the fast path never collects within one batch.
        let mut builder = HeapBuilder::new_no_env_vars();
        builder.set_option("eden_size", &(64 << 20).to_string());
        let heap = builder.build();
        b.iter(|| black_box(heap.allocate(16, &[])))
    });

    c.bench_function("alloc_young_gc", |b| {
        let mut builder = HeapBuilder::new_no_env_vars();
        builder.set_options_bulk_by_str("eden_size=65536 survivor_size=65536 old_size=1048576");
        let heap = builder.build();
        // A small linked list stays live across collections.
        let mut roots: Vec<ObjectReference> = vec![];
        for _ in 0..64 {
            let object = heap.allocate(32, &roots).unwrap();
            if let Some(&last) = roots.last() {
                heap.set_fields(object, vec![last]).unwrap();
            }
            roots = vec![object];
        }
        b.iter(|| black_box(heap.allocate(64, &roots)))
    });
}
