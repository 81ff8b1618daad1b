use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use genheap::{ConcurrentMap, HeapBuilder, InvalidArgument, MapConfig};

/// Every thread puts its own range of keys. No key is written twice.
fn disjoint_puts(threads: u64, keys_per_thread: u64, config: MapConfig) {
    let map = Arc::new(ConcurrentMap::with_config(config));
    let barrier = Arc::new(Barrier::new(threads as usize));
    let workers: Vec<_> = (0..threads)
        .map(|t| {
            let map = map.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for i in 0..keys_per_thread {
                    let key = t * keys_per_thread + i;
                    assert_eq!(map.put(key, key * 10), Ok(None));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let total = threads * keys_per_thread;
    assert_eq!(map.size(), total as usize);
    for key in 0..total {
        assert_eq!(map.get(&key), Ok(Some(key * 10)));
    }
    let keys: HashSet<u64> = map.keys().into_iter().collect();
    assert_eq!(keys.len(), total as usize);
}

macro_rules! disjoint_put_tests {
    ($($threads:literal x $keys:literal),*) => {
        paste::paste! {
            $(
                #[test]
                fn [<disjoint_puts_ $threads _threads_ $keys _keys>]() {
                    disjoint_puts($threads, $keys, MapConfig::default());
                }

                #[test]
                fn [<disjoint_puts_ $threads _threads_ $keys _keys_from_one_bucket>]() {
                    disjoint_puts($threads, $keys, MapConfig {
                        initial_capacity: 1,
                        ..MapConfig::default()
                    });
                }
            )*
        }
    };
}

disjoint_put_tests!(1 x 1000, 2 x 2000, 4 x 1000, 8 x 500);

#[test]
fn racing_puts_of_one_key() {
    for _ in 0..100 {
        let map: Arc<ConcurrentMap<&'static str, u32>> = Arc::new(ConcurrentMap::new());
        let barrier = Arc::new(Barrier::new(2));
        let workers: Vec<_> = [1, 2]
            .into_iter()
            .map(|value| {
                let map = map.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    map.put("x", value).unwrap()
                })
            })
            .collect();
        let previous: Vec<Option<u32>> = workers.into_iter().map(|w| w.join().unwrap()).collect();

        let last = map.get(&"x").unwrap().unwrap();
        assert!(last == 1 || last == 2);
        assert_eq!(map.size(), 1);
        // Exactly one of the writers saw the other's value.
        assert_eq!(previous.iter().filter(|p| p.is_none()).count(), 1);
        assert!(previous.contains(&Some(3 - last)));
    }
}

#[test]
fn readers_never_see_a_missing_key_during_resize() {
    let map: Arc<ConcurrentMap<u64, u64>> = Arc::new(ConcurrentMap::new());
    for key in 0..64 {
        map.put(key, key).unwrap();
    }
    let writer = {
        let map = map.clone();
        thread::spawn(move || {
            // Forces a long series of resizes.
            for key in 64..20_000 {
                map.put(key, key).unwrap();
            }
        })
    };
    let readers: Vec<_> = (0..3)
        .map(|_| {
            let map = map.clone();
            thread::spawn(move || {
                for round in 0..200 {
                    for key in 0..64 {
                        assert_eq!(map.get(&key), Ok(Some(key)), "round {}", round);
                    }
                }
            })
        })
        .collect();
    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert!(map.capacity() >= 20_000 * 4 / 3);
    assert_eq!(map.size(), 20_000);
}

#[test]
fn concurrent_removes_and_updates() {
    let map: Arc<ConcurrentMap<u64, u64>> = Arc::new(ConcurrentMap::new());
    for key in 0..4000 {
        map.put(key, 0).unwrap();
    }
    let workers: Vec<_> = (0..4u64)
        .map(|t| {
            let map = map.clone();
            thread::spawn(move || {
                for key in 0..4000u64 {
                    if key % 4 == t {
                        // Other threads may have updated it first.
                        assert!(map.remove(&key).unwrap().is_some());
                    } else {
                        map.compute_if_present(&key, |v| Some(v + 1)).unwrap();
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert!(map.is_empty());
    for key in 0..4000 {
        assert_eq!(map.get(&key), Ok(None));
    }
}

#[test]
fn null_keys_and_values_are_rejected() {
    let map: ConcurrentMap<Option<String>, Option<u8>> = ConcurrentMap::new();
    assert_eq!(map.put(None, Some(1)), Err(InvalidArgument::NullKey));
    assert_eq!(map.put(Some("k".into()), None), Err(InvalidArgument::NullValue));
    assert_eq!(map.put_if_absent(Some("k".into()), None), Err(InvalidArgument::NullValue));
    assert_eq!(map.contains_key(&None), Err(InvalidArgument::NullKey));
    assert_eq!(map.size(), 0);
    assert_eq!(
        InvalidArgument::NullKey.to_string(),
        "null keys are not permitted"
    );
}

#[test]
fn config_from_heap_options() {
    let mut builder = HeapBuilder::new_no_env_vars();
    assert!(builder.set_options_bulk_by_str("map_initial_capacity=4 map_load_factor=0.5"));
    let config = MapConfig::from_options(&builder.options);
    let map: ConcurrentMap<u32, u32> = ConcurrentMap::with_config(config);
    assert_eq!(map.capacity(), 4);
    assert_eq!(map.config().load_factor, 0.5);
    assert_eq!(map.config().treeify_threshold, 8);
    map.put(1, 1).unwrap();
    map.put(2, 2).unwrap();
    assert_eq!(map.capacity(), 8);
}
