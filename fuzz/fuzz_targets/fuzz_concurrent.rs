#![no_main]

//! Fuzz target for concurrent component creation
//!
//! Threads race to create the same singletons. Each singleton supplier must
//! run exactly once and every thread must observe the same instance.

use arbitrary::Arbitrary;
use lifecycle_container::{ComponentDescriptor, Container, Instance, Scope};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

#[derive(Debug, Clone, Arbitrary)]
enum ThreadOp {
    Get(u8),
    Contains(u8),
    Stage(u8),
}

#[derive(Debug, Arbitrary)]
struct ConcurrentScenario {
    // Scope per component: true for prototype
    prototypes: Vec<bool>,
    // Number of threads (clamped to 1-8)
    thread_count: u8,
    ops_per_thread: Vec<ThreadOp>,
}

fuzz_target!(|scenario: ConcurrentScenario| {
    let prototypes: Vec<bool> = scenario.prototypes.into_iter().take(8).collect();
    if prototypes.is_empty() {
        return;
    }
    let count = prototypes.len();

    let container = Container::new();
    let created: Arc<Vec<AtomicUsize>> = Arc::new((0..count).map(|_| AtomicUsize::new(0)).collect());

    for (index, prototype) in prototypes.iter().enumerate() {
        let counters = Arc::clone(&created);
        let mut descriptor = ComponentDescriptor::new(format!("c{index}")).supplier(move || {
            counters[index].fetch_add(1, Ordering::SeqCst);
            Ok(index)
        });
        if *prototype {
            descriptor = descriptor.scope(Scope::Prototype);
        }
        container.define(descriptor).unwrap();
    }

    let thread_count = (scenario.thread_count % 8).max(1) as usize;
    let ops = scenario.ops_per_thread;

    let handles: Vec<_> = (0..thread_count)
        .map(|_| {
            let container = container.clone();
            let ops = ops.clone();
            thread::spawn(move || {
                let mut seen: Vec<(usize, Instance)> = Vec::new();
                for op in ops.into_iter().take(50) {
                    match op {
                        ThreadOp::Get(i) => {
                            let index = i as usize % count;
                            let got = container.get(&format!("c{index}")).unwrap();
                            seen.push((index, got));
                        }
                        ThreadOp::Contains(i) => {
                            assert!(container.contains(&format!("c{}", i as usize % count)));
                        }
                        ThreadOp::Stage(i) => {
                            let _ = container.singleton_stage(&format!("c{}", i as usize % count));
                        }
                    }
                }
                seen
            })
        })
        .collect();

    let seen: Vec<(usize, Instance)> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    for (index, prototype) in prototypes.iter().enumerate() {
        if *prototype {
            continue;
        }
        let instances: Vec<&Instance> = seen.iter().filter(|(i, _)| *i == index).map(|(_, inst)| inst).collect();
        assert!(created[index].load(Ordering::SeqCst) <= 1);
        assert!(instances.windows(2).all(|w| Arc::ptr_eq(w[0], w[1])));
    }
});
