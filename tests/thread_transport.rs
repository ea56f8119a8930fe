use mesh_conduit::prelude::*;

#[test]
fn thread_duct_streams_in_order() {
    const N: u64 = 20_000;
    let (mut inlet, mut outlet) = Conduit::with_impl(ThreadDuct::<u64>::new(16)).into_parts();
    std::thread::scope(|s| {
        s.spawn(move || {
            for i in 1..=N {
                inlet.sure_put(i);
            }
        });
        let mut expected = 1;
        while expected <= N {
            assert_eq!(outlet.get_next(), expected);
            expected += 1;
        }
    });
}

#[test]
fn lossy_consumer_sees_increasing_values() {
    const N: u64 = 5_000;
    let (mut inlet, mut outlet) = Conduit::with_impl(ThreadDuct::<u64>::new(4)).into_parts();
    let seen = std::thread::scope(|s| {
        let consumer = s.spawn(move || {
            let mut seen = Vec::new();
            loop {
                let val = outlet.jump_get();
                if seen.last() != Some(&val) {
                    seen.push(val);
                }
                if val == N {
                    break seen;
                }
            }
        });
        for i in 1..=N {
            // drops are fine; only the final value must get through
            if i < N {
                inlet.try_put(i);
            } else {
                inlet.sure_put(i);
            }
        }
        consumer.join().unwrap()
    });
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(seen.last(), Some(&N));
}
