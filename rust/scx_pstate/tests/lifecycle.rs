mod common;

use std::sync::Arc;
use std::thread;

use common::driver;
use common::four_states;
use scx_pstate::PolicyLimits;
use scx_pstate::TABLE_END;

#[test]
fn init_exports_hz_table_and_latency() {
    let mut p = four_states();
    p.states[2].transition_latency_us = 150;
    let (drv, _, _) = driver(p);
    let act = drv.init(0).unwrap();
    assert_eq!(
        act.freq_table.as_slice(),
        &[3_000_000, 2_600_000, 2_200_000, 1_800_000, TABLE_END]
    );
    assert_eq!(act.transition_latency_ns, 150_000);
}

#[test]
fn exit_releases_and_allows_reinit() {
    let (drv, platform, _) = driver(four_states());
    drv.init(1).unwrap();
    drv.target(1, 3).unwrap();
    drv.exit(1);
    assert!(!drv.registry().is_managed(1));
    drv.exit(1);

    // FRESH TABLE: BACK AT THE PLATFORM STATE WITH RESYNC PENDING
    drv.init(1).unwrap();
    let table = drv.state_table(1).unwrap();
    assert_eq!(table.current_index(), 0);
    assert!(table.needs_reinit());
    drv.target(1, 0).unwrap();
    assert_eq!(platform.hardware(1).unwrap().commits(), vec![0x0d, 0x0a]);
}

#[test]
fn verify_uses_exported_table() {
    let (drv, _, _) = driver(four_states());
    drv.init(0).unwrap();
    let mut limits = PolicyLimits {
        min: 1_900_000,
        max: 2_100_000,
    };
    drv.verify(0, &mut limits).unwrap();
    assert_eq!(
        limits,
        PolicyLimits {
            min: 1_900_000,
            max: 2_200_000
        }
    );
    assert!(drv.verify(3, &mut limits).is_err());
}

#[test]
fn processors_are_independent() {
    let (drv, platform, _) = driver(four_states());
    for cpu in 0..4 {
        drv.init(cpu).unwrap();
    }
    let drv = Arc::new(drv);

    let handles: Vec<_> = (0..4)
        .map(|cpu| {
            let drv = drv.clone();
            thread::spawn(move || {
                for _ in 0..16 {
                    drv.target(cpu, cpu).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    for cpu in 0..4 {
        assert_eq!(drv.state_table(cpu).unwrap().current_index(), cpu);
        // CPU0 RESYNCS IN PLACE, THE OTHERS MOVE AND THEN RESYNC
        let writes = if cpu == 0 { 1 } else { 2 };
        assert_eq!(platform.hardware(cpu).unwrap().commits().len(), writes);
        assert!(!drv.state_table(cpu).unwrap().needs_reinit());
    }
}
