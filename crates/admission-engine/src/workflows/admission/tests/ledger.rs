use std::sync::Arc;
use std::thread;

use proptest::prelude::*;

use super::common::*;
use crate::workflows::admission::domain::{QuotaMode, SeatState, SubregionId};
use crate::workflows::admission::quota::{AllocationError, CapacityLedger};

#[test]
fn sixth_reservation_is_waitlisted_while_global_cap_has_room() {
    let ledger = CapacityLedger::new(quotas());
    let blocking = policy(QuotaMode::Blocking, Some(100));

    for _ in 0..5 {
        assert_eq!(
            ledger.reserve(&municipality("MED"), &blocking),
            Ok(SeatState::Confirmed)
        );
    }
    assert_eq!(
        ledger.reserve(&municipality("MED"), &blocking),
        Ok(SeatState::Waitlisted)
    );

    let snapshot = ledger.snapshot(&municipality("MED")).expect("known municipality");
    assert_eq!(snapshot.confirmed, 5);
    assert_eq!(snapshot.waitlisted, 1);
    assert_eq!(snapshot.available, 0);
    assert_eq!(snapshot.occupancy_percent, 100.0);
}

#[test]
fn exhausted_global_cap_fails_without_touching_counters() {
    let ledger = CapacityLedger::new(quotas());
    let blocking = policy(QuotaMode::Blocking, Some(5));

    for _ in 0..5 {
        ledger
            .reserve(&municipality("MED"), &blocking)
            .expect("within caps");
    }

    let error = ledger
        .reserve(&municipality("MED"), &blocking)
        .expect_err("global cap exhausted");
    assert_eq!(
        error,
        AllocationError::CapacityExceeded {
            confirmed: 5,
            capacity: 5
        }
    );

    let snapshot = ledger.snapshot(&municipality("MED")).expect("known municipality");
    assert_eq!(snapshot.confirmed, 5);
    assert_eq!(snapshot.waitlisted, 0);
}

#[test]
fn global_cap_binds_even_when_municipality_has_room() {
    let ledger = CapacityLedger::new(quotas());
    let blocking = policy(QuotaMode::Blocking, Some(3));

    for _ in 0..3 {
        ledger
            .reserve(&municipality("MED"), &blocking)
            .expect("within caps");
    }

    assert!(matches!(
        ledger.reserve(&municipality("ENV"), &blocking),
        Err(AllocationError::CapacityExceeded { .. })
    ));
    assert_eq!(ledger.confirmed_total(), 3);
}

#[test]
fn open_mode_confirms_past_the_cap_and_clamps_available() {
    let ledger = CapacityLedger::new(quotas());
    let open = policy(QuotaMode::Open, Some(1));

    for _ in 0..3 {
        assert_eq!(
            ledger.reserve(&municipality("RIO"), &open),
            Ok(SeatState::Confirmed)
        );
    }

    let snapshot = ledger.snapshot(&municipality("RIO")).expect("known municipality");
    assert_eq!(snapshot.confirmed, 3);
    assert_eq!(snapshot.max, 2);
    assert_eq!(snapshot.available, 0);
    assert_eq!(snapshot.occupancy_percent, 150.0);
}

#[test]
fn switching_to_blocking_keeps_existing_confirmations() {
    let ledger = CapacityLedger::new(quotas());

    for _ in 0..3 {
        ledger
            .reserve(&municipality("RIO"), &policy(QuotaMode::Open, None))
            .expect("open mode");
    }

    let blocking = policy(QuotaMode::Blocking, None);
    assert_eq!(
        ledger.reserve(&municipality("RIO"), &blocking),
        Ok(SeatState::Waitlisted)
    );

    let snapshot = ledger.snapshot(&municipality("RIO")).expect("known municipality");
    assert_eq!(snapshot.confirmed, 3, "no retroactive eviction");

    ledger
        .release(&municipality("RIO"), SeatState::Confirmed)
        .expect("release");
    assert_eq!(
        ledger.reserve(&municipality("RIO"), &blocking),
        Ok(SeatState::Waitlisted),
        "still at the cap after dropping to two"
    );
    ledger
        .release(&municipality("RIO"), SeatState::Confirmed)
        .expect("release");
    assert_eq!(
        ledger.reserve(&municipality("RIO"), &blocking),
        Ok(SeatState::Confirmed)
    );
}

#[test]
fn release_on_empty_counter_is_not_found() {
    let ledger = CapacityLedger::new(quotas());

    let error = ledger
        .release(&municipality("ENV"), SeatState::Waitlisted)
        .expect_err("nothing waitlisted");
    assert_eq!(
        error,
        AllocationError::NotFound {
            municipality: municipality("ENV"),
            state: SeatState::Waitlisted,
        }
    );
    assert!(error.to_string().contains("waitlisted"));
}

#[test]
fn release_frees_a_global_seat() {
    let ledger = CapacityLedger::new(quotas());
    let blocking = policy(QuotaMode::Blocking, Some(1));

    ledger
        .reserve(&municipality("MED"), &blocking)
        .expect("first seat");
    assert!(ledger.reserve(&municipality("ENV"), &blocking).is_err());

    ledger
        .release(&municipality("MED"), SeatState::Confirmed)
        .expect("release");
    assert_eq!(
        ledger.reserve(&municipality("ENV"), &blocking),
        Ok(SeatState::Confirmed)
    );
}

#[test]
fn unknown_municipality_is_reported() {
    let ledger = CapacityLedger::new(quotas());
    let error = ledger
        .reserve(&municipality("XXX"), &policy(QuotaMode::Open, None))
        .expect_err("unknown");
    assert_eq!(error, AllocationError::UnknownMunicipality(municipality("XXX")));
    assert!(ledger.snapshot(&municipality("XXX")).is_err());
}

#[test]
fn promote_moves_waitlist_once_the_cap_grows() {
    let ledger = CapacityLedger::new(quotas());
    let blocking = policy(QuotaMode::Blocking, None);

    for _ in 0..3 {
        ledger
            .reserve(&municipality("RIO"), &blocking)
            .expect("reserve");
    }
    assert_eq!(ledger.promote(&municipality("RIO"), &blocking), Ok(false));

    ledger
        .set_capacity(&municipality("RIO"), 3)
        .expect("cap update");
    assert_eq!(ledger.promote(&municipality("RIO"), &blocking), Ok(true));

    let snapshot = ledger.snapshot(&municipality("RIO")).expect("known municipality");
    assert_eq!(snapshot.confirmed, 3);
    assert_eq!(snapshot.waitlisted, 0);
    assert!(ledger.promote(&municipality("RIO"), &blocking).is_err());
}

#[test]
fn occupancy_rounds_to_two_decimals_and_survives_zero_caps() {
    let ledger = CapacityLedger::new(vec![
        quota("A", "North", 3),
        quota("B", "North", 0),
        quota("C", "South", 4),
    ]);
    let open = policy(QuotaMode::Open, None);
    ledger.reserve(&municipality("A"), &open).expect("reserve");
    ledger.reserve(&municipality("B"), &open).expect("reserve");

    let a = ledger.snapshot(&municipality("A")).expect("known");
    assert_eq!(a.occupancy_percent, 33.33);

    let b = ledger.snapshot(&municipality("B")).expect("known");
    assert_eq!(b.max, 0);
    assert_eq!(b.occupancy_percent, 0.0);
    assert_eq!(b.available, 0);

    let north = ledger
        .subregion_snapshot(&SubregionId::from("North"))
        .expect("subregion present");
    assert_eq!(north.municipalities, 2);
    assert_eq!(north.quota.confirmed, 2);
    assert_eq!(north.quota.max, 3);
    assert_eq!(north.quota.occupancy_percent, 66.67);

    let global = ledger.global_snapshot();
    assert_eq!(global.confirmed, 2);
    assert_eq!(global.max, 7);
    assert_eq!(global.available, 5);
    assert_eq!(global.occupancy_percent, 28.57);

    let subregions: Vec<String> = ledger
        .subregion_snapshots()
        .into_iter()
        .map(|snapshot| snapshot.subregion_id.0)
        .collect();
    assert_eq!(subregions, vec!["North".to_string(), "South".to_string()]);
}

#[test]
fn concurrent_reservations_never_overshoot_caps() {
    let ledger = Arc::new(CapacityLedger::new(vec![
        quota("A", "North", 40),
        quota("B", "North", 40),
    ]));
    let blocking = policy(QuotaMode::Blocking, Some(60));

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let ledger = ledger.clone();
            let blocking = blocking.clone();
            thread::spawn(move || {
                let target = if worker % 2 == 0 { "A" } else { "B" };
                for _ in 0..25 {
                    let _ = ledger.reserve(&municipality(target), &blocking);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker finished");
    }

    let a = ledger.snapshot(&municipality("A")).expect("known");
    let b = ledger.snapshot(&municipality("B")).expect("known");
    assert!(a.confirmed <= 40);
    assert!(b.confirmed <= 40);
    assert_eq!(a.confirmed + b.confirmed, 60);
    assert_eq!(ledger.confirmed_total(), 60);
}

#[derive(Debug, Clone)]
enum Op {
    Reserve,
    ReleaseConfirmed,
    ReleaseWaitlisted,
    SetCapacity(u32),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => Just(Op::Reserve),
        2 => Just(Op::ReleaseConfirmed),
        1 => Just(Op::ReleaseWaitlisted),
        1 => (0u32..8).prop_map(Op::SetCapacity),
    ]
}

proptest! {
    #[test]
    fn blocking_confirmations_stay_within_the_cap(
        initial_cap in 0u32..8,
        ops in prop::collection::vec(op_strategy(), 0..120),
    ) {
        let ledger = CapacityLedger::new(vec![quota("A", "North", initial_cap)]);
        let blocking = policy(QuotaMode::Blocking, None);
        let mut cap = initial_cap as u64;

        for op in ops {
            let before = ledger.snapshot(&municipality("A")).expect("known");
            match op {
                Op::Reserve => {
                    let seat = ledger.reserve(&municipality("A"), &blocking).expect("no global cap");
                    if seat == SeatState::Confirmed {
                        prop_assert!(before.confirmed < cap);
                    }
                }
                Op::ReleaseConfirmed => {
                    let result = ledger.release(&municipality("A"), SeatState::Confirmed);
                    prop_assert_eq!(result.is_err(), before.confirmed == 0);
                }
                Op::ReleaseWaitlisted => {
                    let result = ledger.release(&municipality("A"), SeatState::Waitlisted);
                    prop_assert_eq!(result.is_err(), before.waitlisted == 0);
                }
                Op::SetCapacity(next) => {
                    ledger.set_capacity(&municipality("A"), next).expect("known");
                    cap = next as u64;
                }
            }

            let after = ledger.snapshot(&municipality("A")).expect("known");
            if after.confirmed > before.confirmed {
                prop_assert!(after.confirmed <= cap);
            }
            prop_assert_eq!(after.available, cap.saturating_sub(after.confirmed));
            prop_assert_eq!(ledger.confirmed_total(), after.confirmed);
        }
    }
}
