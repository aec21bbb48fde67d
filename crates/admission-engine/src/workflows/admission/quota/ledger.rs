use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use serde::Serialize;

use super::super::domain::{
    MunicipalityId, MunicipalityQuota, QuotaMode, QuotaPolicy, SeatState, SubregionId,
};
use super::AllocationError;

#[derive(Debug)]
struct QuotaCounters {
    subregion_id: SubregionId,
    capacity_max: u32,
    confirmed: u32,
    waitlisted: u32,
}

impl From<MunicipalityQuota> for QuotaCounters {
    fn from(quota: MunicipalityQuota) -> Self {
        Self {
            subregion_id: quota.subregion_id,
            capacity_max: quota.capacity_max,
            confirmed: quota.confirmed_count,
            waitlisted: quota.waitlist_count,
        }
    }
}

/// Read-only occupancy projection for a municipality, subregion, or the whole program.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuotaSnapshot {
    pub confirmed: u64,
    pub waitlisted: u64,
    pub max: u64,
    pub available: u64,
    pub occupancy_percent: f64,
}

impl QuotaSnapshot {
    fn from_counts(confirmed: u64, waitlisted: u64, max: u64) -> Self {
        let occupancy_percent = if max == 0 {
            0.0
        } else {
            ((confirmed as f64 / max as f64) * 100.0 * 100.0).round() / 100.0
        };

        Self {
            confirmed,
            waitlisted,
            max,
            available: max.saturating_sub(confirmed),
            occupancy_percent,
        }
    }

    fn empty() -> Self {
        Self::from_counts(0, 0, 0)
    }

    fn absorb(self, other: QuotaSnapshot) -> Self {
        Self::from_counts(
            self.confirmed + other.confirmed,
            self.waitlisted + other.waitlisted,
            self.max + other.max,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MunicipalitySnapshot {
    pub municipality_id: MunicipalityId,
    pub subregion_id: SubregionId,
    #[serde(flatten)]
    pub quota: QuotaSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubregionSnapshot {
    pub subregion_id: SubregionId,
    pub municipalities: usize,
    #[serde(flatten)]
    pub quota: QuotaSnapshot,
}

/// Per-municipality seat counters.
///
/// Reservations for one municipality are serialized by that municipality's mutex while
/// different municipalities proceed in parallel. The program-wide confirmed total is an
/// atomic claimed with compare-and-swap while the municipality lock is held, so the global
/// cap cannot be overshot by two municipalities confirming at once.
#[derive(Debug, Default)]
pub struct CapacityLedger {
    municipalities: RwLock<HashMap<MunicipalityId, Mutex<QuotaCounters>>>,
    confirmed_total: AtomicU64,
}

impl CapacityLedger {
    pub fn new(quotas: Vec<MunicipalityQuota>) -> Self {
        let ledger = Self::default();
        ledger.replace(quotas);
        ledger
    }

    /// Install a new cycle's quota rows wholesale.
    pub fn replace(&self, quotas: Vec<MunicipalityQuota>) {
        let mut guard = self.municipalities.write().expect("ledger lock poisoned");
        let total: u64 = quotas.iter().map(|quota| quota.confirmed_count as u64).sum();
        *guard = quotas
            .into_iter()
            .map(|quota| (quota.municipality_id.clone(), Mutex::new(quota.into())))
            .collect();
        self.confirmed_total.store(total, Ordering::SeqCst);
    }

    pub fn contains(&self, municipality: &MunicipalityId) -> bool {
        self.municipalities
            .read()
            .expect("ledger lock poisoned")
            .contains_key(municipality)
    }

    pub fn confirmed_total(&self) -> u64 {
        self.confirmed_total.load(Ordering::SeqCst)
    }

    /// Confirm a seat if the policy allows it, otherwise place the request on the waitlist.
    ///
    /// Under blocking mode a request that cannot be confirmed while the global cap is
    /// exhausted fails with [`AllocationError::CapacityExceeded`] and leaves every counter
    /// untouched.
    pub fn reserve(
        &self,
        municipality: &MunicipalityId,
        policy: &QuotaPolicy,
    ) -> Result<SeatState, AllocationError> {
        self.with_counters(municipality, |counters| {
            if policy.mode == QuotaMode::Open {
                counters.confirmed += 1;
                self.confirmed_total.fetch_add(1, Ordering::SeqCst);
                return Ok(SeatState::Confirmed);
            }

            if counters.confirmed < counters.capacity_max {
                self.claim_global_seat(policy.global_capacity_max)?;
                counters.confirmed += 1;
                return Ok(SeatState::Confirmed);
            }

            self.ensure_global_room(policy.global_capacity_max)?;
            counters.waitlisted += 1;
            Ok(SeatState::Waitlisted)
        })
    }

    /// Give back a seat previously handed out by [`CapacityLedger::reserve`].
    pub fn release(
        &self,
        municipality: &MunicipalityId,
        from_state: SeatState,
    ) -> Result<(), AllocationError> {
        self.with_counters(municipality, |counters| {
            let counter = match from_state {
                SeatState::Confirmed => &mut counters.confirmed,
                SeatState::Waitlisted => &mut counters.waitlisted,
            };
            if *counter == 0 {
                return Err(AllocationError::NotFound {
                    municipality: municipality.clone(),
                    state: from_state,
                });
            }
            *counter -= 1;
            if from_state == SeatState::Confirmed {
                self.confirmed_total.fetch_sub(1, Ordering::SeqCst);
            }
            Ok(())
        })
    }

    /// Move one waitlisted seat to confirmed when the policy has room for it.
    pub fn promote(
        &self,
        municipality: &MunicipalityId,
        policy: &QuotaPolicy,
    ) -> Result<bool, AllocationError> {
        self.with_counters(municipality, |counters| {
            if counters.waitlisted == 0 {
                return Err(AllocationError::NotFound {
                    municipality: municipality.clone(),
                    state: SeatState::Waitlisted,
                });
            }

            match policy.mode {
                QuotaMode::Open => {
                    self.confirmed_total.fetch_add(1, Ordering::SeqCst);
                }
                QuotaMode::Blocking => {
                    if counters.confirmed >= counters.capacity_max
                        || self.claim_global_seat(policy.global_capacity_max).is_err()
                    {
                        return Ok(false);
                    }
                }
            }

            counters.waitlisted -= 1;
            counters.confirmed += 1;
            Ok(true)
        })
    }

    /// Administrative cap change. Never evicts confirmed seats.
    pub fn set_capacity(
        &self,
        municipality: &MunicipalityId,
        capacity_max: u32,
    ) -> Result<QuotaSnapshot, AllocationError> {
        self.with_counters(municipality, |counters| {
            counters.capacity_max = capacity_max;
            Ok(counters_snapshot(counters))
        })
    }

    pub fn snapshot(&self, municipality: &MunicipalityId) -> Result<QuotaSnapshot, AllocationError> {
        self.with_counters(municipality, |counters| Ok(counters_snapshot(counters)))
    }

    pub fn municipality_snapshots(&self) -> Vec<MunicipalitySnapshot> {
        let mut guard = self.municipalities.write().expect("ledger lock poisoned");
        let mut snapshots: Vec<MunicipalitySnapshot> = guard
            .iter_mut()
            .map(|(id, counters)| {
                let counters = counters.get_mut().expect("quota mutex poisoned");
                MunicipalitySnapshot {
                    municipality_id: id.clone(),
                    subregion_id: counters.subregion_id.clone(),
                    quota: counters_snapshot(counters),
                }
            })
            .collect();
        snapshots.sort_by(|left, right| left.municipality_id.cmp(&right.municipality_id));
        snapshots
    }

    pub fn subregion_snapshots(&self) -> Vec<SubregionSnapshot> {
        let mut grouped: BTreeMap<SubregionId, (usize, QuotaSnapshot)> = BTreeMap::new();
        for municipality in self.municipality_snapshots() {
            let entry = grouped
                .entry(municipality.subregion_id)
                .or_insert((0, QuotaSnapshot::empty()));
            entry.0 += 1;
            entry.1 = entry.1.absorb(municipality.quota);
        }

        grouped
            .into_iter()
            .map(|(subregion_id, (municipalities, quota))| SubregionSnapshot {
                subregion_id,
                municipalities,
                quota,
            })
            .collect()
    }

    pub fn subregion_snapshot(&self, subregion: &SubregionId) -> Option<SubregionSnapshot> {
        self.subregion_snapshots()
            .into_iter()
            .find(|snapshot| &snapshot.subregion_id == subregion)
    }

    pub fn global_snapshot(&self) -> QuotaSnapshot {
        self.municipality_snapshots()
            .into_iter()
            .fold(QuotaSnapshot::empty(), |acc, municipality| {
                acc.absorb(municipality.quota)
            })
    }

    fn with_counters<T, F>(&self, municipality: &MunicipalityId, apply: F) -> Result<T, AllocationError>
    where
        F: FnOnce(&mut QuotaCounters) -> Result<T, AllocationError>,
    {
        let guard = self.municipalities.read().expect("ledger lock poisoned");
        let counters = guard
            .get(municipality)
            .ok_or_else(|| AllocationError::UnknownMunicipality(municipality.clone()))?;
        let mut counters = counters.lock().expect("quota mutex poisoned");
        apply(&mut counters)
    }

    fn claim_global_seat(&self, global_cap: Option<u32>) -> Result<(), AllocationError> {
        let Some(capacity) = global_cap else {
            self.confirmed_total.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        };

        self.confirmed_total
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |confirmed| {
                (confirmed < capacity as u64).then_some(confirmed + 1)
            })
            .map(|_| ())
            .map_err(|confirmed| AllocationError::CapacityExceeded {
                confirmed,
                capacity,
            })
    }

    fn ensure_global_room(&self, global_cap: Option<u32>) -> Result<(), AllocationError> {
        match global_cap {
            Some(capacity) => {
                let confirmed = self.confirmed_total();
                if confirmed >= capacity as u64 {
                    Err(AllocationError::CapacityExceeded {
                        confirmed,
                        capacity,
                    })
                } else {
                    Ok(())
                }
            }
            None => Ok(()),
        }
    }
}

fn counters_snapshot(counters: &QuotaCounters) -> QuotaSnapshot {
    QuotaSnapshot::from_counts(
        counters.confirmed as u64,
        counters.waitlisted as u64,
        counters.capacity_max as u64,
    )
}
