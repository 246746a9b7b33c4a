//! Resource ledger.
//!
//! Tracks the capacity-bounded usage of every resource as a set of
//! reservations, one per supported `UseResource` condition. A reservation
//! does not carry times of its own: it points at the start and end
//! timepoints of its token in the [`TemporalNetwork`], so its possible
//! placement is always read from the current network bounds.
//!
//! # Profiles
//!
//! Two conservative views of a reservation over `[start, end)` are used:
//!
//! - **possible interval** `[EST, LET)`: every instant at which the
//!   reservation *might* be active. Used by [`ResourceLedger::peak_usage`].
//! - **compulsory part** `[LST, EET)`: every instant at which it is active
//!   in *every* solution. Summed compulsory parts above capacity are a hard
//!   failure ([`ResourceLedger::check_capacity`]).
//!
//! Everything in between is reported as a flaw by
//! [`ResourceLedger::conflicts`] and resolved by ordering reservations.
//!
//! # Reference
//! Schutt (2011), "Improving Scheduling by Learning", Sec. 4.2 (time-table
//! reasoning over mandatory parts)

use tracing::trace;

use crate::error::SearchFailure;
use crate::temporal::{TemporalNetwork, Timepoint, INF};
use crate::timeline::TokenId;

/// Handle to a resource in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) usize);

/// Handle to a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReservationId(pub(crate) usize);

/// A resource known to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerResource {
    /// Object name.
    pub name: String,
    /// Resource class.
    pub class: String,
    /// Maximum simultaneous usage. `None` = unbounded.
    pub capacity: Option<u32>,
    /// Created during planning rather than declared.
    pub synthesized: bool,
}

impl LedgerResource {
    /// Whether a single usage of `amount` fits.
    pub fn can_hold(&self, amount: u32) -> bool {
        self.capacity.map_or(true, |cap| amount <= cap)
    }
}

/// Lifecycle of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationStatus {
    /// Made by a decision that is still being propagated.
    Tentative,
    /// Part of an accepted decision.
    Committed,
}

/// Usage of `amount` units of a resource over a token's interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// Resource used.
    pub resource: ResourceId,
    /// Token whose condition this reservation supports.
    pub token: TokenId,
    /// Start timepoint (inclusive).
    pub start: Timepoint,
    /// End timepoint (exclusive).
    pub end: Timepoint,
    /// Units used.
    pub amount: u32,
    /// Lifecycle status.
    pub status: ReservationStatus,
}

/// A set of reservations on one resource that may exceed its capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceConflict {
    /// Resource concerned.
    pub resource: ResourceId,
    /// Reservations involved, in creation order.
    pub members: Vec<ReservationId>,
}

/// Position in the undo trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LedgerMark(usize);

#[derive(Debug, Clone)]
enum Change {
    AddResource,
    Reserve,
    Commit(ReservationId),
    Retract(ReservationId, Reservation),
}

/// Capacity profiles of all resources, with an undo trail.
#[derive(Debug, Clone, Default)]
pub struct ResourceLedger {
    resources: Vec<LedgerResource>,
    reservations: Vec<Option<Reservation>>,
    trail: Vec<Change>,
}

impl ResourceLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource.
    pub fn add_resource(
        &mut self,
        name: impl Into<String>,
        class: impl Into<String>,
        capacity: Option<u32>,
        synthesized: bool,
    ) -> ResourceId {
        self.resources.push(LedgerResource {
            name: name.into(),
            class: class.into(),
            capacity,
            synthesized,
        });
        self.trail.push(Change::AddResource);
        ResourceId(self.resources.len() - 1)
    }

    /// A resource by id.
    pub fn resource(&self, id: ResourceId) -> &LedgerResource {
        &self.resources[id.0]
    }

    /// All resources with their ids, declared first.
    pub fn resources(&self) -> impl Iterator<Item = (ResourceId, &LedgerResource)> {
        self.resources
            .iter()
            .enumerate()
            .map(|(i, r)| (ResourceId(i), r))
    }

    /// Finds a resource by name.
    pub fn find(&self, name: &str) -> Option<ResourceId> {
        self.resources
            .iter()
            .position(|r| r.name == name)
            .map(ResourceId)
    }

    /// Resources of a class: declared ones first, then synthesized ones.
    pub fn resources_of_class<'a>(
        &'a self,
        class: &'a str,
    ) -> impl Iterator<Item = ResourceId> + 'a {
        self.resources()
            .filter(move |(_, r)| r.class == class)
            .map(|(id, _)| id)
    }

    /// Number of synthesized resources of a class.
    pub fn synthesized_count(&self, class: &str) -> usize {
        self.resources
            .iter()
            .filter(|r| r.synthesized && r.class == class)
            .count()
    }

    /// Records a tentative reservation.
    pub fn reserve(
        &mut self,
        resource: ResourceId,
        token: TokenId,
        start: Timepoint,
        end: Timepoint,
        amount: u32,
    ) -> ReservationId {
        self.reservations.push(Some(Reservation {
            resource,
            token,
            start,
            end,
            amount,
            status: ReservationStatus::Tentative,
        }));
        self.trail.push(Change::Reserve);
        ReservationId(self.reservations.len() - 1)
    }

    /// Marks a reservation as committed.
    ///
    /// # Panics
    /// If the reservation was retracted.
    pub fn commit(&mut self, id: ReservationId) {
        let reservation = self.reservations[id.0]
            .as_mut()
            .unwrap_or_else(|| panic!("commit of retracted reservation {id:?}"));
        if reservation.status == ReservationStatus::Tentative {
            reservation.status = ReservationStatus::Committed;
            self.trail.push(Change::Commit(id));
        }
    }

    /// Removes a reservation. Retracting twice is a no-op.
    pub fn retract(&mut self, id: ReservationId) {
        if let Some(old) = self.reservations[id.0].take() {
            self.trail.push(Change::Retract(id, old));
        }
    }

    /// A live reservation by id.
    pub fn reservation(&self, id: ReservationId) -> Option<&Reservation> {
        self.reservations.get(id.0).and_then(Option::as_ref)
    }

    /// Live reservations on a resource, in creation order.
    pub fn reservations_on(
        &self,
        resource: ResourceId,
    ) -> impl Iterator<Item = (ReservationId, &Reservation)> {
        self.reservations
            .iter()
            .enumerate()
            .filter_map(move |(i, r)| match r {
                Some(r) if r.resource == resource => Some((ReservationId(i), r)),
                _ => None,
            })
    }

    /// Conservative peak usage of a resource over `window = [from, to)`:
    /// the largest sum of amounts whose possible intervals share an instant
    /// inside the window.
    pub fn peak_usage(&self, resource: ResourceId, window: (i64, i64), net: &TemporalNetwork) -> u64 {
        let (from, to) = window;
        let intervals: Vec<(i64, i64, u32)> = self
            .reservations_on(resource)
            .map(|(_, r)| {
                let est = net.earliest(r.start);
                let let_ = net.bounds(r.end).1.unwrap_or(INF);
                (est.max(from), let_.min(to), r.amount)
            })
            .filter(|(s, e, _)| s < e)
            .collect();
        peak_at_starts(&intervals)
    }

    /// Checks every capacity-bounded resource for certain overload.
    ///
    /// Fails when one reservation alone exceeds the capacity, or when the
    /// compulsory parts `[LST, EET)` on a resource sum above it.
    pub fn check_capacity(&self, net: &TemporalNetwork) -> Result<(), SearchFailure> {
        for (id, resource) in self.resources() {
            let Some(capacity) = resource.capacity else {
                continue;
            };
            let mut compulsory = Vec::new();
            for (_, r) in self.reservations_on(id) {
                if r.amount > capacity {
                    return Err(overload(resource, u64::from(r.amount), capacity));
                }
                let lst = net.bounds(r.start).1.unwrap_or(INF);
                let eet = net.earliest(r.end);
                if lst < eet {
                    compulsory.push((lst, eet, r.amount));
                }
            }
            let peak = peak_at_starts(&compulsory);
            if peak > u64::from(capacity) {
                trace!(resource = %resource.name, peak, capacity, "compulsory overload");
                return Err(overload(resource, peak, capacity));
            }
        }
        Ok(())
    }

    /// Candidate capacity flaws, in resource order.
    ///
    /// For each capacity-bounded resource, first every pair that can still
    /// overlap and jointly exceeds the capacity, then every set of
    /// reservations active together at some instant of `projection`
    /// (one time per timepoint index) whose sum exceeds the capacity.
    /// Once this is empty, `projection` respects every capacity.
    pub fn conflicts(&self, net: &TemporalNetwork, projection: &[i64]) -> Vec<ResourceConflict> {
        let mut found = Vec::new();
        for (id, resource) in self.resources() {
            let Some(capacity) = resource.capacity else {
                continue;
            };
            let capacity = u64::from(capacity);
            let live: Vec<(ReservationId, &Reservation)> = self.reservations_on(id).collect();

            for (i, (a_id, a)) in live.iter().enumerate() {
                for (b_id, b) in &live[i + 1..] {
                    if u64::from(a.amount) + u64::from(b.amount) > capacity && can_overlap(net, a, b) {
                        found.push(ResourceConflict {
                            resource: id,
                            members: vec![*a_id, *b_id],
                        });
                    }
                }
            }

            let mut seen: Vec<Vec<ReservationId>> = Vec::new();
            for (_, r) in &live {
                let instant = projection[r.start.index()];
                let active: Vec<ReservationId> = live
                    .iter()
                    .filter(|(_, o)| {
                        projection[o.start.index()] <= instant && instant < projection[o.end.index()]
                    })
                    .map(|(oid, _)| *oid)
                    .collect();
                let total: u64 = active
                    .iter()
                    .filter_map(|oid| self.reservation(*oid))
                    .map(|o| u64::from(o.amount))
                    .sum();
                if total > capacity && active.len() > 2 && !seen.contains(&active) {
                    seen.push(active.clone());
                    found.push(ResourceConflict {
                        resource: id,
                        members: active,
                    });
                }
            }
        }
        found
    }

    /// Current trail position.
    pub fn mark(&self) -> LedgerMark {
        LedgerMark(self.trail.len())
    }

    /// Undoes every change recorded after `mark`.
    ///
    /// # Panics
    /// If `mark` lies beyond the current trail.
    pub fn undo_to(&mut self, mark: LedgerMark) {
        assert!(
            mark.0 <= self.trail.len(),
            "ledger trail underflow: mark {} > len {}",
            mark.0,
            self.trail.len()
        );
        while self.trail.len() > mark.0 {
            match self.trail.pop() {
                Some(Change::AddResource) => {
                    self.resources.pop();
                }
                Some(Change::Reserve) => {
                    self.reservations.pop();
                }
                Some(Change::Commit(id)) => {
                    if let Some(r) = self.reservations[id.0].as_mut() {
                        r.status = ReservationStatus::Tentative;
                    }
                }
                Some(Change::Retract(id, old)) => self.reservations[id.0] = Some(old),
                None => unreachable!(),
            }
        }
    }
}

/// Whether `a` and `b` can still share an instant.
pub(crate) fn can_overlap(net: &TemporalNetwork, a: &Reservation, b: &Reservation) -> bool {
    net.can_be_after(a.start, b.end) && net.can_be_after(b.start, a.end)
}

fn overload(resource: &LedgerResource, usage: u64, capacity: u32) -> SearchFailure {
    SearchFailure::CapacityExceeded {
        resource: resource.name.clone(),
        usage,
        capacity,
    }
}

/// Largest summed amount over half-open intervals, sampled at every start.
pub(crate) fn peak_at_starts(intervals: &[(i64, i64, u32)]) -> u64 {
    intervals
        .iter()
        .map(|&(t, _, _)| {
            intervals
                .iter()
                .filter(|&&(s, e, _)| s <= t && t < e)
                .map(|&(_, _, amount)| u64::from(amount))
                .sum()
        })
        .max()
        .unwrap_or(0)
}
