//! Simple temporal network (STN).
//!
//! Timepoints are linked by binary difference constraints
//! `t2 - t1 ∈ [lo, hi]`. The network stores the all-pairs distance matrix
//! `d[i][j]` (the tightest upper bound on `tj - ti`) and keeps it in
//! minimal form at all times: each new constraint is folded in by relaxing
//! only the pairs whose paths run through the new edge.
//!
//! # Timepoints
//!
//! Timepoint 0 is the origin, fixed at time 0. Every other timepoint is
//! created inside `[0, horizon]` relative to the origin, so
//! `bounds(t) = (-d[t][0], d[0][t])`.
//!
//! # Undo
//!
//! Every cell change and every timepoint creation is recorded on a trail.
//! [`TemporalNetwork::undo_to`] replays the inverses in reverse order; the
//! trail is exact, so undoing to a mark restores the matrix bit for bit.
//!
//! # Complexity
//! - `add_constraint`: O(n²) worst case, O(1) when the edge is redundant
//! - `propagate`: O(n³) (Floyd–Warshall)
//!
//! # Reference
//! Dechter, Meiri & Pearl (1991), "Temporal Constraint Networks"

use thiserror::Error;
use tracing::trace;

/// Distance value standing for "unbounded".
pub const INF: i64 = i64::MAX;

/// Handle to a timepoint of a [`TemporalNetwork`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timepoint(pub(crate) usize);

impl Timepoint {
    /// The origin timepoint (time 0).
    pub const ORIGIN: Timepoint = Timepoint(0);

    /// Index of the timepoint in creation order.
    pub fn index(self) -> usize {
        self.0
    }
}

/// A constraint would create a negative cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("inconsistent temporal network: {from:?} -> {to:?} in [{lo}, {hi:?}]")]
pub struct InconsistentNetwork {
    /// First timepoint of the rejected constraint.
    pub from: Timepoint,
    /// Second timepoint of the rejected constraint.
    pub to: Timepoint,
    /// Lower bound of the rejected constraint.
    pub lo: i64,
    /// Upper bound of the rejected constraint.
    pub hi: Option<i64>,
}

/// Position in the undo trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NetworkMark(usize);

#[derive(Debug, Clone)]
enum Change {
    Cell { i: usize, j: usize, old: i64 },
    Timepoint,
}

/// Saturating addition where [`INF`] absorbs.
///
/// Overflow upward reads as unbounded; downward it clamps at `-INF` so
/// every stored distance stays negatable.
#[inline]
fn add(a: i64, b: i64) -> i64 {
    if a == INF || b == INF {
        INF
    } else {
        a.saturating_add(b).max(-INF)
    }
}

/// A simple temporal network in minimal form, with an undo trail.
#[derive(Debug, Clone)]
pub struct TemporalNetwork {
    dist: Vec<Vec<i64>>,
    horizon: Option<i64>,
    trail: Vec<Change>,
}

impl TemporalNetwork {
    /// Creates a network holding only the origin, with no horizon.
    pub fn new() -> Self {
        Self {
            dist: vec![vec![0]],
            horizon: None,
            trail: Vec::new(),
        }
    }

    /// Creates a network whose timepoints all lie in `[0, horizon]`.
    pub fn with_horizon(horizon: i64) -> Self {
        Self {
            horizon: Some(horizon),
            ..Self::new()
        }
    }

    /// Number of timepoints, origin included.
    pub fn len(&self) -> usize {
        self.dist.len()
    }

    /// Whether the network holds only the origin.
    pub fn is_empty(&self) -> bool {
        self.dist.len() == 1
    }

    /// The horizon, if any.
    pub fn horizon(&self) -> Option<i64> {
        self.horizon
    }

    /// Creates a timepoint in `[0, horizon]`.
    pub fn add_timepoint(&mut self) -> Timepoint {
        let n = self.dist.len();
        for row in &mut self.dist {
            row.push(INF);
        }
        let mut row = vec![INF; n + 1];
        row[n] = 0;
        self.dist.push(row);
        self.trail.push(Change::Timepoint);

        let tp = Timepoint(n);
        // A fresh timepoint is unconstrained apart from the window, and the
        // window alone is always satisfiable.
        let window = self.add_constraint(Timepoint::ORIGIN, tp, 0, self.horizon);
        debug_assert!(window.is_ok());
        tp
    }

    /// Upper bound on `t2 - t1` ([`INF`] if unbounded).
    #[inline]
    pub fn distance(&self, t1: Timepoint, t2: Timepoint) -> i64 {
        self.dist[t1.0][t2.0]
    }

    /// `(earliest, latest)` time of a timepoint; `latest = None` when unbounded.
    pub fn bounds(&self, t: Timepoint) -> (i64, Option<i64>) {
        let earliest = -self.dist[t.0][0];
        let latest = self.dist[0][t.0];
        (earliest, (latest != INF).then_some(latest))
    }

    /// Earliest time of a timepoint.
    #[inline]
    pub fn earliest(&self, t: Timepoint) -> i64 {
        -self.dist[t.0][0]
    }

    /// Whether `t2 - t1 ∈ [lo, hi]` could be added without inconsistency.
    pub fn admits(&self, t1: Timepoint, t2: Timepoint, lo: i64, hi: Option<i64>) -> bool {
        // Feasible range of t2 - t1 is [-d[t2][t1], d[t1][t2]].
        let max = self.dist[t1.0][t2.0];
        let min_neg = self.dist[t2.0][t1.0];
        let upper_ok = max == INF || lo <= max;
        let lower_ok = match hi {
            Some(hi) => lo <= hi && (min_neg == INF || hi >= -min_neg),
            None => true,
        };
        upper_ok && lower_ok
    }

    /// Whether `t2 - t1 > 0` is possible.
    pub fn can_be_after(&self, t1: Timepoint, t2: Timepoint) -> bool {
        let max = self.dist[t1.0][t2.0];
        max == INF || max > 0
    }

    /// Posts `t2 - t1 ∈ [lo, hi]`.
    ///
    /// On [`InconsistentNetwork`] the network is unchanged.
    pub fn add_constraint(
        &mut self,
        t1: Timepoint,
        t2: Timepoint,
        lo: i64,
        hi: Option<i64>,
    ) -> Result<(), InconsistentNetwork> {
        let err = InconsistentNetwork {
            from: t1,
            to: t2,
            lo,
            hi,
        };
        if !self.admits(t1, t2, lo, hi) {
            trace!(?t1, ?t2, lo, ?hi, "constraint rejected");
            return Err(err);
        }
        if let Some(hi) = hi {
            self.tighten(t1.0, t2.0, hi);
        }
        self.tighten(t2.0, t1.0, lo.checked_neg().unwrap_or(INF));
        Ok(())
    }

    /// Posts `t2 - t1 == value`.
    pub fn add_equality(
        &mut self,
        t1: Timepoint,
        t2: Timepoint,
        value: i64,
    ) -> Result<(), InconsistentNetwork> {
        self.add_constraint(t1, t2, value, Some(value))
    }

    /// Posts `t1 <= t2`.
    pub fn add_precedence(&mut self, t1: Timepoint, t2: Timepoint) -> Result<(), InconsistentNetwork> {
        self.add_constraint(t1, t2, 0, None)
    }

    /// Folds edge `u -> v` with weight `w` into a closed matrix.
    ///
    /// The caller has checked `w + d[v][u] >= 0`.
    fn tighten(&mut self, u: usize, v: usize, w: i64) {
        if w >= self.dist[u][v] {
            return;
        }
        let n = self.dist.len();
        // Snapshot the column into u and the row out of v: both change
        // during the sweep.
        let into_u: Vec<i64> = (0..n).map(|i| self.dist[i][u]).collect();
        let from_v: Vec<i64> = self.dist[v].clone();
        for (i, &iu) in into_u.iter().enumerate() {
            if iu == INF {
                continue;
            }
            let through = add(iu, w);
            for (j, &vj) in from_v.iter().enumerate() {
                let candidate = add(through, vj);
                if candidate < self.dist[i][j] {
                    self.set(i, j, candidate);
                }
            }
        }
    }

    fn set(&mut self, i: usize, j: usize, value: i64) {
        let old = self.dist[i][j];
        self.trail.push(Change::Cell { i, j, old });
        self.dist[i][j] = value;
    }

    /// Floyd–Warshall pass over the whole matrix.
    ///
    /// A minimal network is left unchanged. Returns [`InconsistentNetwork`]
    /// when a negative cycle is found; tightenings already applied stay on
    /// the trail and are removed by the caller's undo.
    pub fn propagate(&mut self) -> Result<(), InconsistentNetwork> {
        let n = self.dist.len();
        for k in 0..n {
            for i in 0..n {
                let ik = self.dist[i][k];
                if ik == INF {
                    continue;
                }
                for j in 0..n {
                    let candidate = add(ik, self.dist[k][j]);
                    if candidate < self.dist[i][j] {
                        self.set(i, j, candidate);
                    }
                }
            }
        }
        match (0..n).find(|&i| self.dist[i][i] < 0) {
            Some(i) => Err(InconsistentNetwork {
                from: Timepoint(i),
                to: Timepoint(i),
                lo: 0,
                hi: Some(0),
            }),
            None => Ok(()),
        }
    }

    /// Current trail position.
    pub fn mark(&self) -> NetworkMark {
        NetworkMark(self.trail.len())
    }

    /// Undoes every change recorded after `mark`.
    ///
    /// # Panics
    /// If `mark` lies beyond the current trail.
    pub fn undo_to(&mut self, mark: NetworkMark) {
        assert!(
            mark.0 <= self.trail.len(),
            "temporal trail underflow: mark {} > len {}",
            mark.0,
            self.trail.len()
        );
        while self.trail.len() > mark.0 {
            match self.trail.pop() {
                Some(Change::Cell { i, j, old }) => self.dist[i][j] = old,
                Some(Change::Timepoint) => {
                    self.dist.pop();
                    for row in &mut self.dist {
                        row.pop();
                    }
                }
                None => unreachable!(),
            }
        }
    }

    /// Fixes every timepoint, in creation order, to the midpoint of its
    /// bounds (its earliest time when unbounded above).
    ///
    /// Works on a copy; returns one time per timepoint, origin included.
    pub fn midpoint_schedule(&self) -> Vec<i64> {
        let mut copy = self.clone();
        let mut times = Vec::with_capacity(copy.len());
        for t in 0..copy.len() {
            let tp = Timepoint(t);
            let (lo, hi) = copy.bounds(tp);
            let value = match hi {
                Some(hi) => lo + (hi - lo) / 2,
                None => lo,
            };
            // Any value inside the bounds of a minimal network extends to a
            // full solution.
            let fixed = copy.add_equality(Timepoint::ORIGIN, tp, value);
            debug_assert!(fixed.is_ok());
            times.push(value);
        }
        times
    }

    /// Earliest time of every timepoint, origin included.
    ///
    /// The earliest-time assignment of a minimal network is a solution.
    pub fn earliest_schedule(&self) -> Vec<i64> {
        (0..self.dist.len()).map(|t| -self.dist[t][0]).collect()
    }
}

impl Default for TemporalNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_new_timepoint_bounds() {
        let mut net = TemporalNetwork::new();
        let a = net.add_timepoint();
        assert_eq!(net.bounds(a), (0, None));

        let mut bounded = TemporalNetwork::with_horizon(100);
        let b = bounded.add_timepoint();
        assert_eq!(bounded.bounds(b), (0, Some(100)));
    }

    #[test]
    fn test_chain_propagation() {
        let mut net = TemporalNetwork::with_horizon(100);
        let a = net.add_timepoint();
        let b = net.add_timepoint();
        let c = net.add_timepoint();
        net.add_constraint(a, b, 5, Some(10)).unwrap();
        net.add_constraint(b, c, 3, None).unwrap();

        assert_eq!(net.bounds(a), (0, Some(92)));
        assert_eq!(net.bounds(b), (5, Some(97)));
        assert_eq!(net.bounds(c), (8, Some(100)));
        assert_eq!(net.distance(c, a), -8);
    }

    #[test]
    fn test_negative_cycle_rejected_unchanged() {
        let mut net = TemporalNetwork::new();
        let a = net.add_timepoint();
        let b = net.add_timepoint();
        net.add_constraint(a, b, 5, None).unwrap();
        let before = net.dist.clone();
        let trail = net.trail.len();

        let err = net.add_constraint(b, a, 0, None).unwrap_err();
        assert_eq!(err.from, b);
        assert_eq!(net.dist, before);
        assert_eq!(net.trail.len(), trail);
    }

    #[test]
    fn test_horizon_conflict() {
        let mut net = TemporalNetwork::with_horizon(10);
        let a = net.add_timepoint();
        let b = net.add_timepoint();
        assert!(net.add_constraint(a, b, 11, None).is_err());
        assert!(net.add_constraint(a, b, 10, None).is_ok());
        assert_eq!(net.bounds(a), (0, Some(0)));
        assert_eq!(net.bounds(b), (10, Some(10)));
    }

    #[test]
    fn test_huge_durations_saturate() {
        let mut net = TemporalNetwork::new();
        let a = net.add_timepoint();
        let b = net.add_timepoint();
        let c = net.add_timepoint();
        let huge = i64::MAX / 2 + 1;
        net.add_equality(a, b, huge).unwrap();
        net.add_equality(b, c, huge).unwrap();

        assert_eq!(net.earliest(b), huge);
        // Past the representable range the lower bound clamps instead of wrapping.
        assert_eq!(net.distance(c, a), -INF);
        assert_eq!(net.bounds(c), (INF, None));
        assert!(net.propagate().is_ok());
    }

    #[test]
    fn test_admits_and_order_queries() {
        let mut net = TemporalNetwork::new();
        let a = net.add_timepoint();
        let b = net.add_timepoint();
        net.add_constraint(a, b, 2, Some(4)).unwrap();

        assert!(net.admits(a, b, 3, Some(3)));
        assert!(!net.admits(a, b, 5, None));
        assert!(!net.admits(a, b, 0, Some(1)));
        assert!(net.can_be_after(a, b));
        assert!(!net.can_be_after(b, a));
    }

    #[test]
    fn test_undo_restores_exactly() {
        let mut net = TemporalNetwork::with_horizon(50);
        let a = net.add_timepoint();
        let b = net.add_timepoint();
        let mark = net.mark();
        let snapshot = net.dist.clone();

        let c = net.add_timepoint();
        net.add_constraint(a, c, 3, Some(3)).unwrap();
        net.add_constraint(c, b, 1, None).unwrap();
        assert_eq!(net.len(), 4);
        assert_eq!(net.earliest(b), 4);

        net.undo_to(mark);
        assert_eq!(net.len(), 3);
        assert_eq!(net.dist, snapshot);
    }

    #[test]
    #[should_panic(expected = "temporal trail underflow")]
    fn test_undo_past_trail_panics() {
        let mut net = TemporalNetwork::new();
        net.add_timepoint();
        let mark = net.mark();
        net.undo_to(NetworkMark(0));
        net.undo_to(mark);
    }

    #[test]
    fn test_propagate_is_noop_on_minimal_network() {
        let mut net = TemporalNetwork::with_horizon(30);
        let tps: Vec<Timepoint> = (0..4).map(|_| net.add_timepoint()).collect();
        net.add_constraint(tps[0], tps[1], 1, Some(5)).unwrap();
        net.add_constraint(tps[1], tps[2], 2, None).unwrap();
        net.add_constraint(tps[3], tps[2], 0, Some(1)).unwrap();
        let before = net.dist.clone();
        let trail = net.trail.len();

        net.propagate().unwrap();
        assert_eq!(net.dist, before);
        assert_eq!(net.trail.len(), trail);
    }

    /// Incremental closure must agree with a from-scratch Floyd–Warshall
    /// over the accepted constraints.
    #[test]
    fn test_incremental_matches_floyd_warshall() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..40 {
            let mut net = TemporalNetwork::with_horizon(40);
            let tps: Vec<Timepoint> = (0..6).map(|_| net.add_timepoint()).collect();
            let mut accepted = Vec::new();

            for _ in 0..12 {
                let a = tps[rng.random_range(0..tps.len())];
                let b = tps[rng.random_range(0..tps.len())];
                if a == b {
                    continue;
                }
                let lo = rng.random_range(-5..10);
                let hi = if rng.random_bool(0.5) {
                    Some(lo + rng.random_range(0..8))
                } else {
                    None
                };
                if net.add_constraint(a, b, lo, hi).is_ok() {
                    accepted.push((a, b, lo, hi));
                }
            }

            let n = net.len();
            let mut reference = vec![vec![INF; n]; n];
            for (i, row) in reference.iter_mut().enumerate() {
                row[i] = 0;
            }
            for t in 1..n {
                reference[0][t] = 40;
                reference[t][0] = 0;
            }
            for &(a, b, lo, hi) in &accepted {
                if let Some(hi) = hi {
                    reference[a.0][b.0] = reference[a.0][b.0].min(hi);
                }
                reference[b.0][a.0] = reference[b.0][a.0].min(-lo);
            }
            for k in 0..n {
                for i in 0..n {
                    for j in 0..n {
                        let c = add(reference[i][k], reference[k][j]);
                        if c < reference[i][j] {
                            reference[i][j] = c;
                        }
                    }
                }
            }
            assert_eq!(net.dist, reference);
        }
    }

    #[test]
    fn test_schedules_are_consistent() {
        let mut net = TemporalNetwork::with_horizon(20);
        let a = net.add_timepoint();
        let b = net.add_timepoint();
        let c = net.add_timepoint();
        net.add_constraint(a, b, 2, Some(6)).unwrap();
        net.add_constraint(b, c, 1, Some(3)).unwrap();

        for times in [net.earliest_schedule(), net.midpoint_schedule()] {
            let ab = times[b.0] - times[a.0];
            let bc = times[c.0] - times[b.0];
            assert!((2..=6).contains(&ab), "{times:?}");
            assert!((1..=3).contains(&bc), "{times:?}");
            assert!(times[c.0] <= 20);
        }
        assert_eq!(net.earliest_schedule(), vec![0, 0, 2, 3]);
    }
}
