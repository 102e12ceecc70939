//! Multi-participant rendezvous.
//!
//! Every participant of a collective calls [`Rendezvous::arrive`] with its
//! rank and contribution. The call returns immediately with an
//! [`AsyncValue`] that resolves, for all participants at once, when the last
//! one arrives. A group that does not fill up within the configured timeout
//! fails with [`ErrorKind::RendezvousTimeout`] for everyone who did arrive.
//!
//! Lock order: the group map, then a group's state.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Error, ErrorKind};
use crate::runtime::{ExecutorConfig, TimerHandle, TimerService};
use crate::sync::{promise, AsyncValue, Promise};
use crate::tracing_compat::{trace, warn};
use crate::types::{GlobalDeviceId, RunId};

/// Identifies one rendezvous group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RendezvousKey {
    /// Run the collective belongs to.
    pub run_id: RunId,
    /// Participating devices in rank order.
    pub participants: Vec<GlobalDeviceId>,
    /// Collective operation id within the program.
    pub op_id: i64,
}

impl RendezvousKey {
    /// Number of participants.
    #[must_use]
    pub fn num_participants(&self) -> usize {
        self.participants.len()
    }
}

impl fmt::Display for RendezvousKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/op{} [", self.run_id, self.op_id)?;
        for (i, d) in self.participants.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{d}")?;
        }
        f.write_str("]")
    }
}

/// Contributions of every rank, indexed by rank.
pub type Contributions<V> = Arc<Vec<V>>;

struct GroupState<V> {
    slots: Vec<Option<V>>,
    arrived: usize,
    promise: Option<Promise<Contributions<V>>>,
    timers: Vec<TimerHandle>,
}

struct Group<V> {
    state: Mutex<GroupState<V>>,
    value: AsyncValue<Contributions<V>>,
}

impl<V> GroupState<V> {
    fn missing_ranks(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(rank, slot)| slot.is_none().then_some(rank))
            .collect()
    }
}

/// Rendezvous point for one kind of collective exchange.
pub struct Rendezvous<V> {
    name: &'static str,
    timeout: Duration,
    warn_after: Duration,
    groups: Mutex<HashMap<RendezvousKey, Arc<Group<V>>>>,
}

impl<V: Send + Sync + 'static> Rendezvous<V> {
    /// A rendezvous with explicit timing.
    #[must_use]
    pub fn new(name: &'static str, timeout: Duration, warn_after: Duration) -> Arc<Self> {
        Arc::new(Self {
            name,
            timeout,
            warn_after: warn_after.min(timeout),
            groups: Mutex::new(HashMap::new()),
        })
    }

    /// A rendezvous timed by `config`.
    #[must_use]
    pub fn with_config(name: &'static str, config: &ExecutorConfig) -> Arc<Self> {
        Self::new(name, config.rendezvous_timeout, config.rendezvous_warn_after)
    }

    /// Groups still waiting for participants.
    #[must_use]
    pub fn pending_groups(&self) -> usize {
        self.groups.lock().len()
    }

    /// Contributes `value` as `rank` of the group identified by `key`.
    ///
    /// Never blocks. The result fails with `InvalidArgument` for an
    /// out-of-range or duplicate rank without affecting the group.
    pub fn arrive(
        self: &Arc<Self>,
        key: RendezvousKey,
        rank: usize,
        value: V,
    ) -> AsyncValue<Contributions<V>> {
        let n = key.num_participants();
        if rank >= n {
            return AsyncValue::failed(Error::invalid_argument(format!(
                "rank {rank} out of range for {n} participants in {key}"
            )));
        }

        let completed = {
            let mut groups = self.groups.lock();
            let group = Arc::clone(
                groups
                    .entry(key.clone())
                    .or_insert_with(|| self.new_group(&key)),
            );
            let mut state = group.state.lock();
            if state.slots[rank].is_some() {
                return AsyncValue::failed(Error::invalid_argument(format!(
                    "rank {rank} arrived twice at {key}"
                )));
            }
            state.slots[rank] = Some(value);
            state.arrived += 1;
            trace!(rendezvous = self.name, key = %key, rank, arrived = state.arrived, "arrived");

            if state.arrived < n {
                Err(group.value.clone())
            } else {
                groups.remove(&key);
                for timer in state.timers.drain(..) {
                    timer.cancel();
                }
                let values: Vec<V> = state.slots.drain(..).flatten().collect();
                let promise = state.promise.take();
                promise.map(|p| (p, values)).ok_or_else(|| group.value.clone())
            }
        };

        match completed {
            Ok((promise, values)) => {
                let value = promise.value();
                promise.set(Arc::new(values));
                value
            }
            Err(pending) => pending,
        }
    }

    fn new_group(self: &Arc<Self>, key: &RendezvousKey) -> Arc<Group<V>> {
        let (p, value) = promise();
        let group = Arc::new(Group {
            state: Mutex::new(GroupState {
                slots: std::iter::repeat_with(|| None)
                    .take(key.num_participants())
                    .collect(),
                arrived: 0,
                promise: Some(p),
                timers: Vec::with_capacity(2),
            }),
            value,
        });

        let timer = TimerService::global();
        let mut timers = Vec::with_capacity(2);
        if self.warn_after < self.timeout {
            let weak = Arc::downgrade(&group);
            let (name, key, after) = (self.name, key.clone(), self.warn_after);
            timers.push(timer.schedule(self.warn_after, move || {
                if let Some(group) = weak.upgrade() {
                    let state = group.state.lock();
                    if state.promise.is_some() {
                        warn!(
                            rendezvous = name,
                            key = %key,
                            waited = ?after,
                            missing = ?state.missing_ranks(),
                            "rendezvous is taking longer than expected"
                        );
                    }
                }
            }));
        }
        let rendezvous = Arc::downgrade(self);
        let weak_group = Arc::downgrade(&group);
        let key = key.clone();
        timers.push(
            timer.schedule(self.timeout, move || {
                Self::expire(&rendezvous, &weak_group, &key);
            }),
        );
        group.state.lock().timers = timers;
        group
    }

    fn expire(rendezvous: &Weak<Self>, group: &Weak<Group<V>>, key: &RendezvousKey) {
        let (Some(rendezvous), Some(group)) = (rendezvous.upgrade(), group.upgrade()) else {
            return;
        };
        let failed = {
            let mut groups = rendezvous.groups.lock();
            let is_current = groups
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(current, &group));
            if !is_current {
                return;
            }
            groups.remove(key);
            let mut state = group.state.lock();
            let missing = state.missing_ranks();
            let arrived = state.arrived;
            state.slots.clear();
            let promise = state.promise.take();
            promise.map(|p| (p, arrived, missing))
        };
        if let Some((promise, arrived, missing)) = failed {
            warn!(
                rendezvous = rendezvous.name,
                key = %key,
                arrived,
                missing = ?missing,
                "rendezvous timed out"
            );
            promise.set_error(Error::new(ErrorKind::RendezvousTimeout).with_message(format!(
                "{} rendezvous {key} timed out after {:?}: {arrived} of {} arrived, missing ranks {missing:?}",
                rendezvous.name,
                rendezvous.timeout,
                key.num_participants(),
            )));
        }
    }
}

impl<V> fmt::Debug for Rendezvous<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rendezvous")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("pending_groups", &self.groups.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn key(op_id: i64, n: i64) -> RendezvousKey {
        RendezvousKey {
            run_id: RunId::from_raw(1),
            participants: (0..n).map(GlobalDeviceId).collect(),
            op_id,
        }
    }

    #[test]
    fn resolves_when_all_arrive() {
        let rv = Rendezvous::<u32>::new("test", Duration::from_secs(10), Duration::from_secs(5));
        let a = rv.arrive(key(1, 3), 2, 30);
        let b = rv.arrive(key(1, 3), 0, 10);
        assert!(!a.is_available());
        let c = rv.arrive(key(1, 3), 1, 20);
        for v in [&a, &b, &c] {
            assert_eq!(v.value().map(|x| x.as_slice()), Some(&[10, 20, 30][..]));
        }
        assert_eq!(rv.pending_groups(), 0);
    }

    #[test]
    fn concurrent_participants() {
        let rv = Rendezvous::<usize>::new("test", Duration::from_secs(10), Duration::from_secs(5));
        let handles: Vec<_> = (0..4)
            .map(|rank| {
                let rv = Arc::clone(&rv);
                thread::spawn(move || {
                    let v = rv.arrive(key(7, 4), rank, rank * 2);
                    v.wait().map(|x| x.iter().sum::<usize>()).expect("rendezvous")
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().expect("join"), 12);
        }
    }

    #[test]
    fn duplicate_rank_is_rejected() {
        let rv = Rendezvous::<u8>::new("test", Duration::from_secs(10), Duration::from_secs(5));
        let _first = rv.arrive(key(2, 2), 0, 1);
        let dup = rv.arrive(key(2, 2), 0, 1);
        assert_eq!(dup.error().map(Error::kind), Some(ErrorKind::InvalidArgument));
        let bad = rv.arrive(key(2, 2), 5, 1);
        assert_eq!(bad.error().map(Error::kind), Some(ErrorKind::InvalidArgument));
    }

    #[test]
    fn missing_participant_times_out() {
        let rv = Rendezvous::<u8>::new("test", Duration::from_millis(50), Duration::from_millis(10));
        let v = rv.arrive(key(3, 2), 0, 1);
        let err = v
            .wait_timeout(Duration::from_secs(5))
            .expect("bounded wait")
            .expect_err("timeout");
        assert!(err.is_timeout());
        assert!(err.message().unwrap_or_default().contains("missing ranks [1]"));
        assert_eq!(rv.pending_groups(), 0);
    }

    #[test]
    fn distinct_runs_do_not_mix() {
        let rv = Rendezvous::<u8>::new("test", Duration::from_secs(10), Duration::from_secs(5));
        let mut other = key(4, 2);
        other.run_id = RunId::from_raw(2);
        let a = rv.arrive(key(4, 2), 0, 1);
        let b = rv.arrive(other, 1, 2);
        assert!(!a.is_available());
        assert!(!b.is_available());
        assert_eq!(rv.pending_groups(), 2);
    }
}
