//! The cooperative task scheduler (section 5 "Scheduling model"). A single
//! logical executor drains a FIFO queue per task class; `Droppable` work is
//! shed at enqueue time once the queue grows past a configured depth rather
//! than being allowed to queue unboundedly.
//!
//! Deferred tasks reference their owning session through a generation-
//! checked arena token instead of a weak pointer (section "Weak session
//! references" in Design Notes): the connection manager owns sessions in a
//! slab, hands out `SessionToken`s carrying the slot index plus the
//! generation current at issue time, and a task whose generation has gone
//! stale at execution time is a no-op rather than a dangling upgrade.

use std::collections::VecDeque;

use crate::router::TaskClass;

/// An index into a `SessionArena` slot plus the generation that was current
/// when the token was issued. Executing a task built from a stale token
/// (the slot has since been freed and reused, or the session dropped) is
/// simply skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken {
    slot: usize,
    generation: u64,
}

struct Slot<T> {
    value: Option<T>,
    generation: u64,
}

/// Owns a fixed set of long-lived values (sessions) behind generation-
/// checked tokens. Freeing a slot bumps its generation so any outstanding
/// token referencing the old occupant fails to resolve.
pub struct SessionArena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
}

impl<T> Default for SessionArena<T> {
    fn default() -> Self {
        SessionArena {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T> SessionArena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: T) -> SessionToken {
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot];
            entry.value = Some(value);
            SessionToken {
                slot,
                generation: entry.generation,
            }
        } else {
            let slot = self.slots.len();
            self.slots.push(Slot {
                value: Some(value),
                generation: 0,
            });
            SessionToken { slot, generation: 0 }
        }
    }

    /// Frees the slot referenced by `token` if it is still current, bumping
    /// its generation so the token (and any copies of it) go stale.
    pub fn remove(&mut self, token: SessionToken) -> Option<T> {
        let entry = self.slots.get_mut(token.slot)?;
        if entry.generation != token.generation {
            return None;
        }
        let value = entry.value.take();
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(token.slot);
        value
    }

    pub fn get(&self, token: SessionToken) -> Option<&T> {
        let entry = self.slots.get(token.slot)?;
        if entry.generation != token.generation {
            return None;
        }
        entry.value.as_ref()
    }

    pub fn get_mut(&mut self, token: SessionToken) -> Option<&mut T> {
        let entry = self.slots.get_mut(token.slot)?;
        if entry.generation != token.generation {
            return None;
        }
        entry.value.as_mut()
    }

    pub fn is_live(&self, token: SessionToken) -> bool {
        self.get(token).is_some()
    }
}

/// A unit of deferred work tagged with the token of the session it runs
/// against and the class the router assigned it.
pub struct Task<F> {
    pub token: SessionToken,
    pub class: TaskClass,
    pub run: F,
}

/// FIFO queues for `Normal` and `Droppable` work (section 5). `Inline` class
/// work never reaches the scheduler; it is executed synchronously by the
/// caller per section 4.3.
pub struct Scheduler<F> {
    normal: VecDeque<Task<F>>,
    droppable: VecDeque<Task<F>>,
    max_droppable_depth: usize,
    shed_count: u64,
}

impl<F> Scheduler<F> {
    pub fn new(max_droppable_depth: usize) -> Self {
        Scheduler {
            normal: VecDeque::new(),
            droppable: VecDeque::new(),
            max_droppable_depth,
            shed_count: 0,
        }
    }

    /// Posts a task. `Droppable` tasks are shed (not enqueued) once the
    /// droppable queue is already at `max_droppable_depth` (section 5
    /// "enforces the queue-length load-shedding rule at enqueue time").
    /// Returns `false` if the task was shed.
    pub fn post(&mut self, task: Task<F>) -> bool {
        match task.class {
            TaskClass::Inline => {
                self.normal.push_back(task);
                true
            }
            TaskClass::Normal => {
                self.normal.push_back(task);
                true
            }
            TaskClass::Droppable => {
                if self.droppable.len() >= self.max_droppable_depth {
                    self.shed_count += 1;
                    false
                } else {
                    self.droppable.push_back(task);
                    true
                }
            }
        }
    }

    /// Drains one task, preferring `Normal` over `Droppable` to keep
    /// latency-sensitive control and consensus traffic ahead of bulk flood
    /// work, while still preserving FIFO order within each class.
    pub fn next(&mut self) -> Option<Task<F>> {
        self.normal.pop_front().or_else(|| self.droppable.pop_front())
    }

    pub fn normal_len(&self) -> usize {
        self.normal.len()
    }

    pub fn droppable_len(&self) -> usize {
        self.droppable.len()
    }

    pub fn shed_count(&self) -> u64 {
        self.shed_count
    }

    /// Whether the droppable queue is currently overloaded, per section
    /// 4.5's `sendMessage` load-shedding check.
    pub fn is_droppable_overloaded(&self) -> bool {
        self.droppable.len() >= self.max_droppable_depth
    }
}
