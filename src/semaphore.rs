//! A counting semaphore that hands out units strictly in arrival order.
//!
//! Admission and waiting are split: [`FairSemaphore::admit`] decides atomically
//! whether a request is granted now or queued, and [`FairSemaphore::wait`] blocks
//! on the returned ticket. Callers can therefore act on "this request will block"
//! before they actually block.

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};

pub type Ticket = u64;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Admission {
    Granted,
    Queued(Ticket),
}

#[derive(Debug)]
struct Waiter<W> {
    ticket: Ticket,
    units: u64,
    owner: W,
    priority: bool,
}

#[derive(Debug)]
struct SemaphoreState<W> {
    available: u64,
    next_ticket: Ticket,
    queue: VecDeque<Waiter<W>>,
    /// Tickets that left the queue with their units but were not yet picked up by `wait`.
    granted: HashMap<Ticket, u64>,
}

impl<W: Clone> SemaphoreState<W> {
    /// Grant from the head while the head fits. Never skips a waiter.
    fn drain(&mut self) -> Vec<W> {
        let mut woken = vec![];
        while let Some(head) = self.queue.front() {
            if head.units > self.available {
                break;
            }
            if let Some(waiter) = self.queue.pop_front() {
                self.available -= waiter.units;
                self.granted.insert(waiter.ticket, waiter.units);
                woken.push(waiter.owner);
            }
        }
        woken
    }
}

#[derive(Debug)]
pub struct FairSemaphore<W> {
    capacity: u64,
    state: Mutex<SemaphoreState<W>>,
    cond: Condvar,
}

impl<W: Clone> FairSemaphore<W> {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            state: Mutex::new(SemaphoreState {
                available: capacity,
                next_ticket: 0,
                queue: VecDeque::new(),
                granted: HashMap::new(),
            }),
            cond: Condvar::new(),
        }
    }

    pub fn available_permits(&self) -> u64 {
        self.state.lock().available
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Grant `units` to `owner` now, or queue it and hand back a ticket for [`wait`].
    ///
    /// A `priority` request is placed behind earlier priority requests but in
    /// front of every ordinary waiter. This departs from strict arrival order on
    /// purpose: it is meant for lock upgrades, whose caller already holds units,
    /// and queueing one behind a waiter that needs those units would never resolve.
    ///
    /// [`wait`]: FairSemaphore::wait
    pub fn admit(&self, units: u64, owner: W, priority: bool) -> Admission {
        debug_assert!(units <= self.capacity);
        let state = &mut *self.state.lock();
        let position = if priority {
            state
                .queue
                .iter()
                .position(|waiter| !waiter.priority)
                .unwrap_or(state.queue.len())
        } else {
            state.queue.len()
        };
        if position == 0 && state.available >= units {
            state.available -= units;
            return Admission::Granted;
        }
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.queue.insert(
            position,
            Waiter {
                ticket,
                units,
                owner,
                priority,
            },
        );
        Admission::Queued(ticket)
    }

    /// Block until `ticket` has been granted.
    pub fn wait(&self, ticket: Ticket) {
        let mut state = self.state.lock();
        while state.granted.remove(&ticket).is_none() {
            self.cond.wait(&mut state);
        }
    }

    /// Withdraw `ticket`. If it had already been granted its units are returned.
    /// Returns the owners granted because the ticket left the queue.
    pub fn cancel(&self, ticket: Ticket) -> Vec<W> {
        let state = &mut *self.state.lock();
        if let Some(units) = state.granted.remove(&ticket) {
            state.available += units;
        } else if let Some(idx) = state.queue.iter().position(|w| w.ticket == ticket) {
            state.queue.remove(idx);
        }
        let woken = state.drain();
        if !woken.is_empty() {
            self.cond.notify_all();
        }
        woken
    }

    /// Return `units` and grant waiters from the head of the queue.
    pub fn release(&self, units: u64) -> Vec<W> {
        let state = &mut *self.state.lock();
        state.available += units;
        debug_assert!(
            state.available + state.granted.values().sum::<u64>() <= self.capacity,
            "released more units than were acquired"
        );
        let woken = state.drain();
        if !woken.is_empty() {
            self.cond.notify_all();
        }
        woken
    }
}
