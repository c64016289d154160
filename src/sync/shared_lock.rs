use std::collections::HashSet;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use crate::consts::LOCK_DELAY;

/// The capability every reader/writer lock primitive offers.
///
/// The primitive may live in process memory or in a shared segment; the
/// behavior is identical, which is what lets the reentrant locker treat
/// them uniformly.
pub trait RwLockable: Send + Sync {
    fn timed_lock(&self, timeout: Duration) -> bool;
    fn unlock(&self);
    fn timed_lock_sharable(&self, timeout: Duration) -> bool;
    fn unlock_sharable(&self);

    fn lock(&self) {
        // the untimed form just spins without a deadline
        while !self.timed_lock(Duration::from_secs(3600)) {}
    }

    fn lock_sharable(&self) {
        while !self.timed_lock_sharable(Duration::from_secs(3600)) {}
    }
}

struct LockCounts {
    scoped: u32,
    sharable: u32,
}

/// Simple RW lock: two counters behind a mutex and a nap loop.
///
/// Reader-preferring: a stream of readers can keep a writer out
/// indefinitely, except that a writer which has booked the exclusive slot
/// blocks new readers while the old ones drain.
pub struct SharedLock {
    state: Mutex<LockCounts>,
}

enum BookState {
    None,
    Scoped,
    Sharable,
}

impl SharedLock {
    pub fn new() -> Self {
        SharedLock {
            state: Mutex::new(LockCounts {
                scoped: 0,
                sharable: 0,
            }),
        }
    }

    pub fn try_lock(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.scoped == 0 && state.sharable == 0 {
            state.scoped = 1;
            return true;
        }
        false
    }

    /// Book the exclusive slot; the caller still has to wait for the
    /// readers to drain when some are present.
    fn try_book_lock(&self) -> BookState {
        let mut state = self.state.lock().unwrap();
        if state.scoped == 0 {
            state.scoped = 1;
            if state.sharable == 0 {
                return BookState::None;
            }
            return BookState::Sharable;
        }
        BookState::Scoped
    }

    fn sharable_count(&self) -> u32 {
        self.state.lock().unwrap().sharable
    }

    pub fn try_lock_sharable(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.scoped == 0 && state.sharable < u32::MAX {
            state.sharable += 1;
            return true;
        }
        false
    }
}

impl RwLockable for SharedLock {
    fn timed_lock(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match self.try_book_lock() {
                BookState::None => return true,
                BookState::Scoped => {}
                BookState::Sharable => {
                    // booked; wait for the readers, give the slot back on
                    // timeout
                    while Instant::now() < deadline {
                        if self.sharable_count() == 0 {
                            return true;
                        }
                        thread::sleep(LOCK_DELAY);
                    }
                    self.unlock();
                    return false;
                }
            }
            thread::sleep(LOCK_DELAY);
        }
        false
    }

    fn unlock(&self) {
        let mut state = self.state.lock().unwrap();
        debug_assert_eq!(state.scoped, 1, "unlock without the exclusive lock");
        state.scoped = 0;
    }

    fn timed_lock_sharable(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_lock_sharable() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(LOCK_DELAY);
        }
    }

    fn unlock_sharable(&self) {
        let mut state = self.state.lock().unwrap();
        debug_assert!(state.sharable > 0, "unlock_sharable without a shared lock");
        state.sharable -= 1;
    }
}

struct OrderedState {
    scoped: u32,
    sharable: u32,
    next_ticket: u64,
    serving: u64,
    abandoned: HashSet<u64>,
}

impl OrderedState {
    /// Skip over tickets whose owners gave up waiting.
    fn skip_abandoned(&mut self) {
        while self.abandoned.remove(&self.serving) {
            self.serving += 1;
        }
    }
}

/// FIFO-fair RW lock: acquirers draw tickets and are admitted strictly in
/// ticket order, so neither readers nor the writer starve. Consecutive
/// readers still share the lock: each one passes its turn on as soon as it
/// is admitted.
pub struct OrderedSharedLock {
    state: Mutex<OrderedState>,
}

impl OrderedSharedLock {
    pub fn new() -> Self {
        OrderedSharedLock {
            state: Mutex::new(OrderedState {
                scoped: 0,
                sharable: 0,
                next_ticket: 0,
                serving: 0,
                abandoned: HashSet::new(),
            }),
        }
    }

    /// Succeeds only when the queue is empty and the lock is free; no
    /// ticket is drawn on failure.
    pub fn try_lock(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        state.skip_abandoned();
        if state.serving == state.next_ticket && state.scoped == 0 && state.sharable == 0 {
            state.next_ticket += 1;
            state.serving += 1;
            state.scoped = 1;
            return true;
        }
        false
    }

    pub fn try_lock_sharable(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        state.skip_abandoned();
        if state.serving == state.next_ticket && state.scoped == 0 {
            state.next_ticket += 1;
            state.serving += 1;
            state.sharable += 1;
            return true;
        }
        false
    }

    fn draw_ticket(&self) -> u64 {
        let mut state = self.state.lock().unwrap();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        ticket
    }

    /// Leave the queue after a timeout without blocking later tickets.
    fn give_up(&self, ticket: u64) {
        let mut state = self.state.lock().unwrap();
        if state.serving == ticket {
            state.serving += 1;
            state.skip_abandoned();
        } else {
            state.abandoned.insert(ticket);
        }
    }
}

impl RwLockable for OrderedSharedLock {
    fn timed_lock(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let ticket = self.draw_ticket();
        loop {
            {
                let mut state = self.state.lock().unwrap();
                state.skip_abandoned();
                if state.serving == ticket && state.scoped == 0 && state.sharable == 0 {
                    state.serving += 1;
                    state.scoped = 1;
                    return true;
                }
            }
            if Instant::now() >= deadline {
                self.give_up(ticket);
                return false;
            }
            thread::sleep(LOCK_DELAY);
        }
    }

    fn unlock(&self) {
        let mut state = self.state.lock().unwrap();
        debug_assert_eq!(state.scoped, 1, "unlock without the exclusive lock");
        state.scoped = 0;
    }

    fn timed_lock_sharable(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let ticket = self.draw_ticket();
        loop {
            {
                let mut state = self.state.lock().unwrap();
                state.skip_abandoned();
                if state.serving == ticket && state.scoped == 0 {
                    state.serving += 1;
                    state.sharable += 1;
                    return true;
                }
            }
            if Instant::now() >= deadline {
                self.give_up(ticket);
                return false;
            }
            thread::sleep(LOCK_DELAY);
        }
    }

    fn unlock_sharable(&self) {
        let mut state = self.state.lock().unwrap();
        debug_assert!(state.sharable > 0, "unlock_sharable without a shared lock");
        state.sharable -= 1;
    }
}
