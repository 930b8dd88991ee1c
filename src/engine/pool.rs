use std::sync::{Arc, Mutex};

use rand::{SeedableRng as _, rngs::SmallRng};

use crate::{driver::CookieJar, prelude::*};


/// Per-worker state. It is moved into the iteration task and handed back to
/// the pool when the iteration is done, so it is never shared.
#[derive(Debug)]
pub struct VirtualUser {
    pub id: u32,
    pub rng: SmallRng,
    pub cookies: CookieJar,
}

impl VirtualUser {
    fn new(id: u32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed.wrapping_add(id.into())),
            None => SmallRng::from_os_rng(),
        };
        Self { id, rng, cookies: CookieJar::new() }
    }
}

/// Workers that are currently not running an iteration.
#[derive(Debug, Clone, Default)]
pub struct IdleList(Arc<Mutex<Vec<VirtualUser>>>);

impl IdleList {
    pub fn push(&self, vu: VirtualUser) {
        // A poisoned lock only means some other thread panicked while pushing
        // or popping; the vector itself is fine.
        self.0.lock().unwrap_or_else(|e| e.into_inner()).push(vu);
    }

    fn pop(&self) -> Option<VirtualUser> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).pop()
    }

    fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Bounded pool of virtual workers. Workers are created lazily once the
/// pre-allocated ones are all busy, up to `max`.
#[derive(Debug)]
pub struct VuPool {
    idle: IdleList,
    allocated: u32,
    max: u32,
    seed: Option<u64>,
}

impl VuPool {
    pub fn new(pre_allocated: u32, max: u32, seed: Option<u64>) -> Self {
        let mut pool = Self { idle: IdleList::default(), allocated: 0, max, seed };
        for _ in 0..pre_allocated.min(max) {
            let vu = pool.allocate();
            pool.idle.push(vu);
        }
        pool
    }

    fn allocate(&mut self) -> VirtualUser {
        let vu = VirtualUser::new(self.allocated, self.seed);
        self.allocated += 1;
        vu
    }

    /// Returns an idle worker, allocating a new one if there is none and the
    /// maximum is not reached yet. `None` means the iteration has to be
    /// dropped.
    pub fn acquire(&mut self) -> Option<VirtualUser> {
        if let Some(vu) = self.idle.pop() {
            return Some(vu);
        }
        if self.allocated < self.max {
            let vu = self.allocate();
            trace!(id = vu.id, allocated = self.allocated, "allocated new virtual worker");
            return Some(vu);
        }
        None
    }

    /// Handle that iteration tasks use to return their worker.
    pub fn idle_list(&self) -> IdleList {
        self.idle.clone()
    }

    pub fn allocated(&self) -> u32 {
        self.allocated
    }

    /// Number of allocated workers currently running an iteration.
    pub fn busy(&self) -> u32 {
        self.allocated.saturating_sub(self.idle.len() as u32)
    }
}
