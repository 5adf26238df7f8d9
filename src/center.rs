use std::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};

use crate::{
    config::Config,
    error::{CenterError, Result},
    event::{Action, Event, EventLog, Role},
    mutex::{Acquired, PiMutex},
    semaphore::PermitPool,
    shared_mem::{self, Open, ShmemWrapper},
    state::SharedState,
};

const READY: u32 = 0x6b69_6473;

/// Permits dumped into every pool on cancellation. Far more than there can be
/// sleepers, so every current and future waiter gets through.
const CANCEL_FLOOD: u32 = 1 << 24;

/// Layout of the shared segment. Zeroed bytes are a valid empty block; `ready`
/// is published last by the creator.
#[repr(C)]
struct CenterBlock {
    lock: PiMutex,
    ready: AtomicU32,
    cancelled: AtomicU32,
    state: UnsafeCell<SharedState>,
    /// Released by adults (and by the start of child day) to let waiting
    /// children in.
    child_admission: PermitPool,
    /// Released by departing children to let a blocked adult out.
    adult_release: PermitPool,
    /// Posted by each admitted child once it has logged its entry.
    rendezvous: PermitPool,
    shutdown: PermitPool,
}

/// Which of the four permit pools to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    ChildAdmission,
    AdultRelease,
    Rendezvous,
    Shutdown,
}

/// Handle on the coordination resources of one run: the arbitration lock, the
/// shared counters and the four permit pools, all in one named shared-memory
/// segment.
///
/// The handle that created the segment unlinks its name when dropped; attached
/// handles only unmap.
pub struct Center {
    memory: ShmemWrapper,
    name: String,
    owner: bool,
    released: AtomicBool,
}

unsafe impl Send for Center {}
unsafe impl Sync for Center {}

impl Center {
    /// Creates the segment `name` for a new run. Fails if the name is already
    /// taken, e.g. by a crashed previous run; nothing is left behind on failure.
    pub fn create(name: &str, config: &Config) -> Result<Center> {
        let memory = shared_mem::get_memory::<CenterBlock>(name, Open::CreateExclusive).map_err(
            |source| CenterError::Create {
                name: name.to_string(),
                source,
            },
        )?;

        let center = Center {
            memory,
            name: name.to_string(),
            owner: true,
            released: AtomicBool::new(false),
        };
        // nobody else can see the block before `ready` is set
        unsafe { center.block().state.get().write(SharedState::new(config)) };
        center.block().ready.store(READY, Ordering::Release);

        tracing::debug!(segment = name, ?config, "coordination segment created");
        Ok(center)
    }

    /// Attaches to a segment created by [`Center::create`] in another process.
    pub fn attach(name: &str) -> Result<Center> {
        let memory = shared_mem::get_memory::<CenterBlock>(name, Open::Existing).map_err(
            |source| CenterError::Attach {
                name: name.to_string(),
                source,
            },
        )?;
        if memory.len() < size_of::<CenterBlock>() {
            return Err(CenterError::Uninitialized(name.to_string()));
        }

        let center = Center {
            memory,
            name: name.to_string(),
            owner: false,
            released: AtomicBool::new(false),
        };
        if center.block().ready.load(Ordering::Acquire) != READY {
            return Err(CenterError::Uninitialized(name.to_string()));
        }
        Ok(center)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enters a critical section. The lock is released when the returned
    /// section is dropped.
    pub fn lock(&self) -> Result<Section<'_>> {
        let block = self.block();
        if block.lock.lock()? == Acquired::OwnerDied {
            tracing::warn!(
                segment = %self.name,
                "previous lock owner died inside a critical section"
            );
        }
        Ok(Section {
            state: unsafe { &mut *block.state.get() },
            lock: &block.lock,
        })
    }

    /// Blocks on `pool` until a permit is handed over.
    pub fn acquire(&self, pool: Pool) -> Result<()> {
        self.pool(pool).acquire()?;
        if self.block().cancelled.load(Ordering::Acquire) != 0 {
            return Err(CenterError::Cancelled);
        }
        Ok(())
    }

    /// Hands `n` permits to `pool`. Never blocks, so it may be called inside a
    /// critical section.
    pub fn release(&self, pool: Pool, n: u32) -> Result<()> {
        Ok(self.pool(pool).release(n)?)
    }

    /// Wakes every worker blocked on any pool, now or later, with
    /// [`CenterError::Cancelled`].
    pub fn cancel(&self) {
        let block = self.block();
        if block.cancelled.swap(1, Ordering::AcqRel) != 0 {
            return;
        }
        tracing::debug!(segment = %self.name, "cancelling run");
        for pool in [
            Pool::ChildAdmission,
            Pool::AdultRelease,
            Pool::Rendezvous,
            Pool::Shutdown,
        ] {
            if let Err(e) = self.pool(pool).release(CANCEL_FLOOD) {
                tracing::error!(?pool, error = %e, "unable to wake pool while cancelling");
            }
        }
    }

    /// Unlinks the segment name. Safe to call any number of times; mappings in
    /// other processes stay valid until they are dropped.
    pub fn release_name(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        match shared_mem::unlink_if_exists(&self.name) {
            Ok(()) => tracing::debug!(segment = %self.name, "coordination segment released"),
            Err(e) => tracing::warn!(segment = %self.name, error = %e, "unable to unlink segment"),
        }
    }

    /// A copy of the counters, taken under the lock.
    pub fn snapshot(&self) -> Result<SharedState> {
        Ok(*self.lock()?)
    }

    #[cfg(test)]
    pub(crate) fn available(&self, pool: Pool) -> u32 {
        self.pool(pool).available()
    }

    fn pool(&self, pool: Pool) -> &PermitPool {
        let block = self.block();
        match pool {
            Pool::ChildAdmission => &block.child_admission,
            Pool::AdultRelease => &block.adult_release,
            Pool::Rendezvous => &block.rendezvous,
            Pool::Shutdown => &block.shutdown,
        }
    }

    fn block(&self) -> &CenterBlock {
        unsafe { &*self.memory.pointer().cast() }
    }
}

impl Drop for Center {
    fn drop(&mut self) {
        if self.owner {
            self.release_name();
        }
    }
}

/// A held arbitration lock together with the state it protects.
pub struct Section<'a> {
    state: &'a mut SharedState,
    lock: &'a PiMutex,
}

impl Section<'_> {
    /// Logs `action` for worker `role`/`id` with the next sequence number.
    ///
    /// A failing sink is reported and otherwise ignored: stopping here would
    /// leave every other worker blocked.
    pub fn record(&mut self, log: &dyn EventLog, role: Role, id: u32, action: Action) {
        self.state.event_seq += 1;
        let event = Event {
            seq: self.state.event_seq,
            role,
            id,
            action,
            adults: self.state.adults_present,
            children: self.state.children_present,
            child_day: self.state.child_day,
        };
        if let Err(e) = log.append(&event) {
            tracing::error!(%event, error = %e, "unable to write event");
        }
    }
}

impl Deref for Section<'_> {
    type Target = SharedState;

    fn deref(&self) -> &Self::Target {
        self.state
    }
}

impl DerefMut for Section<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.state
    }
}

impl Drop for Section<'_> {
    fn drop(&mut self) {
        let holds = self.state.capacity_holds();
        let state = *self.state;
        unsafe { self.lock.unlock() };
        debug_assert!(holds, "capacity rule broken: {state:?}");
    }
}
