use std::{io, sync::atomic::Ordering};

use nix::errno::Errno;

use crate::futex::{
    self, FUTEX_OWNER_DIED, RobustList, RobustWord,
    sys::{lock_pi, unlock_pi},
    tid,
};

/// Robust priority-inheriting mutex that can live in shared memory.
///
/// All-zero bytes are a valid unlocked mutex, so a freshly truncated segment
/// needs no further initialization.
#[repr(C)]
pub struct PiMutex(pub(crate) RobustWord);

/// What the lock found when it was acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    Clean,
    /// The previous owner died while holding the lock; the protected data may
    /// be mid-update.
    OwnerDied,
}

impl PiMutex {
    /// Blocks until the calling thread owns the mutex. Signals never abort the
    /// wait.
    pub fn lock(&self) -> io::Result<Acquired> {
        let me = tid() as u32;
        if self
            .0
            .futex
            .compare_exchange(0, me, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            unsafe { futex::robust_add(self.link()) };
            return Ok(Acquired::Clean);
        }

        loop {
            match unsafe { lock_pi(&self.0.futex) } {
                Ok(()) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let mut acquired = Acquired::Clean;
        if self.0.futex.load(Ordering::Acquire) & FUTEX_OWNER_DIED != 0 {
            self.0.futex.fetch_and(!FUTEX_OWNER_DIED, Ordering::Relaxed);
            acquired = Acquired::OwnerDied;
        }

        unsafe { futex::robust_add(self.link()) };
        Ok(acquired)
    }

    /// # Safety
    ///
    /// The calling thread must own the mutex.
    pub unsafe fn unlock(&self) {
        unsafe { futex::robust_remove(self.link()) };

        let me = tid() as u32;
        if self
            .0
            .futex
            .compare_exchange(me, 0, Ordering::Release, Ordering::Relaxed)
            .is_ok()
        {
            return;
        }
        // waiters present: the kernel hands the lock over
        let _ = unsafe { unlock_pi(&self.0.futex) };
    }

    fn link(&self) -> *mut RobustList {
        &self.0.next as *const _ as *mut RobustList
    }
}
