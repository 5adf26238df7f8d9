use std::{
    io,
    sync::atomic::{AtomicU32, Ordering},
};

use nix::errno::Errno;

use crate::futex::sys::{wait, wake};

/// Counting semaphore on a single futex word, usable across processes when it
/// lives in shared memory. Zeroed memory is an empty pool.
///
/// Acquisition order among sleepers is whatever order the kernel wakes them in.
#[repr(C)]
pub struct PermitPool {
    permits: AtomicU32,
}

impl PermitPool {
    /// Takes one permit, sleeping until one is available.
    pub fn acquire(&self) -> io::Result<()> {
        loop {
            let current = self.permits.load(Ordering::Acquire);
            if current > 0 {
                if self
                    .permits
                    .compare_exchange_weak(current, current - 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return Ok(());
                }
                continue;
            }

            match unsafe { wait(&self.permits, 0) } {
                Ok(()) | Err(Errno::EAGAIN) | Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Adds `n` permits and wakes up to `n` sleepers.
    pub fn release(&self, n: u32) -> io::Result<()> {
        if n == 0 {
            return Ok(());
        }
        self.permits.fetch_add(n, Ordering::Release);
        let wake_count = i32::try_from(n).unwrap_or(i32::MAX);
        unsafe { wake(&self.permits, wake_count) }?;
        Ok(())
    }

    #[cfg(test)]
    pub fn available(&self) -> u32 {
        self.permits.load(Ordering::Relaxed)
    }
}
