//! Thin layer over Linux futexes and the per-thread robust list.
//!
//! Everything here operates on words that may live in a `MAP_SHARED` mapping, so
//! only the process-shared (non `_PRIVATE`) futex operations are used.

use std::{cell::OnceCell, io, mem::offset_of, ptr, sync::atomic::AtomicU32};

use libc::{self, c_int, c_long, pid_t};
use nix::errno::Errno;

pub const FUTEX_LOCK_PI: c_int = libc::FUTEX_LOCK_PI;
pub const FUTEX_UNLOCK_PI: c_int = libc::FUTEX_UNLOCK_PI;

pub const FUTEX_OWNER_DIED: u32 = libc::FUTEX_OWNER_DIED;

/// Minimal robust-list structs (kernel ABI); see linux/futex.h.
#[repr(C)]
pub struct RobustList {
    pub next: *mut RobustList,
}

#[repr(C)]
pub struct RobustListHead {
    pub list: RobustList,
    /// offset between `&mutex.next` and `&mutex.futex`
    pub futex_offset: isize,
    pub list_op_pending: *mut RobustList,
}

/// C layout of a robust mutex word plus the list link the kernel walks when the
/// owning thread dies.
#[repr(C)]
pub struct RobustWord {
    pub futex: AtomicU32,
    pub next: usize,
    pub previous: usize,
}

thread_local! {
    static MY_TID: std::cell::Cell<pid_t> = const { std::cell::Cell::new(0) };
    static ROBUST: OnceCell<RobustListHead> = const { OnceCell::new() };
}

#[inline]
fn gettid() -> pid_t {
    unsafe { libc::syscall(libc::SYS_gettid) as pid_t }
}

fn ensure_registered(offset: isize) {
    ROBUST.with(|cell| {
        if cell.get().is_some() {
            return;
        }
        let _ = cell.set(RobustListHead {
            list: RobustList {
                next: ptr::null_mut(),
            },
            futex_offset: offset,
            list_op_pending: ptr::null_mut(),
        });
        let Some(head) = cell.get() else {
            return;
        };

        // The head must be registered at its final address, so the sentinel is
        // linked after it has been moved into the thread-local.
        let head = head as *const RobustListHead as *mut RobustListHead;
        let r = unsafe {
            (*head).list.next = &raw mut (*head).list;
            libc::syscall(
                libc::SYS_set_robust_list,
                head,
                std::mem::size_of::<RobustListHead>(),
            )
        };
        if r != 0 {
            tracing::warn!(
                error = %io::Error::last_os_error(),
                "set_robust_list failed; lock recovery after a crash is disabled for this thread"
            );
        }
    });
}

/// Kernel thread id of the caller, registering the robust list on first use.
pub fn tid() -> pid_t {
    use std::sync::Once;
    static ONCE: Once = Once::new();

    if let Some(id) = MY_TID.try_with(|t| t.get()).ok().filter(|tid| *tid != 0) {
        return id;
    }

    let id = gettid();
    MY_TID.with(|t| t.set(id));

    let offset = offset_of!(RobustWord, futex) as isize - offset_of!(RobustWord, next) as isize;
    ensure_registered(offset);

    unsafe extern "C" fn atfork_child() {
        MY_TID.with(|t| t.set(0));
    }
    ONCE.call_once(|| unsafe {
        libc::pthread_atfork(None, None, Some(atfork_child));
    });

    id
}

unsafe fn futex_raw(
    uaddr: *const u32,
    op: c_int,
    val: c_int,
    val2: usize,
    uaddr2: *const u32,
    val3: c_int,
) -> nix::Result<c_long> {
    let ret = unsafe { libc::syscall(libc::SYS_futex, uaddr, op, val, val2, uaddr2, val3) };
    if ret == -1 {
        Err(Errno::last())
    } else {
        Ok(ret)
    }
}

pub mod sys {
    use super::*;

    #[inline]
    pub unsafe fn lock_pi(addr: &AtomicU32) -> nix::Result<()> {
        unsafe {
            futex_raw(
                addr as *const _ as *const u32,
                FUTEX_LOCK_PI,
                1,
                0,
                ptr::null(),
                0,
            )
        }
        .map(|_| ())
    }

    #[inline]
    pub unsafe fn unlock_pi(addr: &AtomicU32) -> nix::Result<()> {
        unsafe {
            futex_raw(
                addr as *const _ as *const u32,
                FUTEX_UNLOCK_PI,
                0,
                0,
                ptr::null(),
                0,
            )
        }
        .map(|_| ())
    }

    /// Sleeps while `*addr == val`. Returns `EAGAIN` if the word already differs.
    #[inline]
    pub unsafe fn wait(addr: &AtomicU32, val: u32) -> nix::Result<()> {
        unsafe {
            futex_raw(
                addr as *const _ as *const u32,
                libc::FUTEX_WAIT,
                val as _,
                0,
                ptr::null(),
                0,
            )
        }
        .map(|_| ())
    }

    /// Wakes up to `n` sleepers on `addr`, returning how many were woken.
    #[inline]
    pub unsafe fn wake(addr: &AtomicU32, n: i32) -> nix::Result<i32> {
        unsafe {
            futex_raw(
                addr as *const _ as *const u32,
                libc::FUTEX_WAKE,
                n,
                0,
                ptr::null(),
                0,
            )
        }
        .map(|v| v as i32)
    }
}

/// Push `next_ptr` at the front of the current thread's robust list.
///
/// Safety: caller must hold the mutex that owns `next_ptr`.
pub(crate) unsafe fn robust_add(next_ptr: *mut RobustList) {
    ROBUST.with(|cell| unsafe {
        let Some(head) = cell.get() else {
            return;
        };
        let head = head as *const _ as *mut RobustListHead;
        (*next_ptr).next = (*head).list.next;
        std::sync::atomic::compiler_fence(std::sync::atomic::Ordering::SeqCst);
        (*head).list.next = next_ptr;
    });
}

/// Unlink `next_ptr` from the thread's robust list (O(N) walk, list is tiny).
///
/// Safety: caller must hold the mutex that owns `next_ptr`.
pub(crate) unsafe fn robust_remove(next_ptr: *mut RobustList) {
    ROBUST.with(|cell| {
        let Some(head) = cell.get() else {
            return;
        };
        let head = head as *const _ as *mut RobustListHead;
        unsafe {
            let mut prev = &mut (*head).list as *mut RobustList;
            let mut cur = (*prev).next;
            while !cur.is_null() && cur != &(*head).list as *const _ as *mut RobustList {
                if cur == next_ptr {
                    (*prev).next = (*cur).next;
                    break;
                }
                prev = cur;
                cur = (*cur).next;
            }
        }
    });
}
