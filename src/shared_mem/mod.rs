use std::{alloc::Layout, io};

pub use shmlink::unlink_if_exists;
use shmlink::SharedMem;

mod shmlink;

const PAGE_SIZE: usize = 4096;
const _: () = assert!(std::mem::align_of::<PageAligned>() == PAGE_SIZE);

#[repr(align(4096))]
#[expect(dead_code)]
pub struct PageAligned([u8; PAGE_SIZE]);

/// How a named segment is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Open {
    /// Fail if the name already exists.
    CreateExclusive,
    /// Fail if the name does not exist.
    Existing,
}

pub(crate) struct ShmemWrapper {
    shmem: SharedMem,
}

impl ShmemWrapper {
    pub(crate) fn pointer(&self) -> *mut PageAligned {
        self.shmem.as_ptr()
    }

    pub(crate) fn len(&self) -> usize {
        self.shmem.len()
    }
}

/// Maps the segment `name`, sized for `T` when it is created.
pub(crate) fn get_memory<T>(name: &str, open: Open) -> io::Result<ShmemWrapper> {
    const {
        let layout = Layout::new::<T>();
        let page_layout = Layout::new::<PageAligned>();
        assert!(layout.align() <= page_layout.align());
    }
    let size = Layout::new::<T>().size();
    let shmem = match open {
        Open::CreateExclusive => unsafe { SharedMem::create(name, size) }?,
        Open::Existing => unsafe { SharedMem::attach(name) }?,
    };
    Ok(ShmemWrapper { shmem })
}
