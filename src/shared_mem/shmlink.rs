use std::{
    ffi::{CStr, CString},
    fs::File,
    io,
    os::fd::FromRawFd,
};

use memmap2::MmapMut;

use crate::shared_mem::PageAligned;

fn shm_open(name: &CStr, options: libc::c_int) -> io::Result<File> {
    let mode = 0o600;

    match unsafe { libc::shm_open(name.as_ptr(), options, mode) } {
        -1 => Err(io::Error::last_os_error()),
        fd => Ok(unsafe { File::from_raw_fd(fd) }),
    }
}

fn shm_unlink(name: &CStr) -> io::Result<()> {
    match unsafe { libc::shm_unlink(name.as_ptr()) } {
        0 => Ok(()),
        _ => Err(io::Error::last_os_error()),
    }
}

/// Removes the segment name. A name that is already gone is not an error.
pub fn unlink_if_exists(name: &str) -> io::Result<()> {
    match shm_unlink(&into_shm_name(name)?) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn into_shm_name(path: &str) -> io::Result<CString> {
    CString::new(format!("/{path}")).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

pub struct SharedMem {
    map: MmapMut,
}

impl SharedMem {
    /// Creates `path` exclusively and maps `length` zeroed bytes. If anything
    /// fails after the name exists, the name is unlinked again.
    pub unsafe fn create(path: &str, length: usize) -> io::Result<Self> {
        let name = into_shm_name(path)?;
        let file = shm_open(&name, libc::O_RDWR | libc::O_CREAT | libc::O_EXCL)?;

        let mapped = u64::try_from(length)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
            .and_then(|len| file.set_len(len))
            .and_then(|()| unsafe { MmapMut::map_mut(&file) });
        match mapped {
            Ok(map) => Ok(Self { map }),
            Err(e) => {
                let _ = shm_unlink(&name);
                Err(e)
            }
        }
    }

    /// Maps an existing segment at whatever size its creator gave it.
    pub unsafe fn attach(path: &str) -> io::Result<Self> {
        let name = into_shm_name(path)?;
        let file = shm_open(&name, libc::O_RDWR)?;
        let map = unsafe { MmapMut::map_mut(&file) }?;
        Ok(Self { map })
    }

    pub fn as_ptr(&self) -> *mut PageAligned {
        self.map.as_ptr().cast_mut().cast()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
}
