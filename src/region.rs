// region.rs - Executable memory for the hex loader

use std::fmt;
use std::io;

/// Size of the loader's code region (64 KiB).
pub const REGION_SIZE: usize = 0x10000;

#[derive(Debug)]
pub enum RegionError {
    Map(io::Error),
    Protect(io::Error),
    Full,
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RegionError::Map(e) => write!(f, "mmap failed: {}", e),
            RegionError::Protect(e) => write!(f, "mprotect failed: {}", e),
            RegionError::Full => write!(f, "code region full"),
        }
    }
}

impl std::error::Error for RegionError {}

#[cfg(target_os = "macos")]
extern "C" {
    fn pthread_jit_write_protect_np(enabled: libc::c_int);
    fn sys_icache_invalidate(start: *mut libc::c_void, len: libc::size_t);
}

#[cfg(not(target_os = "macos"))]
extern "C" {
    fn __clear_cache(begin: *mut libc::c_char, end: *mut libc::c_char);
}

/// A writable, append-only code region. Sealing it yields the executable
/// view; the two views never coexist.
pub struct JitRegion {
    ptr: *mut u8,
    len: usize,
    used: usize,
}

impl JitRegion {
    pub fn new(len: usize) -> Result<Self, RegionError> {
        let ptr = map_region(len)?;
        #[cfg(target_os = "macos")]
        unsafe {
            pthread_jit_write_protect_np(0);
        }
        Ok(JitRegion { ptr, len, used: 0 })
    }

    /// Append one byte of machine code.
    pub fn push(&mut self, byte: u8) -> Result<(), RegionError> {
        if self.used >= self.len {
            return Err(RegionError::Full);
        }
        unsafe {
            *self.ptr.add(self.used) = byte;
        }
        self.used += 1;
        Ok(())
    }

    /// The bytes written so far.
    pub fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.used) }
    }

    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn capacity(&self) -> usize {
        self.len
    }

    /// Make the region executable. Cleans the data cache and invalidates
    /// the instruction cache over the written range (with the barriers the
    /// architecture requires) before anything may branch into it.
    pub fn seal(self) -> Result<SealedRegion, RegionError> {
        let (ptr, len, used) = (self.ptr, self.len, self.used);
        std::mem::forget(self);

        #[cfg(target_os = "macos")]
        unsafe {
            pthread_jit_write_protect_np(1);
            sys_icache_invalidate(ptr as *mut libc::c_void, used);
        }

        #[cfg(not(target_os = "macos"))]
        unsafe {
            let rc = libc::mprotect(
                ptr as *mut libc::c_void,
                len,
                libc::PROT_READ | libc::PROT_EXEC,
            );
            if rc != 0 {
                return Err(RegionError::Protect(io::Error::last_os_error()));
            }
            __clear_cache(ptr as *mut libc::c_char, ptr.add(used) as *mut libc::c_char);
        }

        Ok(SealedRegion { ptr, len, used })
    }
}

impl Drop for JitRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}

/// The executable view of a sealed region.
pub struct SealedRegion {
    ptr: *mut u8,
    len: usize,
    used: usize,
}

impl SealedRegion {
    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Branch to the start of the region.
    ///
    /// # Safety
    ///
    /// The region must contain valid machine code for the running
    /// architecture that follows the platform calling convention.
    pub unsafe fn enter(&self) {
        let entry: extern "C" fn() = std::mem::transmute(self.ptr);
        entry();
    }
}

impl Drop for SealedRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}

#[cfg(target_os = "macos")]
fn map_region(len: usize) -> Result<*mut u8, RegionError> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
            libc::MAP_PRIVATE | libc::MAP_ANON | libc::MAP_JIT,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(RegionError::Map(io::Error::last_os_error()));
    }
    Ok(ptr as *mut u8)
}

#[cfg(not(target_os = "macos"))]
fn map_region(len: usize) -> Result<*mut u8, RegionError> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(RegionError::Map(io::Error::last_os_error()));
    }
    Ok(ptr as *mut u8)
}
