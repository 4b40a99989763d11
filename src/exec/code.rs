//! Code segment and executable-memory installation.

use std::io;

use crate::errors::CompileError;

/// A growable byte buffer that native code is assembled into. Appends are
/// monotonic; sections (function bodies, preambles, stubs) are placed at
/// 16-byte-aligned cursors and addressed by their returned offsets.
#[derive(Debug, Default, Clone)]
pub struct CodeSegment {
    bytes: Vec<u8>,
}

impl CodeSegment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Pads with `brk #0` filler words up to 16-byte alignment and returns
    /// the aligned cursor.
    pub fn align16(&mut self) -> usize {
        while self.bytes.len() % 16 != 0 {
            // brk #0xf000, the canonical dead-space filler.
            self.bytes.extend_from_slice(&0xD43E_0000u32.to_le_bytes());
        }
        self.bytes.len()
    }

    /// Appends a section and returns its start offset, 16-aligned.
    pub fn append(&mut self, section: &[u8]) -> usize {
        let offset = self.align16();
        self.bytes.extend_from_slice(section);
        offset
    }

    pub fn push_u32(&mut self, word: u32) {
        self.bytes.extend_from_slice(&word.to_le_bytes());
    }

    /// Patches a previously emitted 32-bit word in place.
    pub fn patch_u32(&mut self, offset: usize, word: u32) -> Result<(), CompileError> {
        let slot = self
            .bytes
            .get_mut(offset..offset + 4)
            .ok_or_else(|| CompileError::bug(format!("patch offset {offset:#x} out of segment")))?;
        slot.copy_from_slice(&word.to_le_bytes());
        Ok(())
    }
}

/// Code installed into executable memory. Unmapped on drop; the engine keeps
/// one alive per in-flight call so teardown waits for the last caller.
pub struct ExecutableCode {
    ptr: *mut u8,
    len: usize,
}

// The mapping is immutable once published.
unsafe impl Send for ExecutableCode {}
unsafe impl Sync for ExecutableCode {}

impl ExecutableCode {
    /// Maps the segment into executable memory. The segment must be
    /// non-empty.
    pub fn install(segment: &CodeSegment) -> io::Result<Self> {
        let len = segment.len().max(1);
        let ptr = alloc_region(len)?;
        write_code(ptr, segment.bytes())?;
        protect_region(ptr, len)?;
        tracing::debug!(len, "installed executable code segment");
        Ok(Self { ptr, len })
    }

    pub fn ptr_at(&self, offset: usize) -> *const u8 {
        debug_assert!(offset < self.len);
        unsafe { self.ptr.add(offset) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for ExecutableCode {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.len);
            }
        }
    }
}

#[cfg(target_os = "macos")]
fn alloc_region(len: usize) -> io::Result<*mut u8> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
            libc::MAP_ANON | libc::MAP_PRIVATE | libc::MAP_JIT,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(ptr as *mut u8)
}

#[cfg(not(target_os = "macos"))]
fn alloc_region(len: usize) -> io::Result<*mut u8> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_ANON | libc::MAP_PRIVATE,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(ptr as *mut u8)
}

fn write_code(ptr: *mut u8, code: &[u8]) -> io::Result<()> {
    #[cfg(target_os = "macos")]
    unsafe {
        pthread_jit_write_protect_np(0);
        std::ptr::copy_nonoverlapping(code.as_ptr(), ptr, code.len());
        sys_icache_invalidate(ptr as *mut libc::c_void, code.len());
        pthread_jit_write_protect_np(1);
    }

    #[cfg(not(target_os = "macos"))]
    unsafe {
        std::ptr::copy_nonoverlapping(code.as_ptr(), ptr, code.len());
        #[cfg(target_arch = "aarch64")]
        __clear_cache(
            ptr as *mut libc::c_char,
            ptr.add(code.len()) as *mut libc::c_char,
        );
    }

    Ok(())
}

#[cfg(target_os = "macos")]
fn protect_region(_ptr: *mut u8, _len: usize) -> io::Result<()> {
    Ok(())
}

#[cfg(not(target_os = "macos"))]
fn protect_region(ptr: *mut u8, len: usize) -> io::Result<()> {
    let rc = unsafe { libc::mprotect(ptr as *mut libc::c_void, len, libc::PROT_READ | libc::PROT_EXEC) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(target_os = "macos")]
extern "C" {
    fn pthread_jit_write_protect_np(enabled: libc::c_int);
    fn sys_icache_invalidate(start: *mut libc::c_void, len: libc::size_t);
}

#[cfg(all(not(target_os = "macos"), target_arch = "aarch64"))]
extern "C" {
    fn __clear_cache(begin: *mut libc::c_char, end: *mut libc::c_char);
}

#[cfg(test)]
#[path = "../tests/exec/t_code.rs"]
mod tests;
