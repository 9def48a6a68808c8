//! POSIX shared memory segment management.
//!
//! Safe wrappers around `shm_open`, `ftruncate`, and `mmap` for creating and
//! mapping the per-node metadata segment. The creator zero-fills the segment;
//! readers attach with [`ShmSegment::open`]. Segments are unmapped on drop
//! but only unlinked explicitly, so crashed attachers never tear the region
//! down under the node daemon.
//!
//! Segment names follow POSIX rules: a leading `/`, no other `/`, at most
//! 255 bytes.

use crate::error::{Result, ShmError};
use std::ffi::CString;
use std::io;
use std::ptr;

/// A mapped POSIX shared memory segment.
pub struct ShmSegment {
    ptr: *mut u8,
    size: usize,
    name: String,
}

// SAFETY: the mapping is shared between processes by construction; all
// concurrent access goes through atomics or region-resident locks.
unsafe impl Send for ShmSegment {}
unsafe impl Sync for ShmSegment {}

impl ShmSegment {
    /// Create a new segment, replacing any existing segment with this name.
    /// The mapping is zero-filled.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        Self::validate_name(name)?;
        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;

        // SAFETY: c_name is a valid C string; shm_unlink on a missing name
        // is harmless and shm_open's result is checked below.
        let fd = unsafe {
            libc::shm_unlink(c_name.as_ptr());
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            )
        };
        if fd < 0 {
            return Err(ShmError::SegmentCreate(io::Error::last_os_error()));
        }

        // SAFETY: fd is a valid descriptor from the shm_open above.
        let ret = unsafe { libc::ftruncate(fd, size as libc::off_t) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is still open and not used after this point.
            unsafe { libc::close(fd) };
            return Err(ShmError::SegmentCreate(err));
        }

        let ptr = Self::map(fd, size)?;

        // SAFETY: ptr spans `size` writable bytes that no other process has
        // mapped yet (the segment was just created under O_EXCL).
        unsafe { ptr::write_bytes(ptr, 0, size) };

        Ok(Self {
            ptr,
            size,
            name: name.to_string(),
        })
    }

    /// Open and map an existing segment.
    pub fn open(name: &str, size: usize) -> Result<Self> {
        Self::validate_name(name)?;
        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;

        // SAFETY: c_name is a valid C string; the result is checked below.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::NotFound {
                return Err(ShmError::NotFound(name.to_string()));
            }
            return Err(ShmError::SegmentOpen(err));
        }

        let ptr = Self::map(fd, size)?;

        Ok(Self {
            ptr,
            size,
            name: name.to_string(),
        })
    }

    fn map(fd: libc::c_int, size: usize) -> Result<*mut u8> {
        // SAFETY: fd is a valid shared memory descriptor sized by the
        // creator; MAP_SHARED with PROT_READ|PROT_WRITE is the intended
        // cross-process mapping. The descriptor is closed right after; the
        // mapping keeps its own reference.
        let ptr = unsafe {
            let ptr = libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            );
            libc::close(fd);
            ptr
        };
        if ptr == libc::MAP_FAILED {
            return Err(ShmError::Mmap(io::Error::last_os_error()));
        }
        Ok(ptr as *mut u8)
    }

    fn validate_name(name: &str) -> Result<()> {
        if !name.starts_with('/') {
            return Err(ShmError::InvalidName(format!(
                "segment name must start with '/': {name}"
            )));
        }
        if name.len() > 1 && name[1..].contains('/') {
            return Err(ShmError::InvalidName(format!(
                "segment name cannot contain '/' after the prefix: {name}"
            )));
        }
        if name.len() > 255 {
            return Err(ShmError::InvalidName(format!(
                "segment name too long (max 255): {name}"
            )));
        }
        Ok(())
    }

    /// Remove a segment by name. Idempotent: a missing segment is not an
    /// error. Attached processes keep their mappings until they unmap.
    pub fn unlink(name: &str) -> Result<()> {
        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;

        // SAFETY: c_name is a valid C string; unlink only touches the
        // filesystem namespace.
        let ret = unsafe { libc::shm_unlink(c_name.as_ptr()) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::NotFound {
                return Err(ShmError::SegmentOpen(err));
            }
        }
        Ok(())
    }

    /// Whether a segment with this name exists.
    #[must_use]
    pub fn exists(name: &str) -> bool {
        let Ok(c_name) = CString::new(name) else {
            return false;
        };
        // SAFETY: c_name is a valid C string; the descriptor is closed
        // immediately after the existence check.
        unsafe {
            let fd = libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0);
            if fd >= 0 {
                libc::close(fd);
                true
            } else {
                false
            }
        }
    }

    /// Base address of the mapping.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Size of the mapping in bytes.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Segment name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        // SAFETY: ptr/size describe exactly the mapping created in
        // create()/open(); Drop runs once.
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("/tierbuf_test_{tag}_{ts}")
    }

    #[test]
    fn test_validate_name() {
        assert!(ShmSegment::validate_name("/mdm_1").is_ok());
        assert!(ShmSegment::validate_name("mdm_1").is_err());
        assert!(ShmSegment::validate_name("/mdm/1").is_err());
    }

    #[test]
    fn test_create_open_shares_bytes() {
        let name = unique_name("share");
        let creator = ShmSegment::create(&name, 4096).expect("create");

        // SAFETY: offset 0 is within the 4096-byte mapping.
        unsafe { *creator.as_ptr() = 0x5a };

        let attacher = ShmSegment::open(&name, 4096).expect("open");
        // SAFETY: same segment, same bounds.
        unsafe { assert_eq!(*attacher.as_ptr(), 0x5a) };

        drop(attacher);
        drop(creator);
        ShmSegment::unlink(&name).ok();
    }

    #[test]
    fn test_create_zero_fills() {
        let name = unique_name("zero");
        let seg = ShmSegment::create(&name, 4096).expect("create");
        // SAFETY: the whole 4096-byte mapping is readable.
        let bytes = unsafe { std::slice::from_raw_parts(seg.as_ptr(), 4096) };
        assert!(bytes.iter().all(|&b| b == 0));
        drop(seg);
        ShmSegment::unlink(&name).ok();
    }

    #[test]
    fn test_open_missing_segment() {
        let result = ShmSegment::open("/tierbuf_test_missing_0", 4096);
        assert!(matches!(result, Err(ShmError::NotFound(_))));
    }

    #[test]
    fn test_unlink_is_idempotent() {
        let name = unique_name("unlink");
        let _seg = ShmSegment::create(&name, 4096).expect("create");
        assert!(ShmSegment::unlink(&name).is_ok());
        assert!(ShmSegment::unlink(&name).is_ok());
    }
}
