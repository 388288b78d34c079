// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Named POSIX shared memory segments.
//!
//! The server process creates segments; client processes open them. A
//! segment is unmapped on drop but only unlinked explicitly by its creator,
//! so the mapping survives in peers until they drop their own handle.
//!
//! Names must start with `/`, contain no other `/`, and stay under the
//! POSIX 255-character limit.

use super::{Result, ShmError};
use std::ffi::CString;
use std::io;
use std::ptr;

/// A mapped POSIX shared memory segment.
pub struct ShmSegment {
    ptr: *mut u8,
    size: usize,
    name: String,
}

// SAFETY: the mapping is plain memory shared between processes; all
// structures placed in it synchronize through atomics.
unsafe impl Send for ShmSegment {}
unsafe impl Sync for ShmSegment {}

impl ShmSegment {
    /// Create a new segment, replacing any stale one of the same name.
    ///
    /// The region is zero-filled before being returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or any of `shm_open`,
    /// `ftruncate`, `mmap` fails.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        Self::validate_name(name)?;

        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;

        // SAFETY: c_name is a valid NUL-terminated string. A leftover
        // segment from a crashed server is removed first (errors ignored);
        // O_CREAT|O_EXCL then guarantees we own a fresh one.
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

        // SAFETY: fd is the descriptor just obtained above.
        let rc = unsafe { libc::ftruncate(fd, size as libc::off_t) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is still open; this is the error path, fd is not reused.
            unsafe { libc::close(fd) };
            return Err(ShmError::SegmentCreate(err));
        }

        let ptr = Self::map(fd, size)?;

        // SAFETY: ptr maps exactly `size` writable bytes and no other
        // process has attached yet (the segment was just created).
        unsafe { ptr::write_bytes(ptr, 0, size) };

        Ok(Self {
            ptr,
            size,
            name: name.to_string(),
        })
    }

    /// Open an existing segment created by a peer process.
    ///
    /// # Errors
    ///
    /// `ShmError::NotFound` when no segment of that name exists, other
    /// variants on open/mapping failures.
    pub fn open(name: &str, size: usize) -> Result<Self> {
        Self::validate_name(name)?;

        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;

        // SAFETY: c_name is a valid NUL-terminated string; mode is ignored
        // without O_CREAT.
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
        // SAFETY: fd is a valid descriptor; MAP_SHARED with
        // PROT_READ|PROT_WRITE is the standard cross-process mapping. The
        // descriptor can be closed right after, the mapping keeps its own
        // reference.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        // SAFETY: fd is valid; closing does not invalidate the mapping.
        unsafe { libc::close(fd) };

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
                "segment name must not contain '/' after the prefix: {name}"
            )));
        }
        if name.len() > 255 {
            return Err(ShmError::InvalidName(format!(
                "segment name too long (max 255): {name}"
            )));
        }
        Ok(())
    }

    /// Remove a segment from the namespace. Idempotent: a missing segment
    /// is not an error.
    pub fn unlink(name: &str) -> Result<()> {
        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;

        // SAFETY: c_name is a valid NUL-terminated string; shm_unlink only
        // touches the filesystem namespace.
        let rc = unsafe { libc::shm_unlink(c_name.as_ptr()) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::NotFound {
                return Err(ShmError::SegmentOpen(err));
            }
        }
        Ok(())
    }

    /// Whether a segment of the given name currently exists.
    #[must_use]
    pub fn exists(name: &str) -> bool {
        let Ok(c_name) = CString::new(name) else {
            return false;
        };
        // SAFETY: read-only probe; the descriptor is closed immediately.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0) };
        if fd >= 0 {
            // SAFETY: fd is valid and not used afterwards.
            unsafe { libc::close(fd) };
            true
        } else {
            false
        }
    }

    /// Raw pointer to the start of the mapping.
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

    /// Name the segment was created or opened under.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        // SAFETY: ptr/size came from a successful mmap and Drop runs once.
        // Unlinking remains the creator's responsibility.
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.size);
        }
    }
}

/// Remove all segments belonging to a database, the connection queue and any
/// per-session wires left behind by a crashed server.
///
/// Returns the number of segments removed.
pub fn cleanup_database_segments(database_name: &str) -> usize {
    let shm_dir = std::path::Path::new("/dev/shm");
    let Ok(entries) = std::fs::read_dir(shm_dir) else {
        return 0;
    };

    let session_prefix = format!("{database_name}-");
    let mut removed = 0;
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if name == database_name || name.starts_with(&session_prefix) {
            let segment_name = format!("/{name}");
            if ShmSegment::unlink(&segment_name).is_ok() {
                log::debug!("removed stale segment {segment_name}");
                removed += 1;
            }
        }
    }
    removed
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
        format!("/portico_{tag}_{ts}")
    }

    #[test]
    fn validate_name_rules() {
        assert!(ShmSegment::validate_name("/db").is_ok());
        assert!(ShmSegment::validate_name("/db-12").is_ok());
        assert!(ShmSegment::validate_name("db").is_err());
        assert!(ShmSegment::validate_name("/db/12").is_err());
    }

    #[test]
    fn create_and_open_share_bytes() {
        let name = unique_name("seg");
        let seg1 = ShmSegment::create(&name, 4096).expect("create");
        assert_eq!(seg1.size(), 4096);

        // SAFETY: offsets 0 and 1 are inside the 4096-byte mapping.
        unsafe {
            *seg1.as_ptr() = 0xa5;
            *seg1.as_ptr().add(1) = 0x5a;
        }

        let seg2 = ShmSegment::open(&name, 4096).expect("open");
        // SAFETY: same region, same offsets.
        unsafe {
            assert_eq!(*seg2.as_ptr(), 0xa5);
            assert_eq!(*seg2.as_ptr().add(1), 0x5a);
        }

        drop(seg2);
        drop(seg1);
        ShmSegment::unlink(&name).ok();
    }

    #[test]
    fn create_zero_fills() {
        let name = unique_name("zero");
        let seg = ShmSegment::create(&name, 4096).expect("create");
        // SAFETY: reading within the mapping bounds.
        let all_zero = unsafe { (0..4096).all(|i| *seg.as_ptr().add(i) == 0) };
        assert!(all_zero);
        ShmSegment::unlink(&name).ok();
    }

    #[test]
    fn open_missing_is_not_found() {
        let result = ShmSegment::open("/portico_no_such_segment_0", 4096);
        assert!(matches!(result, Err(ShmError::NotFound(_))));
    }

    #[test]
    fn unlink_is_idempotent() {
        let name = unique_name("unlink");
        let _seg = ShmSegment::create(&name, 4096).expect("create");
        assert!(ShmSegment::unlink(&name).is_ok());
        assert!(ShmSegment::unlink(&name).is_ok());
    }

    #[test]
    fn exists_probe() {
        let name = unique_name("exists");
        assert!(!ShmSegment::exists(&name));
        let _seg = ShmSegment::create(&name, 4096).expect("create");
        assert!(ShmSegment::exists(&name));
        ShmSegment::unlink(&name).ok();
    }

    #[test]
    fn cleanup_removes_queue_and_session_wires() {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let db = format!("portico_gc_{ts}");

        let _a = ShmSegment::create(&format!("/{db}"), 4096).expect("create queue");
        let _b = ShmSegment::create(&format!("/{db}-1"), 4096).expect("create wire");

        let removed = cleanup_database_segments(&db);
        assert_eq!(removed, 2);
        assert!(!ShmSegment::exists(&format!("/{db}")));
        assert!(!ShmSegment::exists(&format!("/{db}-1")));
    }
}
