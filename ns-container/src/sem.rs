//! Two anonymous POSIX semaphores in shared memory, used to pin a child's
//! mount namespace before it exits. `nix` has no `sem_t` wrapper, so this
//! layer calls `libc::sem_init`/`sem_post`/`sem_wait`/`sem_destroy`
//! directly atop an anonymous `MAP_SHARED` mapping (`pshared=1`), which
//! works across the fork boundary this handshake spans.

use std::num::NonZeroUsize;
use std::ptr::NonNull;

use nix::sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags};

use crate::error::NsError;

pub struct AnonSemaphore {
    ptr: NonNull<libc::sem_t>,
}

impl AnonSemaphore {
    pub fn new() -> Result<Self, NsError> {
        let len = NonZeroUsize::new(std::mem::size_of::<libc::sem_t>())
            .expect("sem_t is never zero-sized");
        let mapped = unsafe {
            mmap_anonymous(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
            )
        }?;
        let sem_ptr = mapped.cast::<libc::sem_t>();

        let rc = unsafe { libc::sem_init(sem_ptr.as_ptr(), 1, 0) };
        if rc != 0 {
            unsafe { let _ = munmap(mapped, len.get()); }
            return Err(NsError::BaseMountFailed(format!(
                "sem_init failed: {}",
                std::io::Error::last_os_error()
            )));
        }

        Ok(AnonSemaphore { ptr: sem_ptr })
    }

    pub fn post(&self) -> Result<(), NsError> {
        let rc = unsafe { libc::sem_post(self.ptr.as_ptr()) };
        if rc != 0 {
            return Err(NsError::ChildFailed(format!(
                "sem_post failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }

    pub fn wait(&self) -> Result<(), NsError> {
        let rc = unsafe { libc::sem_wait(self.ptr.as_ptr()) };
        if rc != 0 {
            return Err(NsError::ChildFailed(format!(
                "sem_wait failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}

impl Drop for AnonSemaphore {
    fn drop(&mut self) {
        unsafe {
            libc::sem_destroy(self.ptr.as_ptr());
            let len = std::mem::size_of::<libc::sem_t>();
            let _ = munmap(self.ptr.cast(), len);
        }
    }
}

// Safety: the memory behind `ptr` is an anonymous MAP_SHARED mapping whose
// validity does not depend on which process (post-fork) or thread touches
// it; `sem_t` itself is designed for inter-process synchronization.
unsafe impl Send for AnonSemaphore {}
unsafe impl Sync for AnonSemaphore {}
