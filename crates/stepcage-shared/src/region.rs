//! The per-step shared region: an anonymous mapping carrying a robust,
//! process-shared mutex and the three handshake counters every task of the
//! step coordinates through. Created once, before any task of the step
//! runs, and inherited by every task process via `fork()` the way any
//! `MAP_SHARED | MAP_ANONYMOUS` mapping is.
//!
//! Never put anything but plain old data in here: no heap pointers, no
//! `Arc`, nothing whose validity depends on being read in the process that
//! allocated it.

use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};

use crate::error::{Error, Result};

const NO_PID: i32 = -1;

#[repr(C)]
struct RawRegion {
    mutex: libc::pthread_mutex_t,
    init_tasks: AtomicU32,
    started_tasks: AtomicU32,
    completed_tasks: AtomicU32,
    helper_pid: AtomicI32,
    ns_pid: AtomicI32,
}

/// A step-local handle onto the shared region. Cheap to copy (it's just a
/// pointer and the local task count needed to judge terminator status);
/// every task process holds its own `SharedRegion` value pointing at the
/// same physical pages.
#[derive(Clone, Copy)]
pub struct SharedRegion {
    ptr: NonNull<RawRegion>,
    pub local_task_count: u32,
}

// SAFETY: every field access goes through the atomics or the robust mutex;
// the region is designed to be touched from multiple processes, which is a
// strictly stronger requirement than `Send`/`Sync` across threads.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Maps a fresh, zeroed region and initializes its mutex as
    /// process-shared, robust, and error-checking. Must be called exactly
    /// once per step, before any task process is spawned.
    pub fn create(local_task_count: u32) -> Result<Self> {
        let len = size_of::<RawRegion>();
        let addr = unsafe {
            mmap(
                None,
                std::num::NonZeroUsize::new(len).expect("RawRegion is never zero-sized"),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED | MapFlags::MAP_ANONYMOUS,
                -1,
                0,
            )?
        };
        let ptr = NonNull::new(addr as *mut RawRegion).expect("mmap returned null unexpectedly");

        unsafe {
            let region = ptr.as_ptr();
            (*region).init_tasks = AtomicU32::new(0);
            (*region).started_tasks = AtomicU32::new(0);
            (*region).completed_tasks = AtomicU32::new(0);
            (*region).helper_pid = AtomicI32::new(NO_PID);
            (*region).ns_pid = AtomicI32::new(NO_PID);

            let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
            let rc = libc::pthread_mutexattr_init(&mut attr);
            if rc != 0 {
                return Err(Error::Mutex(rc));
            }
            libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
            libc::pthread_mutexattr_setrobust(&mut attr, libc::PTHREAD_MUTEX_ROBUST);
            libc::pthread_mutexattr_settype(&mut attr, libc::PTHREAD_MUTEX_ERRORCHECK);

            let rc = libc::pthread_mutex_init(&mut (*region).mutex, &attr);
            libc::pthread_mutexattr_destroy(&mut attr);
            if rc != 0 {
                return Err(Error::Mutex(rc));
            }
        }

        Ok(SharedRegion {
            ptr,
            local_task_count,
        })
    }

    fn raw(&self) -> &RawRegion {
        unsafe { self.ptr.as_ref() }
    }

    fn mutex_ptr(&self) -> *mut libc::pthread_mutex_t {
        unsafe { &mut (*self.ptr.as_ptr()).mutex as *mut _ }
    }

    /// Locks the mutex, runs `f` while held, and unlocks. If the previous
    /// owner died mid-critical-section, the region's pids are zeroed, the
    /// mutex is marked consistent so future lockers aren't stuck with
    /// `ENOTRECOVERABLE`, and this call fails without running `f`.
    pub fn with_lock<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let rc = unsafe { libc::pthread_mutex_lock(self.mutex_ptr()) };
        match rc {
            0 => {
                let result = f(self);
                unsafe {
                    libc::pthread_mutex_unlock(self.mutex_ptr());
                }
                result
            }
            libc::EOWNERDEAD => {
                self.raw().helper_pid.store(NO_PID, Ordering::SeqCst);
                self.raw().ns_pid.store(NO_PID, Ordering::SeqCst);
                unsafe {
                    libc::pthread_mutex_consistent(self.mutex_ptr());
                    libc::pthread_mutex_unlock(self.mutex_ptr());
                }
                Err(Error::OwnerDead)
            }
            other => Err(Error::Mutex(other)),
        }
    }

    /// Increments `init_tasks` under the mutex and reports whether this
    /// call was the one that raised it to 1 — that task owns create+start.
    pub fn observe_init(&self) -> Result<bool> {
        self.with_lock(|region| Ok(region.bump_init_tasks() == 0))
    }

    /// Increments `init_tasks` without locking. Only safe to call from
    /// inside a [`Self::with_lock`] closure — the orchestrator needs the
    /// increment and the create/start sequence it gates to happen under
    /// the same lock acquisition, so it can't go through [`Self::observe_init`]
    /// (which locks and releases on its own).
    pub fn bump_init_tasks(&self) -> u32 {
        self.raw().init_tasks.fetch_add(1, Ordering::SeqCst)
    }

    pub fn publish_pids(&self, helper_pid: i32, ns_pid: i32) -> Result<()> {
        self.with_lock(|region| {
            region.set_pids(helper_pid, ns_pid);
            Ok(())
        })
    }

    /// Sets the pids without locking; see [`Self::bump_init_tasks`] for why
    /// this exists alongside the locking [`Self::publish_pids`].
    pub fn set_pids(&self, helper_pid: i32, ns_pid: i32) {
        self.raw().helper_pid.store(helper_pid, Ordering::SeqCst);
        self.raw().ns_pid.store(ns_pid, Ordering::SeqCst);
    }

    pub fn helper_pid(&self) -> i32 {
        self.raw().helper_pid.load(Ordering::SeqCst)
    }

    pub fn ns_pid(&self) -> i32 {
        self.raw().ns_pid.load(Ordering::SeqCst)
    }

    /// Bumps `started_tasks`; the caller that observes the old value equal
    /// to `local_task_count - 1` is the terminator responsible for sending
    /// `SIGCONT` to the helper.
    pub fn observe_started(&self) -> bool {
        let prev = self.raw().started_tasks.fetch_add(1, Ordering::SeqCst);
        prev + 1 == self.local_task_count
    }

    /// Bumps `completed_tasks`; the caller that observes the old value
    /// equal to `local_task_count - 1` is the terminator responsible for
    /// export and filesystem cleanup.
    pub fn observe_completed(&self) -> bool {
        let prev = self.raw().completed_tasks.fetch_add(1, Ordering::SeqCst);
        prev + 1 == self.local_task_count
    }

    pub fn started_tasks(&self) -> u32 {
        self.raw().started_tasks.load(Ordering::SeqCst)
    }

    /// Unmaps the region. Must be called exactly once, after every task of
    /// the step has exited.
    pub fn destroy(self) -> Result<()> {
        unsafe {
            munmap(self.ptr.as_ptr() as *mut _, size_of::<RawRegion>())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_task_is_its_own_terminator() {
        let region = SharedRegion::create(1).unwrap();
        assert!(region.observe_init().unwrap());
        assert!(region.observe_started());
        assert!(region.observe_completed());
        region.destroy().unwrap();
    }

    #[test]
    fn only_first_of_n_observes_init() {
        let region = SharedRegion::create(3).unwrap();
        let first = region.observe_init().unwrap();
        let second = region.observe_init().unwrap();
        let third = region.observe_init().unwrap();
        assert!(first);
        assert!(!second);
        assert!(!third);
        region.destroy().unwrap();
    }

    #[test]
    fn only_last_of_n_is_started_terminator() {
        let region = SharedRegion::create(2).unwrap();
        assert!(!region.observe_started());
        assert!(region.observe_started());
        region.destroy().unwrap();
    }

    #[test]
    fn pid_publication_round_trips() {
        let region = SharedRegion::create(1).unwrap();
        region.publish_pids(4242, 4242).unwrap();
        assert_eq!(region.helper_pid(), 4242);
        assert_eq!(region.ns_pid(), 4242);
        region.destroy().unwrap();
    }
}
