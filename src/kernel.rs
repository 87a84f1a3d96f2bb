//! Platform layer of the allocator. Here is where we manage the low level
//! memory requests as well as platform-dependant stuff: the engine never
//! talks to a syscall directly, it only asks a [`HeapBreak`] for grow and
//! shrink deltas.

use std::ptr::NonNull;

use log::debug;

use crate::utils::align;

/// A growable, contiguous heap region. The allocator carves its blocks from
/// the space between the region's start and its upper boundary (the break),
/// and moves that boundary through this trait.
///
/// `grow` returns the *previous* break on success, which is exactly where
/// the new block's header lands. `shrink` has no error channel: the engine
/// only ever shrinks by deltas it previously grew.
pub trait HeapBreak {
    /// Moves the break up by `delta` bytes and returns the previous break,
    /// or `None` when the region cannot grow.
    ///
    /// **SAFETY**: caller must not ask for memory it then reads before
    /// writing; the returned bytes are uninitialized.
    unsafe fn grow(&mut self, delta: usize) -> Option<NonNull<u8>>;

    /// Moves the break down by `delta` bytes, handing the space back.
    ///
    /// **SAFETY**: `delta` must not exceed the sum of previously grown
    /// deltas, and nothing may touch the released bytes afterwards.
    unsafe fn shrink(&mut self, delta: usize);

    /// Current break address: the first byte past the usable heap.
    unsafe fn current(&mut self) -> *mut u8;
}

#[cfg(unix)]
use self::unix as platform;
#[cfg(windows)]
use self::windows as platform;

#[cfg(unix)]
pub use self::unix::ProcessBreak;
#[cfg(windows)]
pub use self::windows::ProcessBreak;

/// A private break inside one anonymous mapping.
///
/// Unlike [`ProcessBreak`] this never touches the process-wide break, so any
/// number of independent instances can coexist in one process. That is what
/// makes allocator contexts testable in isolation: the unit tests run on
/// this, and the capacity limit gives them a deterministic out-of-memory.
///
/// ```text
/// base                 top (break)          limit
///  v                    v                    v
///  +--------------------+--------------------+
///  |  blocks in use     |     unused         |
///  +--------------------+--------------------+
///  |<------------- capacity ---------------->|
/// ```
pub struct MappedBreak {
    base: NonNull<u8>,
    top: *mut u8,
    limit: *mut u8,
    capacity: usize,
}

// The raw pointers all stay inside the mapping owned by this value.
unsafe impl Send for MappedBreak {}

impl MappedBreak {
    /// Maps a region able to hold `capacity` bytes, rounded up to whole
    /// pages. Returns `None` when the mapping is refused.
    pub fn with_capacity(capacity: usize) -> Option<Self> {
        let capacity = align(capacity, platform::page_size());
        let base = unsafe { platform::request_memory(capacity)? };

        debug!("mapped a {capacity} byte heap region at {base:p}");

        Some(Self {
            base,
            top: base.as_ptr(),
            limit: unsafe { base.as_ptr().add(capacity) },
            capacity,
        })
    }

    /// Bytes currently in use between the region base and the break.
    pub fn used(&self) -> usize {
        self.top as usize - self.base.as_ptr() as usize
    }
}

impl HeapBreak for MappedBreak {
    unsafe fn grow(&mut self, delta: usize) -> Option<NonNull<u8>> {
        if delta > self.limit as usize - self.top as usize {
            return None;
        }

        let previous = self.top;
        self.top = unsafe { self.top.add(delta) };

        NonNull::new(previous)
    }

    unsafe fn shrink(&mut self, delta: usize) {
        self.top = unsafe { self.top.sub(delta) };
    }

    unsafe fn current(&mut self) -> *mut u8 {
        self.top
    }
}

impl Drop for MappedBreak {
    fn drop(&mut self) {
        unsafe { platform::return_memory(self.base.as_ptr(), self.capacity) };
    }
}

#[cfg(unix)]
mod unix {
    use std::os::raw::{c_int, c_void};
    use std::ptr::NonNull;

    use libc::{intptr_t, mmap, munmap, off_t, sbrk, size_t};

    use super::HeapBreak;

    /// The process's real program break, moved with [`libc::sbrk`].
    ///
    /// The initial break is page aligned on the platforms we target and
    /// every delta the engine requests is a multiple of the block alignment,
    /// so payload alignment holds without any padding here.
    pub struct ProcessBreak;

    impl ProcessBreak {
        pub const fn new() -> Self {
            Self
        }
    }

    impl HeapBreak for ProcessBreak {
        unsafe fn grow(&mut self, delta: usize) -> Option<NonNull<u8>> {
            // sbrk takes a signed delta.
            if delta > isize::MAX as usize {
                return None;
            }

            unsafe {
                let previous = sbrk(delta as intptr_t);

                if previous == usize::MAX as *mut c_void {
                    return None;
                }

                NonNull::new(previous.cast())
            }
        }

        unsafe fn shrink(&mut self, delta: usize) {
            unsafe { sbrk(-(delta as intptr_t)) };
        }

        unsafe fn current(&mut self) -> *mut u8 {
            unsafe { sbrk(0).cast() }
        }
    }

    pub(super) unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
        // mmap parameters.
        const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
        // Read-Write only memory.
        const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
        const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        const FD: c_int = -1;
        const OFFSET: off_t = 0;

        unsafe {
            let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

            match addr {
                libc::MAP_FAILED => None,
                addr => Some(NonNull::new_unchecked(addr).cast::<u8>()),
            }
        }
    }

    pub(super) unsafe fn return_memory(addr: *mut u8, len: usize) {
        unsafe { munmap(addr as *mut c_void, len as size_t) };
    }

    pub(super) fn page_size() -> usize {
        unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
    }
}

#[cfg(windows)]
mod windows {
    use std::mem::MaybeUninit;
    use std::os::raw::c_void;
    use std::ptr::{self, NonNull};

    use windows::Win32::System::{Memory, SystemInformation};

    use super::HeapBreak;
    use crate::utils::align;

    /// Address space reserved up front for the emulated break.
    const RESERVE_LIMIT: usize = 1 << 30;

    /// An emulated program break. Windows has no `sbrk`, so a contiguous
    /// range is reserved once on first use and pages are committed and
    /// decommitted as the break moves.
    pub struct ProcessBreak {
        base: *mut u8,
        top: *mut u8,
        committed: *mut u8,
        page_size: usize,
    }

    // The raw pointers all stay inside the reservation owned by this value.
    unsafe impl Send for ProcessBreak {}

    impl ProcessBreak {
        pub const fn new() -> Self {
            Self {
                base: ptr::null_mut(),
                top: ptr::null_mut(),
                committed: ptr::null_mut(),
                page_size: 0,
            }
        }

        unsafe fn reserve(&mut self) -> bool {
            let addr = unsafe {
                Memory::VirtualAlloc(
                    None,
                    RESERVE_LIMIT,
                    Memory::MEM_RESERVE,
                    Memory::PAGE_NOACCESS,
                )
            };

            if addr.is_null() {
                return false;
            }

            self.base = addr.cast();
            self.top = self.base;
            self.committed = self.base;
            self.page_size = page_size();

            true
        }
    }

    impl HeapBreak for ProcessBreak {
        unsafe fn grow(&mut self, delta: usize) -> Option<NonNull<u8>> {
            if self.base.is_null() {
                let reserved = unsafe { self.reserve() };
                if !reserved {
                    return None;
                }
            }

            let used = self.top as usize - self.base as usize;
            if delta > RESERVE_LIMIT - used {
                return None;
            }

            let new_top = unsafe { self.top.add(delta) };

            if new_top > self.committed {
                let needed = align(
                    new_top as usize - self.committed as usize,
                    self.page_size,
                );
                let addr = unsafe {
                    Memory::VirtualAlloc(
                        Some(self.committed as *const c_void),
                        needed,
                        Memory::MEM_COMMIT,
                        Memory::PAGE_READWRITE,
                    )
                };

                if addr.is_null() {
                    return None;
                }

                self.committed = unsafe { self.committed.add(needed) };
            }

            let previous = self.top;
            self.top = new_top;

            NonNull::new(previous)
        }

        unsafe fn shrink(&mut self, delta: usize) {
            self.top = unsafe { self.top.sub(delta) };

            // Whole pages above the break go back to the OS.
            let keep = align(self.top as usize - self.base as usize, self.page_size);
            let commit_end = unsafe { self.base.add(keep) };

            if commit_end < self.committed {
                let len = self.committed as usize - commit_end as usize;
                let _ = unsafe {
                    Memory::VirtualFree(commit_end as *mut c_void, len, Memory::MEM_DECOMMIT)
                };
                self.committed = commit_end;
            }
        }

        unsafe fn current(&mut self) -> *mut u8 {
            self.top
        }
    }

    pub(super) unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
        // Read-Write only.
        let protection = Memory::PAGE_READWRITE;

        let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

        unsafe {
            let addr = Memory::VirtualAlloc(None, len, flags, protection);

            NonNull::new(addr.cast())
        }
    }

    pub(super) unsafe fn return_memory(addr: *mut u8, _len: usize) {
        let _ = unsafe { Memory::VirtualFree(addr as *mut c_void, 0, Memory::MEM_RELEASE) };
    }

    pub(super) fn page_size() -> usize {
        unsafe {
            let mut system_info = MaybeUninit::uninit();
            SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

            system_info.assume_init().dwPageSize as usize
        }
    }
}
