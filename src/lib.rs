//! # brkalloc - a first-fit heap allocator over a growable break
//!
//! This crate manages a single contiguous heap region the way a minimal
//! C `malloc` does: every block carved from the region carries a header
//! with its size, a free flag and a link to the next block, therefore
//!
//! ```text
//! +-------------------------------+
//! | Header   | Actual memory block|
//! +-------------------------------+
//!            ^
//!            the returned pointer is at the start of the memory block
//! ```
//!
//! Blocks are linked in allocation order into one directory shared by free
//! and in-use blocks. An allocation first scans that directory for the
//! oldest free block big enough (first-fit); only on a miss does the heap
//! grow, by asking a [`HeapBreak`] to move the region's upper boundary up.
//! Freeing the block that ends exactly at the boundary hands its bytes back
//! to the OS; freeing any other block just flags it for reuse.
//!
//! ## Crate structure
//!
//! ```text
//! brkalloc
//! ├── block    - block header layout and payload <-> header mapping
//! ├── list     - append-ordered directory of every block
//! ├── heap     - the serialized allocation engine
//! ├── kernel   - platform layer: ProcessBreak (sbrk), MappedBreak (mmap)
//! └── utils    - alignment helpers
//! ```
//!
//! ## Quick start
//!
//! ```
//! use brkalloc::{BrkAlloc, MappedBreak};
//!
//! let region = MappedBreak::with_capacity(64 * 1024).unwrap();
//! let allocator = BrkAlloc::with_break(region);
//!
//! unsafe {
//!     let ptr = allocator.allocate(64);
//!     assert!(!ptr.is_null());
//!
//!     ptr.write_bytes(0xAB, 64);
//!     allocator.free(ptr);
//! }
//! ```
//!
//! Or as a drop-in replacement for the platform allocator:
//!
//! ```rust,ignore
//! use brkalloc::BrkAlloc;
//!
//! #[global_allocator]
//! static ALLOCATOR: BrkAlloc = BrkAlloc::new();
//! ```
//!
//! ## Limitations
//!
//! - **First-fit, no splitting**: an oversized free block is consumed whole
//!   by a smaller request.
//! - **No coalescing**: free neighbors are never merged; the only memory
//!   ever returned to the OS is the block ending at the current break.
//! - **One lock**: every operation serializes on a single mutex, including
//!   the grow/shrink requests made while it is held.
//! - **`resize(ptr, 0)` leaks**: it delegates to `allocate(0)`, which fails,
//!   so the original block is neither freed nor returned. Kept for parity
//!   with the C contract this crate reproduces.
//! - The `log` statements in the engine are meant for use as a library
//!   allocator; don't install a logger when this is the global allocator,
//!   logging allocates.

mod block;
mod heap;
pub mod kernel;
mod list;
mod utils;

pub use kernel::{HeapBreak, MappedBreak, ProcessBreak};

use std::alloc::{GlobalAlloc, Layout};
use std::ptr;
use std::sync::Mutex;

use block::{ALIGNMENT, Block};
use heap::Heap;

/// A thread-safe allocator context over a [`HeapBreak`].
///
/// The whole allocator state is one heap engine behind one mutex: every
/// operation acquires it for its entire directory-mutating section, so the
/// externally observable behavior is that of a strictly sequential program.
/// Independent contexts can coexist; give each its own break (see
/// [`MappedBreak`]).
///
/// [`BrkAlloc::new`] builds the context over the process break, which is
/// what a `#[global_allocator]` static wants.
pub struct BrkAlloc<B: HeapBreak = ProcessBreak> {
    heap: Mutex<Heap<B>>,
}

impl BrkAlloc<ProcessBreak> {
    /// Allocator over the process's program break.
    pub const fn new() -> Self {
        Self::with_break(ProcessBreak::new())
    }
}

impl<B: HeapBreak> BrkAlloc<B> {
    /// Allocator over a caller-provided heap region.
    pub const fn with_break(brk: B) -> Self {
        Self {
            heap: Mutex::new(Heap::new(brk)),
        }
    }

    /// Allocates `size` bytes and returns a pointer to them, or null when
    /// `size` is zero or the heap cannot grow. The returned address is
    /// aligned to 16 bytes regardless of `size`.
    ///
    /// # Safety
    ///
    /// The returned memory is uninitialized; the caller must write before
    /// reading and must release it only through [`BrkAlloc::free`] or
    /// [`BrkAlloc::resize`] on this same context.
    pub unsafe fn allocate(&self, size: usize) -> *mut u8 {
        if size == 0 {
            return ptr::null_mut();
        }

        let Ok(mut heap) = self.heap.lock() else {
            return ptr::null_mut();
        };

        unsafe { heap.alloc(size) }
    }

    /// Releases a pointer previously returned by this context. A null
    /// pointer is silently accepted.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer obtained from this context, and
    /// must not be used again afterwards.
    pub unsafe fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        let Ok(mut heap) = self.heap.lock() else {
            return;
        };

        unsafe { heap.free(ptr) }
    }

    /// Allocates a zero-filled region for `count` elements of
    /// `element_size` bytes each. Fails with null when either argument is
    /// zero, when `count * element_size` overflows, or when the underlying
    /// allocation fails; nothing is allocated in the failure cases.
    ///
    /// # Safety
    ///
    /// Same contract as [`BrkAlloc::allocate`], except the memory is
    /// initialized to zero.
    pub unsafe fn zero_allocate(&self, count: usize, element_size: usize) -> *mut u8 {
        if count == 0 || element_size == 0 {
            return ptr::null_mut();
        }

        let Some(total) = count.checked_mul(element_size) else {
            return ptr::null_mut();
        };

        // The lock is taken (and released) inside `allocate`; the fill runs
        // on memory no other caller can reference yet.
        let ptr = unsafe { self.allocate(total) };
        if !ptr.is_null() {
            unsafe { ptr.write_bytes(0, total) };
        }

        ptr
    }

    /// Grows or keeps the region behind `ptr` so it can hold `new_size`
    /// bytes.
    ///
    /// A null `ptr` or a zero `new_size` delegates to
    /// [`BrkAlloc::allocate`] wholesale, so `resize(ptr, 0)` returns null
    /// and leaves `ptr` allocated (see the crate-level known leak note).
    /// When the block's recorded size already accommodates `new_size` the
    /// same pointer comes back untouched. Otherwise the content moves to a
    /// fresh block and the old one is freed; if that fresh allocation fails,
    /// null is returned and the original block stays valid.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer obtained from this context. On
    /// success the returned pointer replaces `ptr`, which must not be used
    /// again (unless both are the same address).
    pub unsafe fn resize(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        if ptr.is_null() || new_size == 0 {
            return unsafe { self.allocate(new_size) };
        }

        // The caller owns this block, nobody else mutates its header, so
        // the size can be read without the guard.
        let old_size = unsafe { (*Block::from_payload(ptr)).size };

        if old_size >= new_size {
            return ptr;
        }

        let new_ptr = unsafe { self.allocate(new_size) };
        if new_ptr.is_null() {
            // The original block is left untouched.
            return ptr::null_mut();
        }

        unsafe {
            ptr::copy_nonoverlapping(ptr, new_ptr, old_size);
            self.free(ptr);
        }

        new_ptr
    }
}

/// Drop-in replacement for the platform allocator. Layouts demanding more
/// than the fixed 16 byte alignment are refused with null.
unsafe impl<B: HeapBreak> GlobalAlloc for BrkAlloc<B> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        unsafe { self.allocate(layout.size()) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        unsafe { self.free(ptr) }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        unsafe { self.zero_allocate(layout.size(), 1) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        unsafe { self.resize(ptr, new_size) }
    }
}
