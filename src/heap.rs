use std::ptr;

use log::{debug, trace};

use crate::{
    block::{ALIGNMENT, BLOCK_HEADER_SIZE, Block},
    kernel::HeapBreak,
    list::BlockList,
    utils::checked_align,
};

/// The allocation engine: one block directory plus the break primitive its
/// blocks are carved from.
///
/// All methods assume external serialization. [`crate::BrkAlloc`] wraps this
/// in a mutex; nothing here takes a lock.
pub(crate) struct Heap<B: HeapBreak> {
    pub(crate) blocks: BlockList,
    pub(crate) brk: B,
}

// The directory pointers only reference memory below the break owned by
// `brk`, and the mutex in `BrkAlloc` serializes every access.
unsafe impl<B: HeapBreak + Send> Send for Heap<B> {}

impl<B: HeapBreak> Heap<B> {
    pub(crate) const fn new(brk: B) -> Self {
        Self {
            blocks: BlockList::new(),
            brk,
        }
    }

    /// Returns a payload pointer of at least `size` bytes, reusing the first
    /// eligible free block or extending the heap when none fits. Null when
    /// the heap cannot grow or the padded size overflows.
    ///
    /// A reused block keeps its recorded size: a small request may consume a
    /// much larger historical block whole.
    pub(crate) unsafe fn alloc(&mut self, size: usize) -> *mut u8 {
        debug_assert!(size > 0);

        let reused = unsafe { self.blocks.find_free(size) };
        if !reused.is_null() {
            unsafe {
                (*reused).is_free = false;
                trace!(
                    "reusing the {} byte block at {:p} for a {} byte request",
                    (*reused).size,
                    reused,
                    size
                );
                return Block::payload(reused);
            }
        }

        // Pad the payload so the break stays on an aligned boundary. The
        // padded size is what the header records, keeping the block's end
        // address equal to the next header or the break.
        let Some(padded) = checked_align(size, ALIGNMENT) else {
            return ptr::null_mut();
        };
        let Some(total) = padded.checked_add(BLOCK_HEADER_SIZE) else {
            return ptr::null_mut();
        };

        let grown = unsafe { self.brk.grow(total) };
        let Some(previous) = grown else {
            debug!("failed to extend the heap by {total} bytes");
            return ptr::null_mut();
        };

        let block = previous.as_ptr().cast::<Block>();
        unsafe {
            block.write(Block {
                size: padded,
                is_free: false,
                next: ptr::null_mut(),
            });
            self.blocks.append(block);

            debug!("extended the heap by {total} bytes for the block at {block:p}");

            Block::payload(block)
        }
    }

    /// Releases the block behind `ptr`. A block that ends exactly at the
    /// break is unlinked and its bytes handed back to the OS; any other
    /// block is only marked free and stays in the directory for reuse, with
    /// no merging of physically adjacent free neighbors.
    ///
    /// **SAFETY**: `ptr` must be non-null, obtained from [`Heap::alloc`] on
    /// this heap and not freed since.
    pub(crate) unsafe fn free(&mut self, ptr: *mut u8) {
        let block = unsafe { Block::from_payload(ptr) };

        if unsafe { Block::end(block) == self.brk.current() } {
            let delta = BLOCK_HEADER_SIZE + unsafe { (*block).size };

            unsafe {
                self.blocks.detach_tail(block);
                self.brk.shrink(delta);
            }

            debug!("returned the {delta} byte block at the break to the OS");
            return;
        }

        unsafe {
            (*block).is_free = true;
            trace!("marked the {} byte block at {:p} free", (*block).size, block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::MappedBreak;
    use crate::utils::align;

    fn heap() -> Heap<MappedBreak> {
        Heap::new(MappedBreak::with_capacity(1 << 20).unwrap())
    }

    #[test]
    fn growth_carves_a_header_plus_padded_payload() {
        let mut heap = heap();

        unsafe {
            let ptr = heap.alloc(20);

            assert!(!ptr.is_null());
            assert_eq!(BLOCK_HEADER_SIZE + align(20, ALIGNMENT), heap.brk.used());
            assert_eq!(0, ptr as usize % ALIGNMENT);

            let block = Block::from_payload(ptr);
            assert_eq!(align(20, ALIGNMENT), (*block).size);
            assert_eq!(block, heap.blocks.first());
            assert_eq!(block, heap.blocks.last());
        }
    }

    #[test]
    fn freeing_the_block_at_the_break_shrinks_the_heap() {
        let mut heap = heap();

        unsafe {
            let ptr = heap.alloc(64);
            heap.free(ptr);

            assert_eq!(0, heap.brk.used());
            assert!(heap.blocks.is_empty());
        }
    }

    #[test]
    fn freeing_an_interior_block_keeps_it_in_the_directory() {
        let mut heap = heap();

        unsafe {
            let first = heap.alloc(64);
            let _barrier = heap.alloc(16);
            let used_before = heap.brk.used();

            heap.free(first);

            // Nothing went back to the OS, the block is just reusable now.
            assert_eq!(used_before, heap.brk.used());
            assert_eq!(first, heap.alloc(64));
        }
    }

    #[test]
    fn alloc_rejects_sizes_whose_padding_overflows() {
        let mut heap = heap();

        unsafe {
            assert!(heap.alloc(usize::MAX).is_null());
            assert!(heap.alloc(usize::MAX - BLOCK_HEADER_SIZE).is_null());
            assert_eq!(0, heap.brk.used());
        }
    }
}
