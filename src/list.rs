use std::{fmt, ptr};

use crate::block::Block;

/// Singly linked directory of every block ever carved from the heap, both
/// free and in-use. Blocks are linked in allocation order: new headers are
/// appended at the tail when the heap grows, and a reused block keeps the
/// position it was given when it was created, even if that no longer matches
/// heap-address order.
///
/// ```text
///  head                                          tail
/// +-------+      +-------+      +-------+      +-------+
/// | Block | ---> | Block | ---> | Block | ---> | Block | ---> null
/// +-------+      +-------+      +-------+      +-------+
/// ```
///
/// There are no back links, so removing the tail walks the list from the
/// head to find the predecessor. That only ever happens on the shrink path
/// of `free`, never while allocating.
pub(crate) struct BlockList {
    head: *mut Block,
    tail: *mut Block,
}

impl BlockList {
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
        }
    }

    #[inline]
    pub fn first(&self) -> *mut Block {
        self.head
    }

    #[inline]
    pub fn last(&self) -> *mut Block {
        self.tail
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    /// First-fit search: returns the oldest free block whose payload can hold
    /// `size` bytes, or null when no linked block qualifies. The block is
    /// returned whole; oversized blocks are never split.
    pub unsafe fn find_free(&self, size: usize) -> *mut Block {
        let mut current = self.head;

        unsafe {
            while !current.is_null() {
                if (*current).is_free && (*current).size >= size {
                    return current;
                }
                current = (*current).next;
            }
        }

        ptr::null_mut()
    }

    /// Links `block` after the current tail. The first block appended becomes
    /// both head and tail.
    ///
    /// **SAFETY**: `block` must point at a live header that is not already
    /// linked into this list.
    pub unsafe fn append(&mut self, block: *mut Block) {
        unsafe {
            (*block).next = ptr::null_mut();

            if self.head.is_null() {
                self.head = block;
            } else {
                (*self.tail).next = block;
            }
        }

        self.tail = block;
    }

    /// Unlinks `block`, which must be the current tail. Walks from the head
    /// to find the predecessor, relinks its `next` to null and makes it the
    /// new tail; when `block` is also the head the directory becomes empty.
    pub unsafe fn detach_tail(&mut self, block: *mut Block) {
        debug_assert!(block == self.tail);

        if self.head == block {
            self.head = ptr::null_mut();
            self.tail = ptr::null_mut();
            return;
        }

        let mut current = self.head;

        unsafe {
            while !current.is_null() {
                if (*current).next == block {
                    (*current).next = ptr::null_mut();
                    self.tail = current;
                    return;
                }
                current = (*current).next;
            }
        }
    }
}

/// Walks the directory printing every header, the way the C original's
/// `print_mem_list` did. Handy behind `log` when chasing reuse decisions.
impl fmt::Debug for BlockList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries = f.debug_list();
        let mut current = self.head;

        while !current.is_null() {
            unsafe {
                entries.entry(&format_args!(
                    "{:p}: size={}, is_free={}",
                    current,
                    (*current).size,
                    (*current).is_free
                ));
                current = (*current).next;
            }
        }

        entries.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(size: usize, is_free: bool) -> *mut Block {
        Box::into_raw(Box::new(Block {
            size,
            is_free,
            next: ptr::null_mut(),
        }))
    }

    unsafe fn release(blocks: Vec<*mut Block>) {
        for block in blocks {
            unsafe { drop(Box::from_raw(block)) };
        }
    }

    #[test]
    fn new_list_is_empty() {
        let list = BlockList::new();

        assert!(list.is_empty());
        assert!(list.first().is_null());
        assert!(list.last().is_null());
        assert!(unsafe { list.find_free(1) }.is_null());
    }

    #[test]
    fn append_links_head_and_tail() {
        let mut list = BlockList::new();
        let (a, b) = (block(16, false), block(32, false));

        unsafe {
            list.append(a);
            assert_eq!(a, list.first());
            assert_eq!(a, list.last());

            list.append(b);
            assert_eq!(a, list.first());
            assert_eq!(b, list.last());
            assert_eq!(b, (*a).next);
            assert!((*b).next.is_null());

            release(vec![a, b]);
        }
    }

    #[test]
    fn first_fit_returns_the_oldest_eligible_block() {
        let mut list = BlockList::new();
        let in_use = block(64, false);
        let small = block(8, true);
        let old = block(32, true);
        let newer = block(32, true);

        unsafe {
            list.append(in_use);
            list.append(small);
            list.append(old);
            list.append(newer);

            // Skips the in-use and too-small blocks, prefers the older of
            // the two that fit.
            assert_eq!(old, list.find_free(16));
            assert!(list.find_free(128).is_null());

            release(vec![in_use, small, old, newer]);
        }
    }

    #[test]
    fn detach_tail_of_a_single_block_empties_the_list() {
        let mut list = BlockList::new();
        let only = block(16, false);

        unsafe {
            list.append(only);
            list.detach_tail(only);

            assert!(list.is_empty());
            assert!(list.first().is_null());
            assert!(list.last().is_null());

            release(vec![only]);
        }
    }

    #[test]
    fn detach_tail_promotes_the_predecessor() {
        let mut list = BlockList::new();
        let (a, b, c) = (block(16, false), block(16, false), block(16, false));

        unsafe {
            list.append(a);
            list.append(b);
            list.append(c);

            list.detach_tail(c);

            assert_eq!(a, list.first());
            assert_eq!(b, list.last());
            assert!((*b).next.is_null());

            release(vec![a, b, c]);
        }
    }
}
