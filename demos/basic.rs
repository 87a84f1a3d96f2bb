//! Walks the four allocator operations on a private mapped region.
//! Run with `RUST_LOG=debug` to watch the engine's grow/reuse decisions.

use brkalloc::{BrkAlloc, MappedBreak};

fn log_alloc(addr: *mut u8, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() {
    env_logger::init();

    let region = MappedBreak::with_capacity(64 * 1024).expect("mmap refused a 64 KiB region");
    let allocator = BrkAlloc::with_break(region);

    unsafe {
        let first = allocator.allocate(8);
        log_alloc(first, 8);

        let zeroed = allocator.zero_allocate(8, 4);
        log_alloc(zeroed, 32);

        let grown = allocator.resize(first, 64);
        log_alloc(grown, 64);

        allocator.free(grown);
        allocator.free(zeroed);

        // The freed space is recycled: this lands where `first` was.
        let recycled = allocator.allocate(16);
        println!("Recycled address: {recycled:?}");
        allocator.free(recycled);
    }
}
