//! This example is designed to test the allocator as the process-wide
//! `#[global_allocator]`: every Box, Vec and String below lives on the
//! heap this crate manages over the program break.

use std::thread;

use brkalloc::BrkAlloc;

#[global_allocator]
static ALLOCATOR: BrkAlloc = BrkAlloc::new();

fn main() {
    // Box example
    let val_box = Box::new(22);
    println!("Box Value: {}, At: {:p}", val_box, val_box);

    // Vec example: growth goes through realloc.
    let mut v = Vec::new();
    for i in 0..5 {
        v.push(i * 10);
        println!("Added {}; Capacity: {}; At: {:p}", v[i], v.capacity(), v.as_ptr());
    }

    // String example
    let msg = String::from("Heap Testing");
    println!("String '{}' - At: {:p}", msg, msg.as_ptr());

    // Reuse example: freeing a block that is not at the break leaves it in
    // the directory, so an equal request gets the same address back.
    let a = Box::new([0u8; 64]);
    let _b = Box::new([0u8; 64]);
    let ptr_a = a.as_ptr();

    drop(a);

    let c = Box::new([0u8; 64]);
    let ptr_c = c.as_ptr();

    if ptr_a == ptr_c {
        println!("Correctly reused at {ptr_c:p}");
    } else {
        println!("Not reused. A was at {ptr_a:p} and C is at {ptr_c:p}");
    }

    // Thread example: the directory is shared, the guard serializes it.
    let t1 = thread::spawn(|| {
        let _ = Box::new(222);
    });

    let t2 = thread::spawn(|| {
        let _ = Box::new(222);
    });

    t1.join().unwrap();
    t2.join().unwrap();

    println!("Done");
}
