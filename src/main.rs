#![no_std]
#![no_main]

extern crate alloc;
extern crate corekernel;

use corekernel::{memory, println, process};

#[no_mangle]
pub extern "C" fn kernel_main() -> ! {
    println!("corekernel v0.1.0");

    memory::heap::init();
    println!("kernel heap initialized");

    memory::create_memory(0x0020_0000, 1024 * 1024);
    println!("page allocator initialized");

    process::init();
    println!("process table and scheduler initialized");

    let idle = process::create_process("idle", idle_entry as usize, 0, 0, 0, 0, false)
        .expect("idle process must be creatable at boot");
    debug_assert_eq!(idle, process::IDLE_PID);
    println!("idle process created as pid {}", idle);

    println!("dispatching first process");
    process::start_first_process();
}

extern "C" fn idle_entry(_argc: usize, _argv: usize) -> ! {
    loop {
        unsafe { core::arch::asm!("hlt") };
    }
}