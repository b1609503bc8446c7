#![no_std]
#![no_main]

extern crate corekernel;

use core::panic::PanicInfo;

use corekernel::memory::{self, STATUS_MAX_LEN};
use corekernel::process::{self, ProcessState};
use corekernel::{panic as panic_runtime, println};

type TestFn = fn();

const TESTS: &[TestFn] = &[
    memory_state_string_reports_uninitialized_before_create,
    allocations_are_page_aligned_in_range_and_disjoint,
    freeing_every_allocation_restores_capacity,
    double_free_and_bad_addresses_are_silent_no_ops,
    freed_block_is_offered_back_to_the_next_matching_alloc,
    round_robin_within_one_priority_level,
    higher_priority_runs_before_a_ready_lower_one,
    blocking_the_running_process_makes_a_lower_priority_one_ready,
    kill_process_removes_a_ready_process_and_frees_its_stack,
    wait_process_blocks_the_caller_until_the_target_exits,
];

#[no_mangle]
pub extern "C" fn kernel_main() -> ! {
    panic_runtime::set_handler(kernel_test_panic_handler);

    println!("kernel test suite started: {} cases", TESTS.len());
    for test in TESTS {
        test();
    }
    println!("kernel test suite completed");
    exit_qemu(0);
}

// --- Allocator invariants (spec properties 1-4) ---

fn memory_state_string_reports_uninitialized_before_create() {
    let mut buf = [0u8; STATUS_MAX_LEN];
    let len = memory::consult_memory(&mut buf);
    let s = core::str::from_utf8(&buf[..len]).unwrap();
    assert_eq!(s, "manager=uninitialized", "uninitialized manager must report the exact sentinel string");
}

/// The buddy allocator (the default strategy) hands back `block_base + 1`:
/// one byte past the in-band order header, faithful to the original's
/// layout. That pointer is never page-aligned itself; what must be
/// page-aligned is the block underneath it. The simple allocator carries
/// no such header and returns page-aligned addresses directly.
fn assert_is_a_valid_allocation_base(addr: usize) {
    #[cfg(feature = "buddy-allocator")]
    assert_eq!((addr - 1) & 0xFFF, 0, "the block under a buddy allocation must be page-aligned");
    #[cfg(feature = "simple-allocator")]
    assert_eq!(addr & 0xFFF, 0, "a simple-allocator allocation must be page-aligned");
}

fn allocations_are_page_aligned_in_range_and_disjoint() {
    memory::create_memory(0x0020_0000, 1024 * 1024);

    let a = memory::alloc_memory(4096).expect("first allocation");
    let b = memory::alloc_memory(4096).expect("second allocation");
    assert_ne!(a, b, "two live allocations must not share a base address");
    assert_is_a_valid_allocation_base(a);
    assert_is_a_valid_allocation_base(b);

    let stats = memory::stats();
    assert!(a >= stats.base && a < stats.end, "allocation must lie in the managed range");
    assert!(b >= stats.base && b < stats.end, "allocation must lie in the managed range");

    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    assert!(lo + 4096 <= hi, "two 4K allocations must not overlap");

    memory::free_memory(a);
    memory::free_memory(b);
}

fn freeing_every_allocation_restores_capacity() {
    memory::create_memory(0x0020_0000, 1024 * 1024);
    let before = memory::stats().free_pages;

    let mut handed_out = [0usize; 8];
    for slot in handed_out.iter_mut() {
        *slot = memory::alloc_memory(4096).expect("allocation should succeed within capacity");
    }
    for &addr in handed_out.iter() {
        memory::free_memory(addr);
    }

    let after = memory::stats().free_pages;
    assert_eq!(before, after, "free_pages must return to its pre-allocation value");
    let probe = memory::alloc_memory(4096).expect("allocator must be usable again after a full free");
    memory::free_memory(probe);
}

fn double_free_and_bad_addresses_are_silent_no_ops() {
    memory::create_memory(0x0020_0000, 1024 * 1024);
    let before = memory::stats().free_pages;

    memory::free_memory(0);
    memory::free_memory(1);
    assert_eq!(memory::stats().free_pages, before, "null/unaligned frees must not change state");

    let addr = memory::alloc_memory(4096).expect("allocation should succeed");
    memory::free_memory(addr);
    let after_first_free = memory::stats().free_pages;
    memory::free_memory(addr);
    assert_eq!(
        memory::stats().free_pages,
        after_first_free,
        "freeing the same head twice must be a no-op the second time"
    );
}

fn freed_block_is_offered_back_to_the_next_matching_alloc() {
    memory::create_memory(0x0020_0000, 1024 * 1024);

    let first = memory::alloc_memory(4096).expect("first allocation");
    let second = memory::alloc_memory(4096).expect("second allocation");
    assert_ne!(first, second);

    memory::free_memory(first);
    let reused = memory::alloc_memory(4096).expect("allocation after a free should succeed");
    assert_eq!(reused, first, "a freed block should be handed back out before untouched memory");

    memory::free_memory(reused);
    memory::free_memory(second);
}

// --- Scheduler invariants (spec properties 5-8) and end-to-end scenarios ---

fn round_robin_within_one_priority_level() {
    process::init();
    let idle = process::create_process("idle", idle_entry as usize, 0, 0, 0, 0, false).unwrap();
    assert_eq!(idle, process::IDLE_PID);
    let a = process::create_process("a", idle_entry as usize, 0, 0, 0, 2, false).unwrap();
    let b = process::create_process("b", idle_entry as usize, 0, 0, 0, 2, false).unwrap();

    process::schedule(core::ptr::null_mut());
    assert_eq!(process::current_pid(), Some(a), "first dispatch should pick the first-enqueued process");
    assert_eq!(process::state_of(a), Some(ProcessState::Running));

    process::schedule(core::ptr::null_mut());
    assert_eq!(process::current_pid(), Some(b), "round-robin should advance to the next process at the same level");
    assert_eq!(process::state_of(a), Some(ProcessState::Ready));

    process::schedule(core::ptr::null_mut());
    assert_eq!(process::current_pid(), Some(a), "round-robin should cycle back to the first process");
}

fn higher_priority_runs_before_a_ready_lower_one() {
    process::init();
    process::create_process("idle", idle_entry as usize, 0, 0, 0, 0, false).unwrap();
    let low = process::create_process("low", idle_entry as usize, 0, 0, 0, 1, false).unwrap();
    let high = process::create_process("high", idle_entry as usize, 0, 0, 0, 3, false).unwrap();

    process::schedule(core::ptr::null_mut());
    assert_eq!(process::current_pid(), Some(high), "a higher-priority ready process preempts a lower one");
    assert_eq!(process::state_of(low), Some(ProcessState::Ready));
}

fn blocking_the_running_process_makes_a_lower_priority_one_ready() {
    process::init();
    process::create_process("idle", idle_entry as usize, 0, 0, 0, 0, false).unwrap();
    let low = process::create_process("low", idle_entry as usize, 0, 0, 0, 1, false).unwrap();
    let high = process::create_process("high", idle_entry as usize, 0, 0, 0, 3, false).unwrap();

    process::schedule(core::ptr::null_mut());
    assert_eq!(process::current_pid(), Some(high));

    assert_eq!(process::toggle_process_block(high), ProcessState::Blocked.code());
    assert_eq!(process::current_pid(), None, "blocking the running process clears currentPid");

    process::schedule(core::ptr::null_mut());
    assert_eq!(process::current_pid(), Some(low), "low priority becomes runnable once the high one blocks");
}

fn kill_process_removes_a_ready_process_and_frees_its_stack() {
    memory::create_memory(0x0020_0000, 1024 * 1024);
    process::init();
    process::create_process("idle", idle_entry as usize, 0, 0, 0, 0, false).unwrap();
    let victim = process::create_process("victim", idle_entry as usize, 0, 0, 4096, 2, false).unwrap();

    let free_before = memory::stats().free_pages;
    assert_eq!(process::ready_queue_len(2), 1);

    assert_eq!(process::kill_process(victim), 0);

    assert_eq!(process::ready_queue_len(2), 0, "killed process must be unlinked from its ready queue");
    assert_eq!(process::state_of(victim), None, "killed process's slot must be vacated");
    assert!(memory::stats().free_pages > free_before, "killing a process must return its stack to the allocator");
}

fn wait_process_blocks_the_caller_until_the_target_exits() {
    process::init();
    process::create_process("idle", idle_entry as usize, 0, 0, 0, 0, false).unwrap();
    let parent = process::create_process("parent", idle_entry as usize, 0, 0, 0, 2, false).unwrap();
    let child = process::create_process("child", idle_entry as usize, 0, 0, 0, 2, false).unwrap();

    process::schedule(core::ptr::null_mut());
    assert_eq!(process::current_pid(), Some(parent));

    assert!(process::wait_process(child, 0).is_some(), "waiting on a live, distinct pid should block the caller");
    assert_eq!(process::state_of(parent), Some(ProcessState::Blocked));
    assert_eq!(process::current_pid(), None);

    assert!(process::wait_process(parent, 0).is_none(), "a blocked process has no currentPid, so a wait attempt is rejected");

    process::schedule(core::ptr::null_mut());
    assert_eq!(process::current_pid(), Some(child), "the child is the only runnable non-idle process");

    assert_eq!(process::kill_process(child), 0);
    assert_eq!(
        process::state_of(parent),
        Some(ProcessState::Ready),
        "the parent must be unblocked once its waited-on child terminates"
    );

    process::schedule(core::ptr::null_mut());
    assert_eq!(process::current_pid(), Some(parent), "the unblocked parent resumes on the next dispatch");
}

extern "C" fn idle_entry(_argc: usize, _argv: usize) -> ! {
    loop {
        unsafe { core::arch::asm!("hlt") };
    }
}

fn exit_qemu(code: u32) -> ! {
    unsafe {
        core::arch::asm!(
            "out dx, eax",
            in("dx") 0xf4u16,
            in("eax") code,
            options(noreturn)
        );
    }
}

fn kernel_test_panic_handler(info: &PanicInfo) -> ! {
    println!("kernel test panic: {}", info);
    exit_qemu(1)
}
