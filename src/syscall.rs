//! Thin adapter translating the numbered selectors of spec §6 into core
//! API calls. A single entry point receives the trap frame; the selector
//! sits in `rax`, arguments in `rdi, rsi, rdx` (SysV-like, truncated to
//! the three the core's operations actually need).

use crate::arch::TrapFrame;
use crate::memory;
use crate::process::{self, ProcessSnapshot};
use crate::println;
use crate::serial;

pub const SYS_READ: u64 = 3;
pub const SYS_WRITE: u64 = 4;
pub const SYS_EXEC: u64 = 0x8000_00A0;
pub const SYS_EXIT: u64 = 0x8000_00A1;
pub const SYS_GET_PROCESSES: u64 = 0x8000_00F1;
pub const SYS_KILL_PROCESS: u64 = 0x8000_00F2;
pub const SYS_TOGGLE_BLOCK: u64 = 0x8000_00F3;
pub const SYS_GET_MEMORY_STATE: u64 = 0x8000_00F4;
pub const SYS_SET_PRIORITY: u64 = 0x8000_00F5;
pub const SYS_CREATE_PROCESS: u64 = 0x8000_00F6;
pub const SYS_WAIT_PROCESS: u64 = 0x8000_00F7;

/// `read`/`write` have no file-descriptor layer behind them (file systems
/// are a stated non-goal); unsupported requests report this instead of
/// silently succeeding.
const ENOSYS: u64 = u64::MAX;

pub fn init() {
    // The IDT/trap-gate wiring that routes a syscall instruction to
    // `dispatch` is out of scope (spec §1); this selector switch is all
    // the core owns.
}

/// Decodes `frame.rax` as a selector and `rdi, rsi, rdx` as arguments,
/// writing the result back into `frame.rax`.
pub fn dispatch(frame: &mut TrapFrame) {
    let selector = frame.rax;
    let a0 = frame.rdi;
    let a1 = frame.rsi;
    let a2 = frame.rdx;

    let result = match selector {
        SYS_READ => sys_read(a0, a1 as *mut u8, a2 as usize),
        SYS_WRITE => sys_write(a0, a1 as *const u8, a2 as usize),
        SYS_EXEC => sys_exec(a0),
        SYS_EXIT => sys_exit(a0 as i32),
        SYS_GET_PROCESSES => sys_get_processes(a0 as *mut ProcessSnapshot, a1 as usize),
        SYS_KILL_PROCESS => process::kill_process(a0 as u32) as u64,
        SYS_TOGGLE_BLOCK => process::toggle_process_block(a0 as u32) as u64,
        SYS_GET_MEMORY_STATE => sys_get_memory_state(a0 as *mut u8, a1 as usize),
        SYS_SET_PRIORITY => process::set_process_priority(a0 as u32, a1 as u8) as u64,
        SYS_CREATE_PROCESS => sys_create_process(&*frame),
        SYS_WAIT_PROCESS => sys_wait_process(a0 as u32, frame as *mut TrapFrame),
        _ => {
            println!("unknown syscall selector: {:#x}", selector);
            0
        }
    };
    frame.rax = result;
}

fn sys_read(fd: u64, buf: *mut u8, count: usize) -> u64 {
    let _ = (fd, buf, count);
    ENOSYS
}

/// Selector 4: the only backing store for `write` is the kernel's own
/// serial log, standing in for the out-of-scope file descriptor layer.
fn sys_write(fd: u64, buf: *const u8, count: usize) -> u64 {
    if fd != 1 && fd != 2 {
        return ENOSYS;
    }
    if buf.is_null() {
        return 0;
    }
    let bytes = unsafe { core::slice::from_raw_parts(buf, count) };
    if let Ok(s) = core::str::from_utf8(bytes) {
        serial::_print(format_args!("{}", s));
        count as u64
    } else {
        ENOSYS
    }
}

fn sys_exec(entry: u64) -> u64 {
    let _ = entry;
    ENOSYS
}

fn sys_exit(_status: i32) -> ! {
    process::exit_current_process();
    let next = process::schedule(core::ptr::null_mut());
    unsafe { crate::arch::context_switch_to(next) }
}

fn sys_get_processes(buffer: *mut ProcessSnapshot, capacity: usize) -> u64 {
    if buffer.is_null() || capacity == 0 {
        return 0;
    }
    let out = unsafe { core::slice::from_raw_parts_mut(buffer, capacity) };
    process::get_process_snapshot(out) as u64
}

fn sys_get_memory_state(buffer: *mut u8, capacity: usize) -> u64 {
    if buffer.is_null() || capacity < memory::STATUS_MAX_LEN {
        return 0;
    }
    let mut status = [0u8; memory::STATUS_MAX_LEN];
    let len = memory::consult_memory(&mut status);
    let out = unsafe { core::slice::from_raw_parts_mut(buffer, len) };
    out.copy_from_slice(&status[..len]);
    len as u64
}

fn sys_create_process(frame: &TrapFrame) -> u64 {
    // Beyond the first three selector arguments this call needs more
    // fields than fit in rdi/rsi/rdx; the full argument list rides in
    // the callee-saved registers the trampoline already preserved.
    let name_ptr = frame.rdi as *const u8;
    let entry = frame.rsi as usize;
    let argv = frame.rdx as usize;
    let argc = frame.r10 as usize;
    let stack_size = frame.r8 as usize;
    let priority = frame.r9 as u8;
    let foreground = frame.r11 != 0;

    let name = read_cstr(name_ptr);
    match process::create_process(name, entry, argv, argc, stack_size, priority, foreground) {
        Some(pid) => pid as u64,
        None => 0,
    }
}

/// On a successful wait the caller is no longer runnable, so this follows
/// `sys_exit`'s pattern: pick the next process and switch into it
/// directly instead of returning through `dispatch`. `process::schedule`
/// is called with a null saved-context because `wait_process` already
/// stashed the caller's context before clearing `current`.
fn sys_wait_process(pid: u32, ctx: *mut TrapFrame) -> u64 {
    match process::wait_process(pid, ctx as usize) {
        Some(()) => {
            let next = process::schedule(core::ptr::null_mut());
            unsafe { crate::arch::context_switch_to(next) }
        }
        None => ENOSYS,
    }
}

fn read_cstr(ptr: *const u8) -> &'static str {
    if ptr.is_null() {
        return "";
    }
    unsafe {
        let mut len = 0;
        while *ptr.add(len) != 0 && len < 63 {
            len += 1;
        }
        core::str::from_utf8(core::slice::from_raw_parts(ptr, len)).unwrap_or("")
    }
}
