//! Process table: a fixed pool of process control records, slot lifecycle,
//! and the glue between process-table operations and the scheduler's
//! ready queues.

use crate::arch::{self, Context};
use crate::memory;
use crate::scheduler::Scheduler;
use spin::Mutex;

pub const MAX_PROCESSES: usize = 16;
pub const MAX_PRIORITIES: usize = 4;

/// PID 1 is reserved for the idle process; its priority can never change
/// and it must always exist so `pick_next` is never null after startup.
pub const IDLE_PID: u32 = 1;

const MAX_NAME_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    New,
    Ready,
    Running,
    Blocked,
    Terminated,
}

impl ProcessState {
    /// Numeric code used in the syscall-visible snapshot wire format.
    pub fn code(self) -> i32 {
        match self {
            ProcessState::New => 0,
            ProcessState::Ready => 1,
            ProcessState::Running => 2,
            ProcessState::Blocked => 3,
            ProcessState::Terminated => 4,
        }
    }
}

#[derive(Clone, Copy)]
pub struct ProcessControlRecord {
    pub pid: u32,
    pub state: ProcessState,
    pub priority: u8,
    pub name: [u8; MAX_NAME_LEN],
    pub name_len: usize,
    pub foreground: bool,
    pub stack_base: usize,
    pub stack_size: usize,
    /// Register-save pointer: top-of-stack after an initial frame, or
    /// after a save at a suspension point. Stored as a plain address
    /// (rather than `Context`) so the record stays `Send`.
    pub ctx: usize,
    /// Ready-queue link: index of the next PCR in this priority's queue.
    pub next: Option<usize>,
    /// PID of at most one process blocked on this one's exit, or 0 (no
    /// waiter). A slot index is never pid 0, so 0-as-sentinel keeps this
    /// field a plain `u32` instead of spec.md's `-1`.
    pub waiter_pid: u32,
    pub entry: usize,
    pub argc: usize,
    pub argv: usize,
}

impl ProcessControlRecord {
    pub const fn empty() -> Self {
        ProcessControlRecord {
            pid: 0,
            state: ProcessState::Terminated,
            priority: 0,
            name: [0; MAX_NAME_LEN],
            name_len: 0,
            foreground: false,
            stack_base: 0,
            stack_size: 0,
            ctx: 0,
            next: None,
            waiter_pid: 0,
            entry: 0,
            argc: 0,
            argv: 0,
        }
    }

    fn set_name(&mut self, name: &str) {
        let bytes = name.as_bytes();
        let len = bytes.len().min(MAX_NAME_LEN);
        self.name[..len].copy_from_slice(&bytes[..len]);
        self.name_len = len;
    }

    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.name[..self.name_len]).unwrap_or("")
    }
}

pub struct ProcessSnapshot {
    pub pid: u32,
    pub state: i32,
    pub priority: u8,
    pub name: [u8; MAX_NAME_LEN],
    pub name_len: usize,
    pub foreground: bool,
    pub stack_pointer: u64,
    pub base_pointer: u64,
}

struct Kernel {
    table: [ProcessControlRecord; MAX_PROCESSES],
    sched: Scheduler,
}

impl Kernel {
    const fn new() -> Self {
        Kernel {
            table: [ProcessControlRecord::empty(); MAX_PROCESSES],
            sched: Scheduler::new(),
        }
    }
}

lazy_static::lazy_static! {
    static ref KERNEL: Mutex<Kernel> = Mutex::new(Kernel::new());
}

/// Zeroes every PCR and the scheduler's ready queues. Does not create the
/// idle process; the caller (kernel boot path) is responsible for that.
pub fn init() {
    let mut k = KERNEL.lock();
    k.table = [ProcessControlRecord::empty(); MAX_PROCESSES];
    k.sched.init();
}

fn find_free_slot(table: &[ProcessControlRecord; MAX_PROCESSES]) -> Option<usize> {
    table.iter().position(|p| p.pid == 0)
}

fn slot_of(table: &[ProcessControlRecord; MAX_PROCESSES], pid: u32) -> Option<usize> {
    if pid == 0 {
        return None;
    }
    let slot = (pid - 1) as usize;
    if slot < MAX_PROCESSES && table[slot].pid == pid {
        Some(slot)
    } else {
        None
    }
}

/// Finds the lowest-index free slot, carves a stack from the page
/// allocator, lays down an initial register frame, and enqueues the new
/// process as READY. Returns the assigned pid, or `None` on slot or
/// allocator exhaustion.
pub fn create_process(
    name: &str,
    entry: usize,
    argv: usize,
    argc: usize,
    stack_size: usize,
    priority: u8,
    foreground: bool,
) -> Option<u32> {
    if entry == 0 {
        return None;
    }
    let mut k = KERNEL.lock();
    let Kernel { table, sched } = &mut *k;

    let slot = find_free_slot(table)?;
    let size = if stack_size == 0 { memory::DEFAULT_STACK_SIZE } else { stack_size };
    let stack_base = memory::alloc_memory(size)?;

    let stack_top = stack_base + size;
    let ctx = unsafe { arch::stack_init(stack_top, entry, argc, argv) };

    let pid = (slot + 1) as u32;
    table[slot] = ProcessControlRecord {
        pid,
        state: ProcessState::Ready,
        priority: priority.min((MAX_PRIORITIES - 1) as u8),
        name: [0; MAX_NAME_LEN],
        name_len: 0,
        foreground,
        stack_base,
        stack_size: size,
        ctx: ctx as usize,
        next: None,
        waiter_pid: 0,
        entry,
        argc,
        argv,
    };
    table[slot].set_name(name);
    sched.add_process(table, slot);

    Some(pid)
}

/// Frees `slot`'s stack and zeroes its PCR, waking and re-enqueueing any
/// waiter. Does not touch `slot`'s own ready-queue linkage; callers that
/// might still have it linked (killProcess on a READY victim) must
/// `unschedule` first.
fn retire_slot(table: &mut [ProcessControlRecord; MAX_PROCESSES], sched: &mut Scheduler, slot: usize) {
    let stack_base = table[slot].stack_base;
    let waiter = table[slot].waiter_pid;

    table[slot] = ProcessControlRecord::empty();

    if stack_base != 0 {
        memory::free_memory(stack_base);
    }

    if waiter != 0 {
        if let Some(w) = slot_of(table, waiter) {
            if table[w].state == ProcessState::Blocked {
                table[w].state = ProcessState::Ready;
                sched.add_process(table, w);
            }
        }
    }
}

/// Frees the currently RUNNING process's stack, terminates its slot, and
/// unblocks its waiter if any. The caller must follow this with a
/// context switch since the stack underneath the current call frame has
/// just been released.
pub fn exit_current_process() {
    let mut k = KERNEL.lock();
    let Kernel { table, sched } = &mut *k;
    if let Some(slot) = sched.current {
        sched.current = None;
        table[slot].state = ProcessState::Terminated;
        retire_slot(table, sched, slot);
    }
}

/// Unconditional, asynchronous termination of `pid` regardless of
/// cooperation. Scrubs any stale `waiterPid == pid` elsewhere in the
/// table, since pids are reused as soon as a slot is retired.
pub fn kill_process(pid: u32) -> i32 {
    let mut k = KERNEL.lock();
    let Kernel { table, sched } = &mut *k;

    let slot = match slot_of(table, pid) {
        Some(s) => s,
        None => return -1,
    };
    if table[slot].state == ProcessState::Terminated {
        return -1;
    }

    if sched.current == Some(slot) {
        sched.current = None;
    } else if table[slot].state == ProcessState::Ready {
        sched.unschedule(table, slot);
    }

    retire_slot(table, sched, slot);

    for p in table.iter_mut() {
        if p.waiter_pid == pid {
            p.waiter_pid = 0;
        }
    }

    0
}

/// RUNNING -> BLOCKED, READY -> BLOCKED (also unqueued), BLOCKED -> READY
/// (re-enqueued). Any other state is rejected. Returns the new state code
/// or -1.
pub fn toggle_process_block(pid: u32) -> i32 {
    let mut k = KERNEL.lock();
    let Kernel { table, sched } = &mut *k;

    let slot = match slot_of(table, pid) {
        Some(s) => s,
        None => return -1,
    };

    match table[slot].state {
        ProcessState::Running => {
            table[slot].state = ProcessState::Blocked;
            if sched.current == Some(slot) {
                sched.current = None;
            }
        }
        ProcessState::Ready => {
            sched.unschedule(table, slot);
            table[slot].state = ProcessState::Blocked;
        }
        ProcessState::Blocked => {
            table[slot].state = ProcessState::Ready;
            sched.add_process(table, slot);
        }
        ProcessState::New | ProcessState::Terminated => return -1,
    }

    table[slot].state.code()
}

/// Rejects the idle pid, out-of-range priorities, and terminated
/// processes. A READY process is unqueued, updated, and re-enqueued on
/// its new level so it lands at the tail of the right queue.
pub fn set_process_priority(pid: u32, priority: u8) -> i32 {
    if pid == IDLE_PID || priority as usize >= MAX_PRIORITIES {
        return -1;
    }

    let mut k = KERNEL.lock();
    let Kernel { table, sched } = &mut *k;

    let slot = match slot_of(table, pid) {
        Some(s) => s,
        None => return -1,
    };
    if table[slot].state == ProcessState::Terminated {
        return -1;
    }

    if table[slot].state == ProcessState::Ready {
        sched.unschedule(table, slot);
        table[slot].priority = priority;
        sched.add_process(table, slot);
    } else {
        table[slot].priority = priority;
    }

    0
}

/// Cannot wait on self or an unknown/terminated pid. Stores the caller's
/// pid in the target's `waiterPid` (single-waiter discipline), saves
/// `ctx` as the caller's register-save pointer, and blocks the caller;
/// wakeup is driven by `exit_current_process`/`kill_process`. Returns
/// `Some(())` once the caller has been parked — the caller must then
/// `schedule`/`context_switch_to` away, since it is no longer the current
/// process — or `None` if the wait was rejected and the caller should
/// keep running.
pub fn wait_process(pid: u32, ctx: usize) -> Option<()> {
    let mut k = KERNEL.lock();
    let Kernel { table, sched } = &mut *k;

    let caller = sched.current?;
    let caller_pid = table[caller].pid;
    if pid == caller_pid {
        return None;
    }
    let target = slot_of(table, pid)?;
    if table[target].state == ProcessState::Terminated {
        return None;
    }

    table[target].waiter_pid = caller_pid;
    table[caller].state = ProcessState::Blocked;
    table[caller].ctx = ctx;
    sched.current = None;

    Some(())
}

/// Writes up to `out.len()` snapshots of occupied slots, returning the
/// count written.
pub fn get_process_snapshot(out: &mut [ProcessSnapshot]) -> usize {
    let k = KERNEL.lock();
    let mut n = 0;
    for p in k.table.iter() {
        if p.pid == 0 || n >= out.len() {
            continue;
        }
        let frame = p.ctx as *const arch::TrapFrame;
        let base_pointer = if frame.is_null() { 0 } else { unsafe { (*frame).rbp } };
        out[n] = ProcessSnapshot {
            pid: p.pid,
            state: p.state.code(),
            priority: p.priority,
            name: p.name,
            name_len: p.name_len,
            foreground: p.foreground,
            stack_pointer: p.ctx as u64,
            base_pointer,
        };
        n += 1;
    }
    n
}

pub fn current_pid() -> Option<u32> {
    let k = KERNEL.lock();
    k.sched.current.map(|slot| k.table[slot].pid)
}

pub fn state_of(pid: u32) -> Option<ProcessState> {
    let k = KERNEL.lock();
    slot_of(&k.table, pid).map(|slot| k.table[slot].state)
}

pub fn priority_of(pid: u32) -> Option<u8> {
    let k = KERNEL.lock();
    slot_of(&k.table, pid).map(|slot| k.table[slot].priority)
}

/// Number of PCRs linked in priority level `priority`'s ready queue.
pub fn ready_queue_len(priority: usize) -> usize {
    KERNEL.lock().sched.queue_len(priority)
}

/// Count of currently occupied slots (any non-terminated pid).
pub fn occupied_slots() -> usize {
    KERNEL.lock().table.iter().filter(|p| p.pid != 0).count()
}

/// One-shot initial dispatch at boot: picks a process, marks it RUNNING,
/// and switches into it. Never returns.
pub fn start_first_process() -> ! {
    let ctx = {
        let mut k = KERNEL.lock();
        let Kernel { table, sched } = &mut *k;
        sched.start_first(table).expect("idle process must exist at boot")
    };
    unsafe { arch::context_switch_to(ctx as Context) }
}

/// Called from the timer/syscall prologue with the outgoing process's
/// saved context. Re-queues it if still RUNNING, picks the next ready
/// process, and returns the context to resume.
pub fn schedule(saved_context: Context) -> Context {
    let mut k = KERNEL.lock();
    let Kernel { table, sched } = &mut *k;
    sched.schedule(table, saved_context as usize) as Context
}
