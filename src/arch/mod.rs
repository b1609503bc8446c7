//! The only architecture-specific corner of the core: laying down an
//! initial register frame on a fresh stack, and swapping the CPU between
//! two saved frames. Everything above this module treats `Context` as
//! opaque.

use core::arch::asm;

/// Register frame pushed on every suspension point (timer tick, syscall
/// trap, or a voluntary block) and consumed by `context_switch_to`. The
/// last five fields are exactly what `iretq` expects on the stack.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

/// Opaque saved-execution-state pointer. The core never reads through
/// this pointer itself; only this module does.
pub type Context = *mut TrapFrame;

/// `RFLAGS` value a freshly dispatched process starts with: interrupts
/// enabled (bit 9) plus the reserved bit 1 that is always set.
const INITIAL_RFLAGS: u64 = 0x202;

/// This kernel does not implement a user/kernel ring split (see
/// DESIGN.md, Open Questions); every process runs at ring 0 on the flat
/// kernel code/stack selectors installed by the (out-of-scope) GDT setup.
const KERNEL_CS: u64 = 0x08;
const KERNEL_SS: u64 = 0x10;

/// Lays down an initial `TrapFrame` at the top of `stack_top` so that a
/// subsequent `context_switch_to` begins executing `entry(argc, argv)`
/// with interrupts enabled. Returns the register-save pointer to store in
/// the process's `ctx` field.
///
/// # Safety
/// `stack_top` must be the exclusive top address of a stack allocation at
/// least `size_of::<TrapFrame>()` bytes long, page-aligned down to a
/// region the caller (the process allocator) exclusively owns.
pub unsafe fn stack_init(
    stack_top: usize,
    entry: usize,
    argc: usize,
    argv: usize,
) -> Context {
    let frame_addr = (stack_top - core::mem::size_of::<TrapFrame>()) & !0xf;
    let frame = frame_addr as *mut TrapFrame;

    frame.write(TrapFrame {
        r15: 0,
        r14: 0,
        r13: 0,
        r12: 0,
        r11: 0,
        r10: 0,
        r9: 0,
        r8: 0,
        rbp: frame_addr as u64,
        rdi: argc as u64,
        rsi: argv as u64,
        rdx: 0,
        rcx: 0,
        rbx: 0,
        rax: 0,
        rip: entry as u64,
        cs: KERNEL_CS,
        rflags: INITIAL_RFLAGS,
        rsp: stack_top as u64,
        ss: KERNEL_SS,
    });

    frame
}

/// Restores every register in `*ctx` and `iretq`s into it. Never returns.
///
/// # Safety
/// `ctx` must point at a live `TrapFrame` produced by `stack_init` or by
/// a prior `context_switch`, on a stack that is still mapped.
pub unsafe fn context_switch_to(ctx: Context) -> ! {
    asm!(
        "mov rsp, {0}",
        "pop r15", "pop r14", "pop r13", "pop r12",
        "pop r11", "pop r10", "pop r9", "pop r8",
        "pop rbp", "pop rdi", "pop rsi", "pop rdx",
        "pop rcx", "pop rbx", "pop rax",
        "iretq",
        in(reg) ctx,
        options(noreturn)
    )
}

/// Saves the caller's live registers into a fresh `TrapFrame` on the
/// caller's own stack and returns a `Context` pointing at it. Paired with
/// `context_switch_to`, this is the low-level primitive every suspension
/// point in the scheduler reduces to (spec.md §5): save here, hand the
/// resulting `Context` to `schedule`, then `context_switch_to` whatever
/// it returns.
///
/// # Safety
/// Must only be invoked from a context where the stack below the current
/// `rsp` is free to be overwritten with a `TrapFrame` (i.e. from the
/// trampoline the timer/syscall entry points share).
pub unsafe fn context_switch() -> Context {
    let ctx: Context;
    asm!(
        "push rax", "push rbx", "push rcx", "push rdx",
        "push rsi", "push rdi", "push rbp",
        "push r8", "push r9", "push r10", "push r11",
        "push r12", "push r13", "push r14", "push r15",
        "mov {0}, rsp",
        out(reg) ctx,
    );
    ctx
}
