//! Multilevel priority scheduler: one FIFO ready queue per priority
//! level, operating on process-table slot indices rather than raw
//! pointers (spec §4.3 describes an intrusive pointer-linked queue; an
//! index is the same idea without the aliasing). This module holds no
//! lock of its own — every entry point here is called with the process
//! table already locked by [`crate::process`].

use crate::process::{ProcessControlRecord, ProcessState, MAX_PRIORITIES, MAX_PROCESSES};

#[derive(Clone, Copy)]
struct ReadyQueue {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl ReadyQueue {
    const fn empty() -> Self {
        ReadyQueue { head: None, tail: None, len: 0 }
    }
}

pub struct Scheduler {
    queues: [ReadyQueue; MAX_PRIORITIES],
    /// Slot index of the RUNNING process, or `None`.
    pub current: Option<usize>,
}

impl Scheduler {
    pub const fn new() -> Self {
        Scheduler { queues: [ReadyQueue::empty(); MAX_PRIORITIES], current: None }
    }

    pub fn init(&mut self) {
        self.queues = [ReadyQueue::empty(); MAX_PRIORITIES];
        self.current = None;
    }

    pub fn queue_len(&self, priority: usize) -> usize {
        self.queues[priority].len
    }

    fn clamp_priority(priority: u8) -> usize {
        (priority as usize).min(MAX_PRIORITIES - 1)
    }

    /// Appends `slot` to the tail of its priority level. Debug builds
    /// assert the slot isn't already linked somewhere, since a double
    /// enqueue would corrupt the list into a cycle.
    pub fn add_process(&mut self, table: &mut [ProcessControlRecord; MAX_PROCESSES], slot: usize) {
        debug_assert!(table[slot].next.is_none(), "process already linked in a ready queue");

        let priority = Self::clamp_priority(table[slot].priority);
        table[slot].next = None;
        let q = &mut self.queues[priority];
        match q.tail {
            None => {
                q.head = Some(slot);
                q.tail = Some(slot);
            }
            Some(tail) => {
                table[tail].next = Some(slot);
                q.tail = Some(slot);
            }
        }
        q.len += 1;
    }

    fn dequeue(&mut self, table: &mut [ProcessControlRecord; MAX_PROCESSES], priority: usize) -> Option<usize> {
        let q = &mut self.queues[priority];
        let head = q.head?;
        q.head = table[head].next;
        if q.head.is_none() {
            q.tail = None;
        }
        table[head].next = None;
        q.len = q.len.saturating_sub(1);
        Some(head)
    }

    /// Removes `slot` from its priority queue wherever it sits, O(n) in
    /// that queue. A no-op if `slot` isn't present.
    pub fn unschedule(&mut self, table: &mut [ProcessControlRecord; MAX_PROCESSES], slot: usize) {
        let priority = Self::clamp_priority(table[slot].priority);
        let mut prev: Option<usize> = None;
        let mut node = self.queues[priority].head;

        while let Some(n) = node {
            if n == slot {
                let next = table[n].next;
                match prev {
                    Some(p) => table[p].next = next,
                    None => self.queues[priority].head = next,
                }
                if self.queues[priority].tail == Some(n) {
                    self.queues[priority].tail = prev;
                }
                table[n].next = None;
                self.queues[priority].len = self.queues[priority].len.saturating_sub(1);
                return;
            }
            prev = node;
            node = table[n].next;
        }
    }

    /// Scans queues from the highest priority downward and dequeues the
    /// head of the first non-empty one. `None` only when every queue is
    /// empty (prevented at steady state by the idle process).
    pub fn pick_next(&mut self, table: &mut [ProcessControlRecord; MAX_PROCESSES]) -> Option<usize> {
        for priority in (0..MAX_PRIORITIES).rev() {
            if self.queues[priority].len == 0 {
                continue;
            }
            if let Some(slot) = self.dequeue(table, priority) {
                return Some(slot);
            }
        }
        None
    }

    /// Called from the timer/syscall prologue with the outgoing
    /// process's saved register-frame pointer. Re-queues the outgoing
    /// process if it was still RUNNING, picks the next one, and returns
    /// the context to resume.
    pub fn schedule(
        &mut self,
        table: &mut [ProcessControlRecord; MAX_PROCESSES],
        saved_context: usize,
    ) -> usize {
        if let Some(running) = self.current {
            table[running].ctx = saved_context;
            if table[running].state == ProcessState::Running {
                table[running].state = ProcessState::Ready;
                self.add_process(table, running);
            }
        }

        match self.pick_next(table) {
            Some(next) => {
                table[next].state = ProcessState::Running;
                self.current = Some(next);
                table[next].ctx
            }
            None => {
                self.current = None;
                saved_context
            }
        }
    }

    /// One-shot initial dispatch: picks a process and marks it RUNNING,
    /// returning its context for the caller to switch into. Never called
    /// again after boot.
    pub fn start_first(&mut self, table: &mut [ProcessControlRecord; MAX_PROCESSES]) -> Option<usize> {
        let next = self.pick_next(table)?;
        table[next].state = ProcessState::Running;
        self.current = Some(next);
        Some(table[next].ctx)
    }
}
