use std::collections::VecDeque;
use std::sync::Mutex;

pub const ILLEGAL_INSTRUCTION: u32 = 1;
pub const TIMER: u32 = 2;
pub const PROTECTION_FAULT: u32 = 3;
/// Disk `n` raises `DISK_BASE + n`.
pub const DISK_BASE: u32 = 5;
pub const CONSOLE: u32 = 15;
pub const EXIT: u32 = 32;
pub const OPEN: u32 = 34;
pub const CLOSE: u32 = 35;
pub const GET: u32 = 36;
pub const PUT: u32 = 37;
pub const PRINT: u32 = 46;

/// Pending interrupt numbers from all hardware components. The memory
/// protection fault is an exception that must be handled right away, so it
/// has its own slot with priority over the FIFO the other sources share.
pub struct InterruptMailbox {
    pending: Mutex<Pending>,
}

struct Pending {
    fault: Option<u32>,
    queue: VecDeque<u32>,
}

impl InterruptMailbox {
    pub fn new() -> InterruptMailbox {
        InterruptMailbox {
            pending: Mutex::new(Pending {
                fault: None,
                queue: VecDeque::new(),
            }),
        }
    }

    pub fn raise(&self, code: u32) {
        let mut pending = self.pending.lock().unwrap();
        if code == PROTECTION_FAULT {
            pending.fault = Some(code);
        } else {
            pending.queue.push_back(code);
        }
    }

    pub fn take_next(&self) -> Option<u32> {
        let mut pending = self.pending.lock().unwrap();
        match pending.fault.take() {
            Some(code) => Some(code),
            None => pending.queue.pop_front(),
        }
    }
}

impl Default for InterruptMailbox {
    fn default() -> Self {
        Self::new()
    }
}
