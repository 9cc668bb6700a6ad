use std::collections::HashMap;

use crate::hardware::cpu::Flags;

pub type Pid = u32;

/// Pid of the idle process occupying an otherwise-empty CPU slot. Never in
/// the ready queue, never terminated, never owns a user partition.
pub const IDLE_PID: Pid = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Write,
    Read,
}

impl FileMode {
    /// Syscall encoding: 0 write, 1 read.
    pub fn from_arg(value: i32) -> Option<FileMode> {
        match value {
            0 => Some(FileMode::Write),
            1 => Some(FileMode::Read),
            _ => None,
        }
    }
}

/// Per-process open-file state: a window into one disk with a cursor.
#[derive(Debug, Clone)]
pub struct FileHandle {
    pub disk: usize,
    pub base: usize,
    pub mode: FileMode,
    pub cursor: usize,
    pub size: usize,
}

impl FileHandle {
    pub fn new(disk: usize, base: usize, mode: FileMode) -> FileHandle {
        FileHandle {
            disk,
            base,
            mode,
            cursor: 0,
            size: 0,
        }
    }

    pub fn has_unread(&self) -> bool {
        self.cursor < self.size
    }

    /// Address of the word under the cursor on the backing disk.
    pub fn cursor_address(&self) -> usize {
        self.base + self.cursor
    }

    pub fn advance_read(&mut self) {
        debug_assert!(self.cursor < self.size);
        self.cursor += 1;
    }

    /// A write at the current end grows the file by one word.
    pub fn advance_write(&mut self) {
        self.cursor += 1;
        if self.cursor > self.size {
            self.size = self.cursor;
        }
    }
}

/// Which device operation a process is blocked on, carrying the file it
/// concerns. Replaces the original's multiplexed integer flag and the
/// separate "hanging file" pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOp {
    None,
    Loading,
    Open { file: u32 },
    Get { file: u32 },
    Put { file: u32 },
}

/// Process control block: identity, saved context, partition, remaining
/// slice, pending device operation, open files. Owned by exactly one
/// container at a time (ready queue, CPU slot, or a disk wait queue);
/// membership transfers by move.
#[derive(Debug)]
pub struct ProcessRecord {
    pid: Pid,
    partition: usize,
    pub pc: usize,
    pub gpr: [i32; 16],
    pub flags: Flags,
    pub slice: u32,
    pub pending: PendingOp,
    files: HashMap<u32, FileHandle>,
    next_file_id: u32,
}

impl ProcessRecord {
    pub fn new(pid: Pid, partition: usize) -> ProcessRecord {
        ProcessRecord {
            pid,
            partition,
            pc: 0,
            gpr: [0; 16],
            flags: Flags::default(),
            slice: 0,
            pending: PendingOp::None,
            files: HashMap::new(),
            next_file_id: 0,
        }
    }

    /// Idle records run the jump-to-self program in partition 0.
    pub fn idle() -> ProcessRecord {
        ProcessRecord::new(IDLE_PID, 0)
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn partition(&self) -> usize {
        self.partition
    }

    pub fn is_idle(&self) -> bool {
        self.pid == IDLE_PID
    }

    pub fn open_file(&mut self, handle: FileHandle) -> u32 {
        let id = self.next_file_id;
        self.next_file_id += 1;
        self.files.insert(id, handle);
        id
    }

    pub fn file(&self, id: u32) -> Option<&FileHandle> {
        self.files.get(&id)
    }

    pub fn file_mut(&mut self, id: u32) -> Option<&mut FileHandle> {
        self.files.get_mut(&id)
    }

    pub fn remove_file(&mut self, id: u32) -> Option<FileHandle> {
        self.files.remove(&id)
    }
}
