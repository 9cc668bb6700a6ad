use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use super::interrupts::{self, InterruptMailbox};

pub fn pack_word(bytes: [u8; 4]) -> u32 {
    u32::from_be_bytes(bytes)
}

/// Unprotected word array shared by all CPUs, divided into fixed-size
/// partitions. All process access goes through a per-CPU `Mmu`; the
/// `super_*` methods bypass translation and bounds checks and are used only
/// by the kernel to materialize loaded process images.
pub struct MemoryStore {
    words: RwLock<Vec<u32>>,
    partition_size: usize,
}

impl MemoryStore {
    pub fn new(partition_size: usize, partition_count: usize) -> MemoryStore {
        let mut words = vec![0; partition_size * partition_count];
        // Partition 0 holds the idle program: jump-to-self.
        words[0] = pack_word([b'J', b'P', b'A', 0]);
        MemoryStore {
            words: RwLock::new(words),
            partition_size,
        }
    }

    pub fn partition_size(&self) -> usize {
        self.partition_size
    }

    pub fn len(&self) -> usize {
        self.words.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn super_read(&self, address: usize) -> u32 {
        self.words.read().unwrap()[address]
    }

    pub fn super_write(&self, address: usize, word: u32) {
        self.words.write().unwrap()[address] = word;
    }
}

/// Base/limit translation for one CPU. Privately owned by that CPU's
/// fetch-execute loop and reprogrammed only by the kernel at dispatch time,
/// so plain atomics are enough for the window registers.
pub struct Mmu {
    store: Arc<MemoryStore>,
    mailbox: Arc<InterruptMailbox>,
    base: AtomicUsize,
    limit: AtomicUsize,
}

impl Mmu {
    /// Starts with the window over partition 0, where the idle program lives.
    pub fn new(store: Arc<MemoryStore>, mailbox: Arc<InterruptMailbox>) -> Mmu {
        let limit = store.partition_size();
        Mmu {
            store,
            mailbox,
            base: AtomicUsize::new(0),
            limit: AtomicUsize::new(limit),
        }
    }

    pub fn set_window(&self, base: usize, limit: usize) {
        self.base.store(base, Ordering::Release);
        self.limit.store(limit, Ordering::Release);
    }

    fn translate(&self, address: usize) -> Option<usize> {
        let base = self.base.load(Ordering::Acquire);
        let limit = self.limit.load(Ordering::Acquire);
        if address >= limit - base {
            self.mailbox.raise(interrupts::PROTECTION_FAULT);
            None
        } else {
            Some(base + address)
        }
    }

    pub fn read(&self, address: usize) -> u32 {
        match self.translate(address) {
            Some(physical) => self.store.super_read(physical),
            None => 0,
        }
    }

    /// Instruction fetch: like `read`, but tells the CPU the access faulted
    /// so it does not also execute a phantom zero word.
    pub fn fetch(&self, address: usize) -> Option<u32> {
        self.translate(address).map(|physical| self.store.super_read(physical))
    }

    pub fn write(&self, address: usize, word: u32) {
        if let Some(physical) = self.translate(address) {
            self.store.super_write(physical, word);
        }
    }
}
