use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use super::clock::Clock;
use super::interrupts::{InterruptMailbox, DISK_BASE};
use crate::random::Rng;

/// Words the result buffer can hold; a LOAD longer than this is an error.
pub const BUFFER_SIZE: usize = 128;
/// All-ones word marking end-of-data during a LOAD scan.
pub const SENTINEL: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskOp {
    Read,
    Write,
    Load,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskError {
    Success,
    SomethingWrong,
    AddressOutOfRange,
    MissingEof,
}

impl DiskError {
    pub fn code(self) -> u32 {
        match self {
            DiskError::Success => 0,
            DiskError::SomethingWrong => 1,
            DiskError::AddressOutOfRange => 2,
            DiskError::MissingEof => 3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiskRequest {
    pub op: DiskOp,
    pub address: usize,
    /// Word to store; only meaningful for `Write`.
    pub data: u32,
}

struct DiskResult {
    error: DiskError,
    data: Vec<u32>,
}

/// One physical disk. Processes exactly one request at a time: the request
/// channel has capacity 1 and the kernel never submits while the device is
/// busy, holding extra requests in its own backlog instead. Each request
/// costs a randomized number of seek turns on the clock, then the result
/// registers are filled and the disk's interrupt raised regardless of
/// outcome.
pub struct DiskUnit {
    id: usize,
    image: Mutex<Vec<u32>>,
    result: Mutex<DiskResult>,
    tx: SyncSender<DiskRequest>,
    rx: Mutex<Option<Receiver<DiskRequest>>>,
}

impl DiskUnit {
    pub fn new(id: usize, size: usize) -> DiskUnit {
        let (tx, rx) = sync_channel(1);
        DiskUnit {
            id,
            image: Mutex::new(vec![0; size]),
            result: Mutex::new(DiskResult {
                error: DiskError::Success,
                data: Vec::new(),
            }),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.image.lock().unwrap().len()
    }

    pub fn interrupt_code(&self) -> u32 {
        DISK_BASE + self.id as u32
    }

    /// Overwrite the front of the disk with an initial image.
    pub fn load_image(&self, words: &[u32]) {
        let mut image = self.image.lock().unwrap();
        let n = words.len().min(image.len());
        image[..n].copy_from_slice(&words[..n]);
    }

    /// Hand one request to the device. The kernel only calls this when the
    /// disk is idle, so the capacity-1 channel never rejects it; a failure
    /// here means the worker thread is gone.
    pub fn submit(&self, request: DiskRequest) {
        if self.tx.send(request).is_err() {
            log::error!("disk {}: worker gone, request dropped", self.id);
        }
    }

    pub fn error(&self) -> DiskError {
        self.result.lock().unwrap().error
    }

    pub fn size(&self) -> usize {
        self.result.lock().unwrap().data.len()
    }

    pub fn data(&self, index: usize) -> u32 {
        self.result.lock().unwrap().data[index]
    }

    /// Process one queued request synchronously: no seek delay, no
    /// interrupt. For stepped and test operation while the worker thread is
    /// not running.
    pub fn service_one(&self) -> bool {
        let rx = self.rx.lock().unwrap();
        let Some(rx) = rx.as_ref() else {
            return false;
        };
        match rx.try_recv() {
            Ok(request) => {
                self.execute(&request);
                true
            }
            Err(_) => false,
        }
    }

    fn execute(&self, request: &DiskRequest) {
        let mut image = self.image.lock().unwrap();
        let outcome = Self::process(&mut image, request, BUFFER_SIZE);
        *self.result.lock().unwrap() = outcome;
    }

    fn process(image: &mut [u32], request: &DiskRequest, buffer_cap: usize) -> DiskResult {
        if request.address >= image.len() {
            return DiskResult {
                error: DiskError::AddressOutOfRange,
                data: Vec::new(),
            };
        }
        match request.op {
            DiskOp::Read => DiskResult {
                error: DiskError::Success,
                data: vec![image[request.address]],
            },
            DiskOp::Write => {
                image[request.address] = request.data;
                DiskResult {
                    error: DiskError::Success,
                    data: Vec::new(),
                }
            }
            DiskOp::Load => {
                let mut data = Vec::new();
                let mut index = request.address;
                loop {
                    if data.len() >= buffer_cap || index >= image.len() {
                        return DiskResult {
                            error: DiskError::MissingEof,
                            data,
                        };
                    }
                    if image[index] == SENTINEL {
                        return DiskResult {
                            error: DiskError::Success,
                            data,
                        };
                    }
                    data.push(image[index]);
                    index += 1;
                }
            }
        }
    }

    /// Spawn the device worker: block for a request, seek for a random
    /// number of turns, process, raise the completion interrupt.
    pub fn start(
        self: &Arc<Self>,
        clock: Arc<Clock>,
        mailbox: Arc<InterruptMailbox>,
        mut rng: Rng,
        min_turns: u64,
        max_turns: u64,
    ) -> JoinHandle<()> {
        let disk = Arc::clone(self);
        let rx = disk
            .rx
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| panic!("disk {} already started", disk.id));
        thread::spawn(move || {
            while let Ok(request) = rx.recv() {
                let turns = rng.range(min_turns, max_turns);
                clock.sleep(turns);
                log::debug!("disk {}: {:?} after {} turns", disk.id, request.op, turns);
                disk.execute(&request);
                mailbox.raise(disk.interrupt_code());
            }
        })
    }
}
