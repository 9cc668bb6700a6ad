use std::collections::VecDeque;
use std::sync::Arc;

use super::process::{Pid, ProcessRecord};
use crate::events::EventSink;

/// Ordered, exclusive-ownership container of process records. Push and pop
/// move the record and report the membership change to the observer, so the
/// external viewers always match the kernel's own queues.
pub struct ProcessQueue {
    name: String,
    items: VecDeque<ProcessRecord>,
    events: Arc<dyn EventSink>,
}

impl ProcessQueue {
    pub fn new(name: impl Into<String>, events: Arc<dyn EventSink>) -> ProcessQueue {
        ProcessQueue {
            name: name.into(),
            items: VecDeque::new(),
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push_back(&mut self, record: ProcessRecord) {
        self.events.process_added(&self.name, record.pid());
        self.items.push_back(record);
    }

    pub fn pop_front(&mut self) -> Option<ProcessRecord> {
        let record = self.items.pop_front()?;
        self.events.process_removed(&self.name, record.pid());
        Some(record)
    }

    pub fn front(&self) -> Option<&ProcessRecord> {
        self.items.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessRecord> {
        self.items.iter()
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.items.iter().map(ProcessRecord::pid).collect()
    }
}
