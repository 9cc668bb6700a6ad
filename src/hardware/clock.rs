use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::interrupts::{self, InterruptMailbox};

/// Master time base for the whole simulated machine. Every hardware thread
/// sleeps against it instead of wall-clock time, so the machine can be
/// paused and advanced one tick at a time.
pub struct Clock {
    state: Mutex<ClockState>,
    ticked: Condvar,
    resumed: Condvar,
    quantum: Duration,
    timer_period: u64,
    mailbox: Option<Arc<InterruptMailbox>>,
}

struct ClockState {
    ticks: u64,
    paused: bool,
}

impl Clock {
    /// With a mailbox attached the clock raises the timer interrupt every
    /// `timer_period` ticks, whether driven or stepped.
    pub fn new(
        quantum: Duration,
        timer_period: u64,
        mailbox: Option<Arc<InterruptMailbox>>,
    ) -> Clock {
        Clock {
            state: Mutex::new(ClockState {
                ticks: 0,
                paused: false,
            }),
            ticked: Condvar::new(),
            resumed: Condvar::new(),
            quantum,
            timer_period: timer_period.max(1),
            mailbox,
        }
    }

    /// Suspend the caller until `ticks` wake broadcasts have occurred.
    pub fn sleep(&self, ticks: u64) {
        let mut state = self.state.lock().unwrap();
        let target = state.ticks + ticks;
        while state.ticks < target {
            state = self.ticked.wait(state).unwrap();
        }
    }

    pub fn pause(&self) {
        self.state.lock().unwrap().paused = true;
    }

    pub fn resume(&self) {
        self.state.lock().unwrap().paused = false;
        self.resumed.notify_all();
    }

    /// Force exactly one broadcast while paused. No-op when free-running.
    pub fn step(&self) {
        let paused = self.state.lock().unwrap().paused;
        if paused {
            self.advance();
        }
    }

    pub fn ticks(&self) -> u64 {
        self.state.lock().unwrap().ticks
    }

    fn advance(&self) {
        let ticks = {
            let mut state = self.state.lock().unwrap();
            state.ticks += 1;
            state.ticks
        };
        self.ticked.notify_all();
        if let Some(mailbox) = &self.mailbox {
            if ticks % self.timer_period == 0 {
                mailbox.raise(interrupts::TIMER);
            }
        }
    }

    /// The background driver: sleeps one quantum and broadcasts, unless
    /// paused, in which case it blocks until `resume`.
    pub fn start_driver(self: &Arc<Self>) -> JoinHandle<()> {
        let clock = Arc::clone(self);
        thread::spawn(move || loop {
            {
                let mut state = clock.state.lock().unwrap();
                while state.paused {
                    state = clock.resumed.wait(state).unwrap();
                }
            }
            thread::sleep(clock.quantum);
            clock.advance();
        })
    }
}
