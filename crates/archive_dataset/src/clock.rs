//! Nested Run ⊇ Epoch ⊇ Trial ⊇ Row counters advanced once per served image.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeScale {
    Run,
    Epoch,
    Trial,
    Row,
}

/// One time-scale counter. `max == 0` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counter {
    pub current: i64,
    pub previous: i64,
    pub max: i64,
    changed: bool,
}

impl Counter {
    pub fn new(start: i64, max: i64) -> Self {
        Self {
            current: start,
            previous: start,
            max,
            changed: false,
        }
    }

    /// Step forward; returns true when the counter wrapped back to zero.
    pub fn incr(&mut self) -> bool {
        self.previous = self.current;
        self.current += 1;
        self.changed = true;
        if self.max > 0 && self.current >= self.max {
            self.current = 0;
            return true;
        }
        false
    }

    pub fn set(&mut self, value: i64) {
        self.previous = self.current;
        self.changed = value != self.current;
        self.current = value;
    }

    /// Mark the start of a step in which this counter has not moved yet.
    pub fn same(&mut self) {
        self.changed = false;
    }

    pub fn changed(&self) -> bool {
        self.changed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterReading {
    pub current: i64,
    pub previous: i64,
    /// The counter moved on the most recent tick: for Epoch and Run this is
    /// the start of a new unit at that scale.
    pub rolled_over: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterClock {
    run: Counter,
    epoch: Counter,
    trial: Counter,
    row: Counter,
}

impl CounterClock {
    /// Row starts at the `-1` "not yet started" sentinel, Epoch and Trial at
    /// zero. Trial wraps after `trials_per_epoch` images; Epoch wraps after
    /// `max_epochs` (0 = never) and advances Run when it does.
    pub fn new(run: u64, trials_per_epoch: usize, max_epochs: usize) -> Self {
        Self {
            run: Counter::new(run as i64, 0),
            epoch: Counter::new(0, max_epochs as i64),
            trial: Counter::new(0, trials_per_epoch as i64),
            row: Counter::new(-1, 0),
        }
    }

    /// Record that owned-range position `row` was just presented.
    pub fn tick(&mut self, row: usize) {
        for c in [&mut self.run, &mut self.epoch, &mut self.trial, &mut self.row] {
            c.same();
        }
        self.row.set(row as i64);
        self.row.changed = true;
        if self.trial.incr() && self.epoch.incr() {
            self.run.incr();
        }
    }

    pub fn get(&self, scale: TimeScale) -> &Counter {
        match scale {
            TimeScale::Run => &self.run,
            TimeScale::Epoch => &self.epoch,
            TimeScale::Trial => &self.trial,
            TimeScale::Row => &self.row,
        }
    }

    pub fn counter(&self, scale: TimeScale) -> CounterReading {
        let c = self.get(scale);
        CounterReading {
            current: c.current,
            previous: c.previous,
            rolled_over: c.changed,
        }
    }
}
