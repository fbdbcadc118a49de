//! Fixed-window execution statistics with O(1) mean maintenance.

use serde::Serialize;

use crate::types::ExecSample;

/// Circular buffer of the most recent execution samples for one fingerprint.
///
/// `avg_io_cost` and `avg_exec_time_ms` always equal (within floating-point
/// tolerance) the mean of the populated slots.
#[derive(Debug, Clone, PartialEq)]
pub struct RingStats {
    slots: Vec<ExecSample>,
    capacity: usize,
    next_idx: u64,
    avg_io_cost: f64,
    avg_exec_time_ms: f64,
}

/// Serializable copy of a ring buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RingSnapshot {
    /// Populated I/O cost slots in storage order.
    pub io_costs: Vec<i64>,
    /// Populated execution time slots in storage order.
    pub exec_times_ms: Vec<f64>,
}

impl RingStats {
    /// Creates an empty window of `capacity` slots (clamped to at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            next_idx: 0,
            avg_io_cost: 0.0,
            avg_exec_time_ms: 0.0,
        }
    }

    /// Slot count of the window.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of populated slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when nothing was recorded since creation or the last clear.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// True once every slot holds a sample.
    pub fn is_full(&self) -> bool {
        self.slots.len() == self.capacity
    }

    /// Total samples written, including overwritten ones.
    pub fn writes(&self) -> u64 {
        self.next_idx
    }

    /// Mean I/O cost of the populated slots.
    pub fn avg_io_cost(&self) -> f64 {
        self.avg_io_cost
    }

    /// Mean execution time of the populated slots.
    pub fn avg_exec_time_ms(&self) -> f64 {
        self.avg_exec_time_ms
    }

    /// Populated slots in storage order.
    pub fn samples(&self) -> &[ExecSample] {
        &self.slots
    }

    /// Appends a sample, overwriting the oldest one once full.
    pub fn push(&mut self, sample: ExecSample) {
        let io = sample.io_cost as f64;
        if self.is_full() {
            let pos = (self.next_idx % self.capacity as u64) as usize;
            let oldest = self.slots[pos];
            let n = self.capacity as f64;
            self.avg_io_cost += (io - oldest.io_cost as f64) / n;
            self.avg_exec_time_ms += (sample.exec_time_ms - oldest.exec_time_ms) / n;
            self.slots[pos] = sample;
        } else {
            let k = self.slots.len() as f64;
            self.avg_io_cost = (self.avg_io_cost * k + io) / (k + 1.0);
            self.avg_exec_time_ms = (self.avg_exec_time_ms * k + sample.exec_time_ms) / (k + 1.0);
            self.slots.push(sample);
        }
        self.next_idx += 1;
    }

    /// Population standard deviation of the I/O cost slots.
    pub fn io_cost_stddev(&self) -> f64 {
        if self.slots.is_empty() {
            return 0.0;
        }
        let n = self.slots.len() as f64;
        let mean = self.slots.iter().map(|s| s.io_cost as f64).sum::<f64>() / n;
        let variance = self
            .slots
            .iter()
            .map(|s| {
                let d = s.io_cost as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        variance.sqrt()
    }

    /// Coefficient of variation of the I/O cost, or `None` when the mean is not positive.
    pub fn io_cost_cv(&self) -> Option<f64> {
        (self.avg_io_cost > 0.0).then(|| self.io_cost_stddev() / self.avg_io_cost)
    }

    /// Drops every sample and adopts `capacity` for the next window.
    pub fn clear(&mut self, capacity: usize) {
        *self = RingStats::new(capacity);
    }

    /// Copies the populated slots.
    pub fn snapshot(&self) -> RingSnapshot {
        RingSnapshot {
            io_costs: self.slots.iter().map(|s| s.io_cost).collect(),
            exec_times_ms: self.slots.iter().map(|s| s.exec_time_ms).collect(),
        }
    }
}
