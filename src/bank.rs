// Secondary record banking
//
// Every stochastic loss and every decay product produced while a particle is
// propagated ends up here as a `Secondary` record, in the order they were
// created.

use nalgebra::Vector3;
use std::collections::VecDeque;

use crate::process::ProcessKind;

/// What produced a secondary record.
#[derive(Debug, Clone, PartialEq)]
pub enum SecondaryKind {
    /// Energy deposited by a stochastic loss of this process
    Loss(ProcessKind),
    /// A decay product
    DecayProduct(String),
}

/// A record emitted during propagation.
#[derive(Debug, Clone, PartialEq)]
pub struct Secondary {
    pub kind: SecondaryKind,
    pub energy: f64,
    /// Propagated distance of the parent at creation (cm)
    pub offset: f64,
    pub position: Vector3<f64>,
    /// Parent time at creation (s)
    pub time: f64,
}

/// Receiver of secondary records.
pub trait SecondarySink {
    fn push(&mut self, secondary: Secondary);
}

impl SecondarySink for Vec<Secondary> {
    fn push(&mut self, secondary: Secondary) {
        Vec::push(self, secondary);
    }
}

/// FIFO bank of secondary records
#[derive(Debug, Clone, Default)]
pub struct SecondaryBank {
    queue: VecDeque<Secondary>,
}

impl SecondaryBank {
    /// Create a new empty secondary bank
    pub fn new() -> Self {
        SecondaryBank {
            queue: VecDeque::new(),
        }
    }

    /// Create a secondary bank with an initial capacity
    pub fn with_capacity(capacity: usize) -> Self {
        SecondaryBank {
            queue: VecDeque::with_capacity(capacity),
        }
    }

    /// Get the oldest record from the bank
    /// Returns None if the bank is empty
    pub fn pop(&mut self) -> Option<Secondary> {
        self.queue.pop_front()
    }

    /// Check if the bank is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Get the number of records in the bank
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Clear all records from the bank
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Secondary> {
        self.queue.iter()
    }

    /// Total energy carried by the banked records
    pub fn total_energy(&self) -> f64 {
        self.queue.iter().map(|s| s.energy).sum()
    }

    /// Drain all records in creation order
    pub fn drain(&mut self) -> impl Iterator<Item = Secondary> + '_ {
        self.queue.drain(..)
    }
}

impl SecondarySink for SecondaryBank {
    fn push(&mut self, secondary: Secondary) {
        self.queue.push_back(secondary);
    }
}
