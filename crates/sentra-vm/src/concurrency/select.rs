//! Select support
//!
//! When several cases are ready at once the winner is drawn uniformly at
//! random, so no case can starve another. A fixed seed makes the draw
//! reproducible.

use super::channel::{ChannelRef, Waiter};
use crate::value::Value;
use rand::rngs::{StdRng, ThreadRng};
use rand::{RngExt, SeedableRng};

/// One channel operation in a select
#[derive(Debug, Clone)]
pub enum SelectCase {
    Recv(ChannelRef),
    Send(ChannelRef, Value),
}

impl SelectCase {
    pub fn is_ready(&self, is_live: impl Fn(&Waiter) -> bool) -> bool {
        match self {
            SelectCase::Recv(ch) => ch.borrow().recv_ready(is_live),
            SelectCase::Send(ch, _) => ch.borrow().send_ready(is_live),
        }
    }
}

/// Random source for choosing among ready cases
#[derive(Debug)]
pub enum SelectRng {
    Thread(ThreadRng),
    Seeded(StdRng),
}

impl SelectRng {
    pub fn new(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => SelectRng::Seeded(StdRng::seed_from_u64(seed)),
            None => SelectRng::Thread(rand::rng()),
        }
    }

    /// Uniform index in `0..n`; `n` must be non-zero
    pub fn pick(&mut self, n: usize) -> usize {
        match self {
            SelectRng::Thread(rng) => rng.random_range(0..n),
            SelectRng::Seeded(rng) => rng.random_range(0..n),
        }
    }
}

/// Indices of the cases that can proceed without blocking
pub fn ready_cases(cases: &[SelectCase], is_live: impl Fn(&Waiter) -> bool) -> Vec<usize> {
    cases
        .iter()
        .enumerate()
        .filter(|(_, case)| case.is_ready(&is_live))
        .map(|(i, _)| i)
        .collect()
}
