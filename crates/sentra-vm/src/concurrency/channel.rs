//! Channels
//!
//! A bounded FIFO of values with wait lists of parked senders and
//! receivers. Capacity 0 is a synchronous rendezvous: every send is
//! handed directly to a waiting receiver.
//!
//! Channel operations never touch the scheduler. They report which
//! waiters must be woken and with what, and the VM applies that. Each
//! waiter carries the epoch its task had when it parked; a waiter whose
//! task has since been woken (by another select case, say) is stale and
//! is skipped.

use super::TaskId;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

pub type ChannelRef = Rc<RefCell<Channel>>;

/// A parked task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiter {
    pub task: TaskId,
    pub epoch: u64,
    /// Select case index when parked by a select
    pub case: Option<usize>,
}

/// Outcome of a non-blocking send
#[derive(Debug)]
pub enum SendResult {
    /// Value accepted; wake the receiver it was handed to, if any
    Sent(Option<(Waiter, Value)>),
    /// Channel is closed; the value is returned
    Closed(Value),
    /// No room and no receiver; the value is returned
    WouldBlock(Value),
}

/// Outcome of a non-blocking receive
#[derive(Debug)]
pub enum RecvResult {
    /// Got a value; wake the sender that was unblocked, if any
    Received(Value, Option<Waiter>),
    /// Closed and drained
    Closed,
    WouldBlock,
}

/// Waiters to notify after a close
#[derive(Debug, Default)]
pub struct CloseWakes {
    /// Woken with nil
    pub receivers: Vec<Waiter>,
    /// Woken with `ChannelClosed`
    pub senders: Vec<Waiter>,
}

#[derive(Debug)]
pub struct Channel {
    capacity: usize,
    buffer: VecDeque<Value>,
    closed: bool,
    recv_waiters: VecDeque<Waiter>,
    send_waiters: VecDeque<(Waiter, Value)>,
}

impl Channel {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffer: VecDeque::with_capacity(capacity.min(1024)),
            closed: false,
            recv_waiters: VecDeque::new(),
            send_waiters: VecDeque::new(),
        }
    }

    pub fn new_ref(capacity: usize) -> ChannelRef {
        Rc::new(RefCell::new(Self::new(capacity)))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn try_send(&mut self, value: Value, is_live: impl Fn(&Waiter) -> bool) -> SendResult {
        if self.closed {
            return SendResult::Closed(value);
        }
        while let Some(receiver) = self.recv_waiters.pop_front() {
            if is_live(&receiver) {
                return SendResult::Sent(Some((receiver, value)));
            }
        }
        if self.buffer.len() < self.capacity {
            self.buffer.push_back(value);
            return SendResult::Sent(None);
        }
        SendResult::WouldBlock(value)
    }

    pub fn try_recv(&mut self, is_live: impl Fn(&Waiter) -> bool) -> RecvResult {
        if let Some(value) = self.buffer.pop_front() {
            // A slot just freed up: admit the oldest parked sender.
            let woke = self.pop_live_sender(&is_live).map(|(sender, pending)| {
                self.buffer.push_back(pending);
                sender
            });
            return RecvResult::Received(value, woke);
        }
        if let Some((sender, value)) = self.pop_live_sender(&is_live) {
            return RecvResult::Received(value, Some(sender));
        }
        if self.closed {
            return RecvResult::Closed;
        }
        RecvResult::WouldBlock
    }

    /// Would a send complete (or fail on a closed channel) without blocking?
    pub fn send_ready(&self, is_live: impl Fn(&Waiter) -> bool) -> bool {
        self.closed
            || self.buffer.len() < self.capacity
            || self.recv_waiters.iter().any(is_live)
    }

    /// Would a receive complete without blocking?
    pub fn recv_ready(&self, is_live: impl Fn(&Waiter) -> bool) -> bool {
        self.closed
            || !self.buffer.is_empty()
            || self.send_waiters.iter().any(|(w, _)| is_live(w))
    }

    pub fn park_receiver(&mut self, waiter: Waiter, is_live: impl Fn(&Waiter) -> bool) {
        self.recv_waiters.retain(&is_live);
        self.recv_waiters.push_back(waiter);
    }

    pub fn park_sender(&mut self, waiter: Waiter, value: Value, is_live: impl Fn(&Waiter) -> bool) {
        self.send_waiters.retain(|(w, _)| is_live(w));
        self.send_waiters.push_back((waiter, value));
    }

    /// Close the channel. Returns None if it was already closed.
    pub fn close(&mut self) -> Option<CloseWakes> {
        if self.closed {
            return None;
        }
        self.closed = true;
        Some(CloseWakes {
            receivers: self.recv_waiters.drain(..).collect(),
            senders: self.send_waiters.drain(..).map(|(w, _)| w).collect(),
        })
    }

    fn pop_live_sender(&mut self, is_live: &impl Fn(&Waiter) -> bool) -> Option<(Waiter, Value)> {
        while let Some((sender, value)) = self.send_waiters.pop_front() {
            if is_live(&sender) {
                return Some((sender, value));
            }
        }
        None
    }
}
