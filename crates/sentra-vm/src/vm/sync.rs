//! Channel operations and select
//!
//! A blocked operation registers a [`Waiter`] carrying the task's current
//! wait epoch and returns [`Flow::Block`]. Whoever completes it later
//! stores the result in the task's resume slot.

use super::{Flow, VM};
use crate::concurrency::channel::{RecvResult, SendResult};
use crate::concurrency::select::ready_cases;
use crate::concurrency::{ChannelRef, SelectCase, Task, Waiter};
use crate::error::RuntimeError;
use crate::value::Value;

impl VM {
    pub(super) fn channel_send(
        &mut self,
        task: &mut Task,
        channel: ChannelRef,
        value: Value,
    ) -> Result<Flow, RuntimeError> {
        let result = channel
            .borrow_mut()
            .try_send(value, |w| self.scheduler.is_live(w));
        match result {
            SendResult::Sent(receiver) => {
                if let Some((waiter, value)) = receiver {
                    self.scheduler.deliver(&waiter, value);
                }
                task.push(Value::Nil);
                Ok(Flow::Continue)
            }
            SendResult::Closed(_) => Err(RuntimeError::ChannelClosed),
            SendResult::WouldBlock(value) => {
                let waiter = waiter_for(task, None);
                channel
                    .borrow_mut()
                    .park_sender(waiter, value, |w| self.scheduler.is_live(w));
                Ok(Flow::Block)
            }
        }
    }

    pub(super) fn channel_recv(
        &mut self,
        task: &mut Task,
        channel: ChannelRef,
    ) -> Result<Flow, RuntimeError> {
        let result = channel.borrow_mut().try_recv(|w| self.scheduler.is_live(w));
        match result {
            RecvResult::Received(value, sender) => {
                if let Some(sender) = sender {
                    self.scheduler.deliver(&sender, Value::Nil);
                }
                task.push(value);
                Ok(Flow::Continue)
            }
            RecvResult::Closed => {
                task.push(Value::Nil);
                Ok(Flow::Continue)
            }
            RecvResult::WouldBlock => {
                let waiter = waiter_for(task, None);
                channel
                    .borrow_mut()
                    .park_receiver(waiter, |w| self.scheduler.is_live(w));
                Ok(Flow::Block)
            }
        }
    }

    /// Close `channel`, waking parked receivers with nil and failing
    /// parked senders
    pub(super) fn channel_close(&mut self, channel: &ChannelRef) -> Result<(), RuntimeError> {
        let wakes = channel
            .borrow_mut()
            .close()
            .ok_or(RuntimeError::ChannelClosed)?;
        for receiver in &wakes.receivers {
            self.scheduler.deliver(receiver, Value::Nil);
        }
        for sender in &wakes.senders {
            self.scheduler.fail(sender, RuntimeError::ChannelClosed);
        }
        Ok(())
    }

    /// Run one ready case chosen uniformly at random, take the default, or
    /// park on every case. Leaves `value, index` on the stack.
    pub(super) fn select(
        &mut self,
        task: &mut Task,
        cases: Vec<SelectCase>,
        has_default: bool,
    ) -> Result<Flow, RuntimeError> {
        let ready = ready_cases(&cases, |w| self.scheduler.is_live(w));
        if !ready.is_empty() {
            let index = ready[self.rng.pick(ready.len())];
            if let Some(value) = self.try_case(&cases[index])? {
                task.push(value);
                task.push(Value::Number(index as f64));
                return Ok(Flow::Continue);
            }
        }

        if has_default {
            task.push(Value::Nil);
            task.push(Value::Number(-1.0));
            return Ok(Flow::Continue);
        }

        let base = waiter_for(task, None);
        let own = |w: &Waiter| w.task == base.task && w.epoch == base.epoch;
        for (index, case) in cases.into_iter().enumerate() {
            let waiter = waiter_for(task, Some(index));
            match case {
                SelectCase::Recv(channel) => channel
                    .borrow_mut()
                    .park_receiver(waiter, |w| own(w) || self.scheduler.is_live(w)),
                SelectCase::Send(channel, value) => channel
                    .borrow_mut()
                    .park_sender(waiter, value, |w| own(w) || self.scheduler.is_live(w)),
            }
        }
        Ok(Flow::Block)
    }

    /// Complete a select case without blocking. `None` if it cannot.
    fn try_case(&mut self, case: &SelectCase) -> Result<Option<Value>, RuntimeError> {
        match case {
            SelectCase::Recv(channel) => {
                let result = channel.borrow_mut().try_recv(|w| self.scheduler.is_live(w));
                match result {
                    RecvResult::Received(value, sender) => {
                        if let Some(sender) = sender {
                            self.scheduler.deliver(&sender, Value::Nil);
                        }
                        Ok(Some(value))
                    }
                    RecvResult::Closed => Ok(Some(Value::Nil)),
                    RecvResult::WouldBlock => Ok(None),
                }
            }
            SelectCase::Send(channel, value) => {
                let result = channel
                    .borrow_mut()
                    .try_send(value.clone(), |w| self.scheduler.is_live(w));
                match result {
                    SendResult::Sent(receiver) => {
                        if let Some((waiter, value)) = receiver {
                            self.scheduler.deliver(&waiter, value);
                        }
                        Ok(Some(Value::Nil))
                    }
                    SendResult::Closed(_) => Err(RuntimeError::ChannelClosed),
                    SendResult::WouldBlock(_) => Ok(None),
                }
            }
        }
    }
}

fn waiter_for(task: &Task, case: Option<usize>) -> Waiter {
    Waiter {
        task: task.id,
        epoch: task.wait_epoch,
        case,
    }
}
