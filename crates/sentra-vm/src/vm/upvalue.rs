//! Upvalue cells
//!
//! An open upvalue names a live stack slot of some task; a closed one owns
//! the value. Each task keeps its open cells sorted by slot so that a
//! returning frame (or an unwinding throw) can close everything at or
//! above its base in one pass. Two closures capturing the same slot share
//! one cell.

use crate::concurrency::TaskId;
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// Location of a captured local
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackSlot {
    pub task: TaskId,
    pub index: usize,
}

#[derive(Debug)]
pub enum Upvalue {
    Open(StackSlot),
    Closed(Value),
}

pub type UpvalueRef = Rc<RefCell<Upvalue>>;

/// A task's open upvalues, ordered by stack slot
#[derive(Debug, Default)]
pub struct OpenUpvalues {
    cells: Vec<(usize, UpvalueRef)>,
}

impl OpenUpvalues {
    /// Cell for `index`, created on first capture
    pub fn capture(&mut self, task: TaskId, index: usize) -> UpvalueRef {
        match self.cells.binary_search_by_key(&index, |(slot, _)| *slot) {
            Ok(pos) => self.cells[pos].1.clone(),
            Err(pos) => {
                let cell = Rc::new(RefCell::new(Upvalue::Open(StackSlot { task, index })));
                self.cells.insert(pos, (index, cell.clone()));
                cell
            }
        }
    }

    /// Close every cell aliasing a slot at or above `base`
    pub fn close_from(&mut self, base: usize, stack: &[Value]) {
        let split = self.cells.partition_point(|(slot, _)| *slot < base);
        for (slot, cell) in self.cells.drain(split..) {
            let value = stack.get(slot).cloned().unwrap_or(Value::Nil);
            *cell.borrow_mut() = Upvalue::Closed(value);
        }
    }

    pub fn close_all(&mut self, stack: &[Value]) {
        self.close_from(0, stack);
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed_value(cell: &UpvalueRef) -> Option<Value> {
        match &*cell.borrow() {
            Upvalue::Closed(v) => Some(v.clone()),
            Upvalue::Open(_) => None,
        }
    }

    #[test]
    fn test_capture_shares_cells() {
        let mut open = OpenUpvalues::default();
        let a = open.capture(1, 3);
        let b = open.capture(1, 3);
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(open.len(), 1);
    }

    #[test]
    fn test_close_from_only_closes_upper_slots() {
        let mut open = OpenUpvalues::default();
        let low = open.capture(1, 0);
        let high = open.capture(1, 2);
        let stack = vec![Value::Number(10.0), Value::Nil, Value::Number(30.0)];

        open.close_from(1, &stack);
        assert_eq!(closed_value(&high), Some(Value::Number(30.0)));
        assert_eq!(closed_value(&low), None);
        assert_eq!(open.len(), 1);

        open.close_all(&stack);
        assert_eq!(closed_value(&low), Some(Value::Number(10.0)));
        assert!(open.is_empty());
    }
}
