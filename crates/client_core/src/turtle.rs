use std::collections::VecDeque;

use shared::domain::TurtleDirection;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurtleStep {
    pub direction: TurtleDirection,
    /// 0 to 100.
    pub speed_percent: f64,
}

/// FIFO of turtle steps. A step identical to the current tail is dropped.
#[derive(Debug, Default)]
pub struct TurtleQueue {
    steps: VecDeque<TurtleStep>,
}

impl TurtleQueue {
    pub fn push(&mut self, step: TurtleStep) -> bool {
        if self.steps.back() == Some(&step) {
            return false;
        }
        self.steps.push_back(step);
        true
    }

    pub fn pop_front(&mut self) -> Option<TurtleStep> {
        self.steps.pop_front()
    }

    pub fn push_front(&mut self, step: TurtleStep) {
        self.steps.push_front(step);
    }

    pub fn clear(&mut self) {
        self.steps.clear();
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
