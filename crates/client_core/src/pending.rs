//! Pending command queue with absolute priority and a single coalesced
//! low-priority slot.

use std::collections::VecDeque;

use shared::protocol::CommandBody;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Steady-state motion; only the newest one is kept.
    Low,
    /// Stops and configuration; displaces everything low-priority.
    High,
}

#[derive(Debug, Default)]
pub struct PendingCommands {
    queue: VecDeque<CommandBody>,
    high_priority: bool,
}

impl PendingCommands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when a low-priority command is refused because
    /// high-priority commands are waiting.
    pub fn enqueue(&mut self, command: CommandBody, priority: Priority) -> bool {
        match priority {
            Priority::High => {
                if !self.high_priority {
                    self.queue.clear();
                    self.high_priority = true;
                }
                self.queue.push_back(command);
                true
            }
            Priority::Low => {
                if self.high_priority {
                    return false;
                }
                match self.queue.front_mut() {
                    Some(slot) => *slot = command,
                    None => self.queue.push_back(command),
                }
                true
            }
        }
    }

    pub fn pop_front(&mut self) -> Option<CommandBody> {
        self.queue.pop_front()
    }

    /// Puts a command that could not be sent back at the head.
    pub fn push_front(&mut self, command: CommandBody) {
        self.queue.push_front(command);
    }

    /// Called after a successful send: leaves high-priority mode once drained.
    pub fn settle(&mut self) {
        if self.queue.is_empty() {
            self.high_priority = false;
        }
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.high_priority = false;
    }

    pub fn front(&self) -> Option<&CommandBody> {
        self.queue.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandBody> {
        self.queue.iter()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_high_priority(&self) -> bool {
        self.high_priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pwm(left: u8) -> CommandBody {
        CommandBody::Pwm {
            left,
            left_forward: true,
            right: left,
            right_forward: true,
        }
    }

    #[test]
    fn high_priority_displaces_queued_motion() {
        let mut pending = PendingCommands::new();
        assert!(pending.enqueue(pwm(100), Priority::Low));
        assert!(pending.enqueue(CommandBody::Halt, Priority::High));

        assert_eq!(pending.len(), 1);
        assert_eq!(pending.front(), Some(&CommandBody::Halt));
        assert!(pending.is_high_priority());
    }

    #[test]
    fn low_priority_commands_coalesce_into_one_slot() {
        let mut pending = PendingCommands::new();
        assert!(pending.enqueue(pwm(100), Priority::Low));
        assert!(pending.enqueue(pwm(120), Priority::Low));

        assert_eq!(pending.len(), 1);
        assert_eq!(pending.front(), Some(&pwm(120)));
    }

    #[test]
    fn low_priority_is_refused_while_high_priority_waits() {
        let mut pending = PendingCommands::new();
        pending.enqueue(CommandBody::Halt, Priority::High);
        pending.enqueue(CommandBody::ResetPose, Priority::High);

        assert!(!pending.enqueue(pwm(100), Priority::Low));
        let queued: Vec<_> = pending.iter().cloned().collect();
        assert_eq!(queued, vec![CommandBody::Halt, CommandBody::ResetPose]);
    }

    #[test]
    fn flag_resets_only_when_drained() {
        let mut pending = PendingCommands::new();
        pending.enqueue(CommandBody::Halt, Priority::High);
        pending.enqueue(CommandBody::ResetPose, Priority::High);

        pending.pop_front();
        pending.settle();
        assert!(pending.is_high_priority());

        pending.pop_front();
        pending.settle();
        assert!(!pending.is_high_priority());
        assert!(pending.enqueue(pwm(1), Priority::Low));
    }

    #[test]
    fn failed_send_goes_back_to_the_head() {
        let mut pending = PendingCommands::new();
        pending.enqueue(CommandBody::Halt, Priority::High);
        pending.enqueue(CommandBody::ResetPose, Priority::High);

        let head = pending.pop_front().expect("head");
        pending.push_front(head);
        assert_eq!(pending.front(), Some(&CommandBody::Halt));
        assert_eq!(pending.len(), 2);
    }
}
