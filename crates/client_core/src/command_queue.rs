//! Command queue: formats drive and configuration intents, applies the
//! priority policy and drains one command per tick through the channel.

use std::time::{Duration, Instant};

use shared::{
    domain::{CommandSeq, TurtleDirection, WheelMask},
    protocol::{wrap_command, CommandBody},
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

use crate::{
    channel::CommandChannel,
    drive::{
        ensure_finite, format_tank, mix_joystick, turtle_to_tank, DriveModeParameters,
        JoystickRequest, SpeedControlSettings, SpeedWindow, TankRequest,
    },
    error::{DriveError, HaltError},
    halt::{HaltHandle, HaltWaiter},
    pending::{PendingCommands, Priority},
    supervisor::{ReconnectPolicy, Supervisor, SupervisorAction},
    turtle::{TurtleQueue, TurtleStep},
    RoverEvent,
};

#[derive(Debug, Clone, PartialEq)]
pub struct QueueOptions {
    pub reconnect: ReconnectPolicy,
    /// Budget for a `halt()` to be acknowledged before it reports `TimedOut`.
    pub halt_timeout: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            halt_timeout: Duration::from_secs(3),
        }
    }
}

pub struct CommandQueue {
    channel: CommandChannel,
    pending: PendingCommands,
    params: DriveModeParameters,
    speed_window: SpeedWindow,
    seq: CommandSeq,
    last_sent: Option<CommandBody>,
    running: bool,
    turtle: TurtleQueue,
    supervisor: Supervisor,
    halt_waiters: Vec<HaltWaiter>,
    halt_timeout: Duration,
}

impl CommandQueue {
    pub fn new(channel: CommandChannel, options: QueueOptions) -> Self {
        Self {
            channel,
            pending: PendingCommands::new(),
            params: DriveModeParameters::default(),
            speed_window: SpeedWindow::default(),
            seq: CommandSeq::default(),
            last_sent: None,
            running: false,
            turtle: TurtleQueue::default(),
            supervisor: Supervisor::new(options.reconnect),
            halt_waiters: Vec::new(),
            halt_timeout: options.halt_timeout,
        }
    }

    pub fn channel(&self) -> &CommandChannel {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut CommandChannel {
        &mut self.channel
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoverEvent> {
        self.channel.subscribe()
    }

    pub fn params(&self) -> &DriveModeParameters {
        &self.params
    }

    pub fn pending(&self) -> &PendingCommands {
        &self.pending
    }

    pub fn next_seq(&self) -> CommandSeq {
        self.seq
    }

    pub fn turtle_backlog(&self) -> usize {
        self.turtle.len()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn start(&mut self) {
        self.running = true;
        if !self.channel.is_started() {
            self.channel.start();
        }
    }

    /// Stops draining and drops everything pending. Outstanding halt handles
    /// resolve as cancelled.
    pub fn stop(&mut self) {
        self.running = false;
        self.pending.clear();
        self.turtle.clear();
        for waiter in self.halt_waiters.drain(..) {
            waiter.resolve(Err(HaltError::Cancelled));
        }
    }

    pub fn send_tank_command(
        &mut self,
        left: f64,
        right: f64,
        left_flip: bool,
        right_flip: bool,
        left_zero: f64,
        right_zero: f64,
    ) -> bool {
        self.send_tank(&TankRequest {
            left,
            right,
            left_flip,
            right_flip,
            left_zero,
            right_zero,
        })
    }

    pub fn send_tank(&mut self, request: &TankRequest) -> bool {
        match format_tank(&self.params, request) {
            Ok(command) => {
                let priority = if command.is_stop {
                    Priority::High
                } else {
                    Priority::Low
                };
                self.enqueue(command.body, priority)
            }
            Err(err) => {
                error!(error = %err, "queue: rejected tank command");
                false
            }
        }
    }

    pub fn send_turtle(&mut self, direction: TurtleDirection, speed_fraction: f64) -> bool {
        if let Err(err) = ensure_finite("speed", speed_fraction) {
            error!(error = %err, "queue: rejected turtle command");
            return false;
        }
        let (left, right) = turtle_to_tank(direction, speed_fraction);
        self.send_tank(&TankRequest::new(left, right))
    }

    pub fn send_turtle_command(&mut self, direction: &str, speed_fraction: f64) -> bool {
        match direction.parse::<TurtleDirection>() {
            Ok(direction) => self.send_turtle(direction, speed_fraction),
            Err(err) => {
                error!(error = %err, "queue: rejected turtle command");
                false
            }
        }
    }

    pub fn send_joystick_command(
        &mut self,
        throttle: f64,
        steering: f64,
        throttle_flip: bool,
        steering_flip: bool,
        throttle_zero: f64,
        steering_zero: f64,
    ) -> bool {
        let request = JoystickRequest {
            throttle,
            steering,
            throttle_flip,
            steering_flip,
            throttle_zero,
            steering_zero,
        };
        match mix_joystick(&request) {
            Ok((left, right)) => self.send_tank(&TankRequest::new(left, right)),
            Err(err) => {
                error!(error = %err, "queue: rejected joystick command");
                false
            }
        }
    }

    /// Switches between open-loop pwm and closed-loop speed control.
    ///
    /// A mode change queues a halt ahead of the configuration. Enabling
    /// narrows the shared speed window and queues `pid(...)`; disabling resets
    /// the window. Returns whether anything was queued.
    pub fn sync_speed_control(
        &mut self,
        wheels: WheelMask,
        use_speed_control: bool,
        settings: SpeedControlSettings,
    ) -> Result<bool, DriveError> {
        if use_speed_control {
            if wheels.is_empty() {
                return Err(DriveError::EmptyWheelMask);
            }
            settings.validate()?;
        }

        let mut halted = false;
        if use_speed_control != self.params.use_speed_control {
            info!(use_speed_control, "queue: drive mode changing, halting first");
            halted = self.send_halt_command();
            self.params.use_speed_control = use_speed_control;
        }

        if !use_speed_control {
            self.speed_window.clear();
            self.params.min_speed = 0.0;
            self.params.max_speed = 0.0;
            return Ok(halted);
        }

        self.speed_window
            .narrow(settings.min_speed, settings.max_speed);
        let (min_speed, max_speed) = self.speed_window.effective();
        self.params.min_speed = min_speed;
        self.params.max_speed = max_speed;
        debug!(min_speed, max_speed, "queue: speed window updated");

        Ok(self.enqueue(
            CommandBody::Pid {
                wheels,
                min_speed: settings.min_speed,
                max_speed: settings.max_speed,
                kp: settings.kp,
                ki: settings.ki,
                kd: settings.kd,
            },
            Priority::High,
        ))
    }

    pub fn sync_motor_stall(&mut self, left: f64, right: f64) -> Result<bool, DriveError> {
        ensure_finite("left_stall", left)?;
        ensure_finite("right_stall", right)?;
        let left = left.clamp(0.0, 1.0);
        let right = right.clamp(0.0, 1.0);
        self.params.left_stall = left;
        self.params.right_stall = right;
        Ok(self.enqueue(CommandBody::Stall { left, right }, Priority::High))
    }

    pub fn send_halt_command(&mut self) -> bool {
        self.pending.clear();
        self.enqueue(CommandBody::Halt, Priority::High)
    }

    pub fn send_reset_pose_command(&mut self) -> bool {
        self.enqueue(CommandBody::ResetPose, Priority::High)
    }

    pub fn send_goto_goal_command(
        &mut self,
        x: f64,
        y: f64,
        tolerance: f64,
        point_forward: bool,
    ) -> bool {
        let checked = ensure_finite("x", x)
            .and_then(|_| ensure_finite("y", y))
            .and_then(|_| ensure_finite("tolerance", tolerance));
        if let Err(err) = checked {
            error!(error = %err, "queue: rejected goto command");
            return false;
        }
        self.enqueue(
            CommandBody::Goto {
                x,
                y,
                tolerance: tolerance.max(0.0),
                point_forward,
            },
            Priority::Low,
        )
    }

    /// Clears the queue, queues `halt()` and returns immediately. The handle
    /// resolves from later ticks.
    pub fn halt(&mut self) -> HaltHandle {
        self.halt_at(Instant::now())
    }

    pub fn halt_at(&mut self, now: Instant) -> HaltHandle {
        self.send_halt_command();
        let (waiter, handle) = HaltWaiter::new(now + self.halt_timeout);
        self.halt_waiters.push(waiter);
        handle
    }

    pub fn enqueue_turtle_command(&mut self, direction: TurtleDirection, speed_percent: f64) -> bool {
        if let Err(err) = ensure_finite("speed_percent", speed_percent) {
            error!(error = %err, "queue: rejected turtle step");
            return false;
        }
        self.turtle.push(TurtleStep {
            direction,
            speed_percent: speed_percent.clamp(0.0, 100.0),
        })
    }

    /// Feeds the oldest turtle step to `send_turtle`. The step stays queued
    /// while the link is not ready, a command is in flight or waiting, or the
    /// command is refused.
    pub fn process_turtle_command(&mut self) -> bool {
        if !self.channel.is_ready() || self.channel.is_sending() || !self.pending.is_empty() {
            return false;
        }
        let Some(step) = self.turtle.pop_front() else {
            return false;
        };
        if self.send_turtle(step.direction, step.speed_percent / 100.0) {
            true
        } else {
            self.turtle.push_front(step);
            false
        }
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// One scheduler step: absorb transport events, supervise the link, feed
    /// one turtle step, send at most one command and settle halt handles.
    pub fn tick_at(&mut self, now: Instant) {
        let was_ready = self.channel.is_ready();
        self.channel.poll();
        let link_lost = was_ready && !self.channel.is_ready();

        if self.running {
            self.supervise(now);
            if !self.turtle.is_empty() {
                self.process_turtle_command();
            }
            self.process_commands();
        }

        self.settle_halts(now, link_lost);
    }

    fn enqueue(&mut self, command: CommandBody, priority: Priority) -> bool {
        let accepted = self.pending.enqueue(command, priority);
        if accepted {
            trace!(?priority, len = self.pending.len(), "queue: command queued");
        } else {
            debug!("queue: motion command refused while high-priority commands wait");
        }
        accepted
    }

    fn process_commands(&mut self) -> bool {
        let Some(command) = self.pending.pop_front() else {
            return false;
        };

        if self.last_sent.as_ref() == Some(&command) {
            trace!(%command, "queue: skipping repeat of last sent command");
            self.pending.settle();
            return true;
        }

        let frame = wrap_command(self.seq, &command);
        if self.channel.send_command(&frame, false) {
            self.seq = self.seq.next();
            self.last_sent = Some(command);
            self.pending.settle();
            true
        } else {
            self.pending.push_front(command);
            false
        }
    }

    fn supervise(&mut self, now: Instant) {
        let action = self.supervisor.observe(&self.channel.status(), now);
        match action {
            SupervisorAction::Idle => {}
            SupervisorAction::Connected => {
                self.last_sent = None;
                if self.supervisor.policy().halt_on_reconnect {
                    info!("queue: link ready, leading with halt");
                    if !self.pending.is_high_priority() {
                        self.send_halt_command();
                    } else if self.pending.front() != Some(&CommandBody::Halt) {
                        self.pending.push_front(CommandBody::Halt);
                    }
                }
            }
            SupervisorAction::Restart => self.channel.reset(),
            SupervisorAction::ClearError => {
                if let Some(err) = self.channel.error() {
                    warn!(error = %err, "queue: clearing channel error for retry");
                }
                self.channel.clear_error();
                self.last_sent = None;
            }
        }
    }

    fn settle_halts(&mut self, now: Instant, link_lost: bool) {
        if self.halt_waiters.is_empty() {
            return;
        }
        let drained = self.channel.is_ready()
            && self.pending.is_empty()
            && !self.channel.is_sending()
            && !self.channel.has_error();

        for waiter in std::mem::take(&mut self.halt_waiters) {
            if waiter.is_abandoned() {
                continue;
            }
            if link_lost {
                waiter.resolve(Err(HaltError::Disconnected));
            } else if drained {
                waiter.resolve(Ok(()));
            } else if waiter.is_expired(now) {
                warn!("queue: halt not acknowledged in time");
                waiter.resolve(Err(HaltError::TimedOut));
            } else {
                self.halt_waiters.push(waiter);
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/command_queue_tests.rs"]
mod tests;
