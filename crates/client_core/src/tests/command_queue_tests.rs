use super::*;
use crate::test_support::{LoopbackConnector, Peer};

const TICK: Duration = Duration::from_millis(16);

fn options(halt_on_reconnect: bool) -> QueueOptions {
    QueueOptions {
        reconnect: ReconnectPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            connect_timeout: Some(Duration::from_secs(5)),
            ack_timeout: Some(Duration::from_secs(2)),
            halt_on_reconnect,
            auto_clear_errors: true,
        },
        halt_timeout: Duration::from_millis(500),
    }
}

struct Rig {
    connector: LoopbackConnector,
    queue: CommandQueue,
    peer: Peer,
    now: Instant,
}

impl Rig {
    fn connected(halt_on_reconnect: bool) -> Self {
        let connector = LoopbackConnector::default();
        let mut queue = CommandQueue::new(connector.channel(), options(halt_on_reconnect));
        queue.start();
        let peer = connector.next_peer();
        peer.open();
        let mut rig = Self {
            connector,
            queue,
            peer,
            now: Instant::now(),
        };
        rig.tick();
        rig
    }

    fn tick(&mut self) {
        self.advance(TICK);
    }

    fn advance(&mut self, by: Duration) {
        self.now += by;
        self.queue.tick_at(self.now);
    }

    fn sent(&mut self) -> Vec<String> {
        self.peer.sent()
    }

    /// Acknowledges whatever is in flight and lets the queue see it.
    fn ack(&mut self) -> Vec<String> {
        let frames = self.peer.ack_all();
        self.tick();
        frames
    }
}

fn drive(queue: &mut CommandQueue, left: f64, right: f64) -> bool {
    queue.send_tank_command(left, right, false, false, 0.0, 0.0)
}

#[test]
fn leads_with_a_halt_once_connected() {
    let mut rig = Rig::connected(true);
    assert_eq!(rig.sent(), vec!["cmd(0, halt())".to_string()]);
}

#[test]
fn skips_the_connect_halt_when_disabled() {
    let mut rig = Rig::connected(false);
    assert!(rig.sent().is_empty());
    assert_eq!(rig.queue.next_seq(), CommandSeq(0));
}

#[test]
fn sends_one_command_per_acknowledgment() {
    let mut rig = Rig::connected(false);

    assert!(drive(&mut rig.queue, 1.0, 1.0));
    rig.tick();
    assert_eq!(rig.sent(), vec!["cmd(0, pwm(255, true, 255, true))".to_string()]);

    assert!(drive(&mut rig.queue, 0.5, 0.5));
    assert!(drive(&mut rig.queue, 1.0, -1.0));
    rig.tick();
    assert!(rig.sent().is_empty());
    assert_eq!(rig.queue.pending().len(), 1);

    rig.ack();
    assert_eq!(rig.sent(), vec!["cmd(1, pwm(255, true, 255, false))".to_string()]);
    assert!(rig.queue.pending().is_empty());
}

#[test]
fn stop_displaces_queued_motion_and_blocks_new_motion() {
    let mut rig = Rig::connected(false);
    drive(&mut rig.queue, 1.0, 1.0);
    rig.tick();
    rig.sent();

    drive(&mut rig.queue, 0.5, 0.5);
    assert!(rig
        .queue
        .send_tank_command(0.05, -0.05, false, false, 0.1, 0.1));
    assert!(rig.queue.pending().is_high_priority());
    assert!(!drive(&mut rig.queue, 1.0, 1.0));

    rig.ack();
    assert_eq!(rig.sent(), vec!["cmd(1, pwm(0, true, 0, false))".to_string()]);
    assert!(!rig.queue.pending().is_high_priority());
    assert!(drive(&mut rig.queue, 1.0, 1.0));
}

#[test]
fn repeat_of_last_sent_command_is_not_resent() {
    let mut rig = Rig::connected(false);
    drive(&mut rig.queue, 1.0, 1.0);
    rig.tick();
    rig.ack();
    rig.sent();

    drive(&mut rig.queue, 1.0, 1.0);
    rig.tick();
    assert!(rig.sent().is_empty());
    assert!(rig.queue.pending().is_empty());
    assert_eq!(rig.queue.next_seq(), CommandSeq(1));
}

#[test]
fn nothing_is_sent_before_start() {
    let connector = LoopbackConnector::default();
    let mut queue = CommandQueue::new(connector.channel(), options(false));
    drive(&mut queue, 1.0, 1.0);
    queue.tick();

    assert_eq!(connector.opened(), 0);
    assert_eq!(queue.pending().len(), 1);
}

#[test]
fn halt_resolves_after_acknowledgment() {
    let mut rig = Rig::connected(false);
    drive(&mut rig.queue, 1.0, 1.0);

    let mut handle = rig.queue.halt_at(rig.now);
    assert_eq!(rig.queue.pending().front(), Some(&CommandBody::Halt));
    assert_eq!(rig.queue.pending().len(), 1);

    rig.tick();
    assert_eq!(rig.sent(), vec!["cmd(0, halt())".to_string()]);
    assert_eq!(handle.try_outcome(), None);

    rig.ack();
    assert_eq!(handle.try_outcome(), Some(Ok(())));
}

#[test]
fn halt_reports_timeout() {
    let mut rig = Rig::connected(false);
    let mut handle = rig.queue.halt_at(rig.now);
    rig.tick();
    assert_eq!(handle.try_outcome(), None);

    rig.advance(Duration::from_millis(600));
    assert_eq!(handle.try_outcome(), Some(Err(HaltError::TimedOut)));
}

#[test]
fn halt_reports_lost_link() {
    let mut rig = Rig::connected(false);
    let mut handle = rig.queue.halt_at(rig.now);
    rig.tick();
    rig.peer.close("gone");
    rig.tick();
    assert_eq!(handle.try_outcome(), Some(Err(HaltError::Disconnected)));
}

#[test]
fn stop_cancels_pending_halts() {
    let mut rig = Rig::connected(false);
    let mut handle = rig.queue.halt_at(rig.now);
    rig.queue.stop();

    assert_eq!(handle.try_outcome(), Some(Err(HaltError::Cancelled)));
    assert!(rig.queue.pending().is_empty());
    assert!(!rig.queue.is_running());
}

#[tokio::test]
async fn halt_handle_can_be_awaited() {
    let mut rig = Rig::connected(false);
    let handle = rig.queue.halt_at(rig.now);
    rig.tick();
    rig.ack();
    assert_eq!(handle.wait().await, Ok(()));
}

#[test]
fn enabling_speed_control_halts_then_configures() {
    let mut rig = Rig::connected(false);
    let settings = SpeedControlSettings {
        min_speed: 0.1,
        max_speed: 0.5,
        kp: 1.0,
        ki: 0.5,
        kd: 0.0,
    };

    assert_eq!(
        rig.queue.sync_speed_control(WheelMask::BOTH, true, settings),
        Ok(true)
    );
    assert!(rig.queue.params().use_speed_control);
    assert_eq!(rig.queue.params().min_speed, 0.1);
    assert_eq!(rig.queue.params().max_speed, 0.5);

    rig.tick();
    assert_eq!(rig.sent(), vec!["cmd(0, halt())".to_string()]);
    rig.ack();
    assert_eq!(
        rig.sent(),
        vec!["cmd(1, pid(3, 0.1, 0.5, 1, 0.5, 0))".to_string()]
    );
    rig.ack();

    assert!(drive(&mut rig.queue, 1.0, 1.0));
    rig.tick();
    assert_eq!(
        rig.sent(),
        vec!["cmd(2, speed(0.5, true, 0.5, true))".to_string()]
    );
}

#[test]
fn retuning_narrows_the_window_without_halting_again() {
    let mut rig = Rig::connected(false);
    let settings = SpeedControlSettings {
        min_speed: 0.1,
        max_speed: 0.5,
        kp: 1.0,
        ki: 0.0,
        kd: 0.0,
    };
    rig.queue
        .sync_speed_control(WheelMask::BOTH, true, settings)
        .expect("enable");
    rig.tick();
    rig.ack();
    rig.ack();
    rig.sent();

    let wider = SpeedControlSettings {
        min_speed: 0.2,
        max_speed: 0.8,
        ..settings
    };
    assert_eq!(
        rig.queue.sync_speed_control(WheelMask::RIGHT, true, wider),
        Ok(true)
    );
    let queued: Vec<_> = rig.queue.pending().iter().cloned().collect();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].name(), "pid");
    assert_eq!(rig.queue.params().min_speed, 0.2);
    assert_eq!(rig.queue.params().max_speed, 0.5);

    rig.ack();
    drive(&mut rig.queue, 1.0, 1.0);
    rig.ack();
    assert_eq!(
        rig.sent(),
        vec![
            "cmd(2, pid(2, 0.2, 0.8, 1, 0, 0))".to_string(),
            "cmd(3, speed(0.5, true, 0.5, true))".to_string(),
        ]
    );
}

#[test]
fn disabling_speed_control_only_halts() {
    let mut rig = Rig::connected(false);
    let settings = SpeedControlSettings {
        min_speed: 0.1,
        max_speed: 0.5,
        kp: 1.0,
        ki: 0.0,
        kd: 0.0,
    };
    rig.queue
        .sync_speed_control(WheelMask::BOTH, true, settings)
        .expect("enable");

    assert_eq!(
        rig.queue.sync_speed_control(WheelMask::BOTH, false, settings),
        Ok(true)
    );
    let queued: Vec<_> = rig.queue.pending().iter().cloned().collect();
    assert_eq!(queued, vec![CommandBody::Halt]);
    assert!(!rig.queue.params().use_speed_control);
    assert_eq!(rig.queue.params().max_speed, 0.0);

    assert_eq!(
        rig.queue.sync_speed_control(WheelMask::BOTH, false, settings),
        Ok(false)
    );
}

#[test]
fn invalid_speed_control_is_rejected_without_side_effects() {
    let mut rig = Rig::connected(false);
    let settings = SpeedControlSettings {
        min_speed: 0.6,
        max_speed: 0.5,
        kp: 1.0,
        ki: 0.0,
        kd: 0.0,
    };
    assert!(matches!(
        rig.queue.sync_speed_control(WheelMask::BOTH, true, settings),
        Err(DriveError::InvalidSpeedRange { .. })
    ));
    assert_eq!(
        rig.queue.sync_speed_control(WheelMask(0), true, settings),
        Err(DriveError::EmptyWheelMask)
    );
    assert!(rig.queue.pending().is_empty());
    assert!(!rig.queue.params().use_speed_control);
}

#[test]
fn stall_sets_the_pwm_floor() {
    let mut rig = Rig::connected(false);
    assert_eq!(rig.queue.sync_motor_stall(0.2, 0.2), Ok(true));
    assert!(!rig
        .queue
        .send_tank_command(0.5, -0.3, false, false, 0.1, 0.1));

    rig.tick();
    assert_eq!(rig.sent(), vec!["cmd(0, stall(0.2, 0.2))".to_string()]);
    rig.ack();

    assert!(rig
        .queue
        .send_tank_command(0.5, -0.3, false, false, 0.1, 0.1));
    rig.tick();
    assert_eq!(
        rig.sent(),
        vec!["cmd(1, pwm(141, true, 96, false))".to_string()]
    );
}

#[test]
fn turtle_steps_feed_the_queue_one_per_tick() {
    let mut rig = Rig::connected(false);
    assert!(rig.queue.enqueue_turtle_command(TurtleDirection::Forward, 100.0));
    assert!(!rig.queue.enqueue_turtle_command(TurtleDirection::Forward, 100.0));
    assert!(rig.queue.enqueue_turtle_command(TurtleDirection::Left, 100.0));
    assert_eq!(rig.queue.turtle_backlog(), 2);

    rig.tick();
    assert_eq!(rig.sent(), vec!["cmd(0, pwm(255, true, 255, true))".to_string()]);
    assert_eq!(rig.queue.turtle_backlog(), 1);

    rig.ack();
    assert_eq!(rig.sent(), vec!["cmd(1, pwm(255, false, 255, true))".to_string()]);
    assert_eq!(rig.queue.turtle_backlog(), 0);
}

#[test]
fn turtle_steps_survive_slow_acknowledgments() {
    let mut rig = Rig::connected(false);
    rig.queue.enqueue_turtle_command(TurtleDirection::Forward, 100.0);
    rig.queue.enqueue_turtle_command(TurtleDirection::Left, 100.0);
    rig.queue.enqueue_turtle_command(TurtleDirection::Right, 100.0);

    rig.tick();
    rig.tick();
    rig.tick();
    assert_eq!(rig.queue.turtle_backlog(), 2);
    assert!(rig.queue.pending().is_empty());

    for _ in 0..4 {
        rig.ack();
    }
    assert_eq!(
        rig.sent(),
        vec![
            "cmd(0, pwm(255, true, 255, true))".to_string(),
            "cmd(1, pwm(255, false, 255, true))".to_string(),
            "cmd(2, pwm(255, true, 255, false))".to_string(),
        ]
    );
    assert_eq!(rig.queue.turtle_backlog(), 0);
}

#[test]
fn turtle_steps_wait_behind_queued_commands() {
    let mut rig = Rig::connected(false);
    rig.queue.send_reset_pose_command();
    rig.queue.enqueue_turtle_command(TurtleDirection::Forward, 100.0);

    assert!(!rig.queue.process_turtle_command());
    assert_eq!(rig.queue.turtle_backlog(), 1);
    assert_eq!(rig.queue.pending().front(), Some(&CommandBody::ResetPose));
}

#[test]
fn turtle_steps_wait_for_the_link() {
    let connector = LoopbackConnector::default();
    let mut queue = CommandQueue::new(connector.channel(), options(false));
    queue.start();
    queue.enqueue_turtle_command(TurtleDirection::Forward, 50.0);

    assert!(!queue.process_turtle_command());
    queue.tick();
    assert_eq!(queue.turtle_backlog(), 1);
    assert!(queue.pending().is_empty());
}

#[test]
fn turtle_command_by_name() {
    let mut rig = Rig::connected(false);
    assert!(rig.queue.send_turtle_command("LEFT", 0.8));
    assert_eq!(
        rig.queue.pending().front(),
        Some(&CommandBody::Pwm {
            left: 204,
            left_forward: false,
            right: 204,
            right_forward: true,
        })
    );
    assert!(!rig.queue.send_turtle_command("sideways", 0.8));
}

#[test]
fn turtle_matches_the_equivalent_tank_command() {
    let mut turtle = Rig::connected(false);
    let mut tank = Rig::connected(false);
    assert!(turtle.queue.send_turtle_command("left", 0.8));
    assert!(tank.queue.send_tank_command(-0.8, 0.8, false, false, 0.0, 0.0));
    assert_eq!(turtle.queue.pending().front(), tank.queue.pending().front());
}

#[test]
fn halt_command_leaves_only_the_halt() {
    let connector = LoopbackConnector::default();
    let mut queue = CommandQueue::new(connector.channel(), options(false));
    drive(&mut queue, 0.5, 0.5);
    queue.send_reset_pose_command();
    queue.sync_motor_stall(0.1, 0.1).expect("stall");
    assert_eq!(queue.pending().len(), 2);

    assert!(queue.send_halt_command());
    let queued: Vec<_> = queue.pending().iter().cloned().collect();
    assert_eq!(queued, vec![CommandBody::Halt]);
}

#[test]
fn joystick_is_formatted_as_tank() {
    let mut rig = Rig::connected(false);
    assert!(rig
        .queue
        .send_joystick_command(1.0, 0.5, false, false, 0.0, 0.0));
    rig.tick();
    assert_eq!(rig.sent(), vec!["cmd(0, pwm(255, true, 127, true))".to_string()]);
}

#[test]
fn goto_and_reset_pose() {
    let mut rig = Rig::connected(false);
    assert!(!rig.queue.send_goto_goal_command(f64::INFINITY, 0.0, 0.1, true));
    assert!(rig.queue.send_goto_goal_command(1.5, -2.0, 0.05, false));
    rig.tick();
    assert_eq!(rig.sent(), vec!["cmd(0, goto(1.5, -2, 0.05, false))".to_string()]);

    rig.queue.send_reset_pose_command();
    rig.ack();
    assert_eq!(rig.sent(), vec!["cmd(1, resetPose())".to_string()]);
}

#[test]
fn reconnects_after_link_loss_and_halts_first() {
    let mut rig = Rig::connected(true);
    assert_eq!(rig.sent(), vec!["cmd(0, halt())".to_string()]);
    rig.ack();
    drive(&mut rig.queue, 1.0, 1.0);
    rig.tick();
    assert_eq!(rig.sent(), vec!["cmd(1, pwm(255, true, 255, true))".to_string()]);

    rig.peer.close("wifi dropped");
    rig.tick();
    assert!(!rig.queue.channel().is_ready());
    assert_eq!(rig.connector.opened(), 1);

    rig.advance(Duration::from_millis(100));
    assert_eq!(rig.connector.opened(), 2);

    rig.peer = rig.connector.next_peer();
    rig.peer.open();
    drive(&mut rig.queue, 1.0, 1.0);
    rig.tick();
    assert_eq!(rig.sent(), vec!["cmd(2, halt())".to_string()]);
    assert!(rig.queue.pending().is_empty());
}

#[test]
fn mismatched_echo_is_cleared_and_command_can_be_repeated() {
    let mut rig = Rig::connected(false);
    drive(&mut rig.queue, 1.0, 1.0);
    rig.tick();
    rig.sent();

    rig.peer.reply("cmd(0, halt())");
    rig.tick();
    assert!(!rig.queue.channel().has_error());
    assert!(!rig.queue.channel().is_sending());

    drive(&mut rig.queue, 1.0, 1.0);
    rig.tick();
    assert_eq!(rig.sent(), vec!["cmd(1, pwm(255, true, 255, true))".to_string()]);
}

#[test]
fn slow_handshake_is_not_torn_down_by_backoff() {
    let connector = LoopbackConnector::default();
    let mut queue = CommandQueue::new(connector.channel(), options(true));
    let start = Instant::now();
    queue.start();
    queue.tick_at(start);
    queue.tick_at(start + Duration::from_millis(150));
    queue.tick_at(start + Duration::from_millis(900));
    assert_eq!(connector.opened(), 1);
    assert!(queue.channel().is_started());

    let mut peer = connector.next_peer();
    peer.open();
    queue.tick_at(start + Duration::from_secs(1));
    assert!(queue.channel().is_ready());
    assert_eq!(peer.sent(), vec!["cmd(0, halt())".to_string()]);

    queue.tick_at(start + Duration::from_secs(7));
    assert_eq!(connector.opened(), 1);
}

#[test]
fn unacknowledged_command_restarts_the_link() {
    let mut rig = Rig::connected(false);
    drive(&mut rig.queue, 1.0, 1.0);
    rig.tick();
    rig.tick();

    rig.advance(Duration::from_secs(3));
    assert_eq!(rig.connector.opened(), 2);
    assert!(!rig.queue.channel().is_sending());
}
