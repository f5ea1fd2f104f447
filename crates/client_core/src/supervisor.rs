//! Reconnect and acknowledgment watchdog for the command channel.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::channel::ChannelStatus;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// A handshake still pending after this is abandoned and retried. `None`
    /// leaves it to the transport to report failure.
    pub connect_timeout: Option<Duration>,
    /// An in-flight command older than this resets the link. `None` waits forever.
    pub ack_timeout: Option<Duration>,
    /// Queue a halt as the first command after every (re)connect.
    pub halt_on_reconnect: bool,
    /// Clear channel errors on the next tick so the queued command is retried.
    pub auto_clear_errors: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            connect_timeout: Some(Duration::from_secs(10)),
            ack_timeout: Some(Duration::from_secs(2)),
            halt_on_reconnect: true,
            auto_clear_errors: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    Idle,
    /// Link just became ready.
    Connected,
    /// Restart the link (`CommandChannel::reset`).
    Restart,
    /// Clear the recorded channel error.
    ClearError,
}

#[derive(Debug)]
pub struct Supervisor {
    policy: ReconnectPolicy,
    backoff: Duration,
    retry_at: Option<Instant>,
    handshake_since: Option<Instant>,
    in_flight_since: Option<(String, Instant)>,
    connected: bool,
    attempts: u32,
}

impl Supervisor {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            backoff: policy.initial_backoff,
            policy,
            retry_at: None,
            handshake_since: None,
            in_flight_since: None,
            connected: false,
            attempts: 0,
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn current_backoff(&self) -> Duration {
        self.backoff
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn observe(&mut self, status: &ChannelStatus<'_>, now: Instant) -> SupervisorAction {
        if status.ready {
            return self.observe_ready(status, now);
        }

        if self.connected {
            self.connected = false;
            warn!(backoff_ms = self.backoff.as_millis() as u64, "supervisor: link lost");
        }
        self.in_flight_since = None;

        if status.started {
            // backoff is measured from the failed attempt
            self.retry_at = None;
            let since = *self.handshake_since.get_or_insert(now);
            match self.policy.connect_timeout {
                Some(timeout) if now.duration_since(since) >= timeout => {
                    warn!(timeout_ms = timeout.as_millis() as u64, "supervisor: handshake timed out");
                }
                _ => return SupervisorAction::Idle,
            }
        } else {
            let retry_at = *self.retry_at.get_or_insert(now + self.backoff);
            if now < retry_at {
                return SupervisorAction::Idle;
            }
        }

        self.handshake_since = None;
        self.attempts += 1;
        self.backoff = (self.backoff * 2).min(self.policy.max_backoff);
        self.retry_at = Some(now + self.backoff);
        info!(
            attempt = self.attempts,
            started = status.started,
            next_backoff_ms = self.backoff.as_millis() as u64,
            "supervisor: restarting link"
        );
        SupervisorAction::Restart
    }

    fn observe_ready(&mut self, status: &ChannelStatus<'_>, now: Instant) -> SupervisorAction {
        if !self.connected {
            self.connected = true;
            self.backoff = self.policy.initial_backoff;
            self.retry_at = None;
            self.handshake_since = None;
            self.attempts = 0;
            self.in_flight_since = None;
            return SupervisorAction::Connected;
        }

        if status.has_error {
            self.in_flight_since = None;
            if self.policy.auto_clear_errors {
                return SupervisorAction::ClearError;
            }
            return SupervisorAction::Idle;
        }

        match (status.sending, self.policy.ack_timeout) {
            (Some(text), Some(timeout)) => {
                let since = match &self.in_flight_since {
                    Some((tracked, since)) if tracked == text => *since,
                    _ => {
                        self.in_flight_since = Some((text.to_string(), now));
                        now
                    }
                };
                if now.duration_since(since) >= timeout {
                    warn!(
                        command = text,
                        timeout_ms = timeout.as_millis() as u64,
                        "supervisor: acknowledgment timed out"
                    );
                    self.in_flight_since = None;
                    self.connected = false;
                    return SupervisorAction::Restart;
                }
            }
            _ => self.in_flight_since = None,
        }
        SupervisorAction::Idle
    }
}

#[cfg(test)]
#[path = "tests/supervisor_tests.rs"]
mod tests;
