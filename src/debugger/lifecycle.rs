use std::time::{Duration, Instant};

use log::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NotStarted,
    Running,
    /// The exit command was sent. Timers that already fired are cleared.
    Exiting {
        kill_at: Option<Instant>,
        give_up_at: Option<Instant>,
    },
    Exited,
}

/// What the session has to do when a lifecycle timer expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    ForceKill,
    GiveUp,
}

/// Tracks one debugger process from spawn to confirmed exit.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: LifecycleState,
    kill_after: Duration,
    give_up_after: Duration,
}

impl Lifecycle {
    pub fn new(kill_after: Duration, give_up_after: Duration) -> Lifecycle {
        Lifecycle {
            state: LifecycleState::NotStarted,
            kill_after,
            give_up_after,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == LifecycleState::Running
    }

    pub fn is_exiting(&self) -> bool {
        matches!(self.state, LifecycleState::Exiting { .. })
    }

    pub fn start(&mut self) {
        if self.state == LifecycleState::NotStarted {
            self.state = LifecycleState::Running;
        }
    }

    /// Running -> Exiting. Returns false if the process was not running.
    pub fn begin_exit(&mut self, now: Instant) -> bool {
        if !self.is_running() {
            return false;
        }
        info!("debugger exit requested");
        self.state = LifecycleState::Exiting {
            kill_at: Some(now + self.kill_after),
            give_up_at: Some(now + self.give_up_after),
        };
        true
    }

    /// The process reported its own exit. Cancels both timers.
    pub fn on_exited(&mut self) {
        info!("debugger exited");
        self.state = LifecycleState::Exited;
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            LifecycleState::Exiting {
                kill_at,
                give_up_at,
            } => match (kill_at, give_up_at) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            },
            _ => None,
        }
    }

    /// Fire the earliest expired timer, if any. Call repeatedly until `None`.
    pub fn poll(&mut self, now: Instant) -> Option<LifecycleAction> {
        let LifecycleState::Exiting {
            kill_at,
            give_up_at,
        } = self.state
        else {
            return None;
        };

        if let Some(at) = kill_at {
            if at <= now {
                self.state = LifecycleState::Exiting {
                    kill_at: None,
                    give_up_at,
                };
                return Some(LifecycleAction::ForceKill);
            }
        }

        if let Some(at) = give_up_at {
            if at <= now {
                self.state = LifecycleState::Exiting {
                    kill_at: None,
                    give_up_at: None,
                };
                return Some(LifecycleAction::GiveUp);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lifecycle() -> Lifecycle {
        let mut lifecycle = Lifecycle::new(Duration::from_secs(1), Duration::from_secs(2));
        lifecycle.start();
        lifecycle
    }

    #[test]
    fn no_timers_while_running() {
        let mut lifecycle = lifecycle();
        assert!(lifecycle.is_running());
        assert_eq!(lifecycle.next_deadline(), None);
        assert_eq!(lifecycle.poll(Instant::now() + Duration::from_secs(10)), None);
    }

    #[test]
    fn exit_without_start_is_refused() {
        let mut lifecycle = Lifecycle::new(Duration::from_secs(1), Duration::from_secs(2));
        assert!(!lifecycle.begin_exit(Instant::now()));
        assert_eq!(lifecycle.state(), LifecycleState::NotStarted);
    }

    #[test]
    fn escalates_to_kill_then_gives_up() {
        let mut lifecycle = lifecycle();
        let t0 = Instant::now();
        assert!(lifecycle.begin_exit(t0));
        assert_eq!(lifecycle.next_deadline(), Some(t0 + Duration::from_secs(1)));

        assert_eq!(lifecycle.poll(t0 + Duration::from_millis(999)), None);
        assert_eq!(
            lifecycle.poll(t0 + Duration::from_secs(1)),
            Some(LifecycleAction::ForceKill)
        );
        assert_eq!(lifecycle.poll(t0 + Duration::from_secs(1)), None);
        assert_eq!(lifecycle.next_deadline(), Some(t0 + Duration::from_secs(2)));

        assert_eq!(
            lifecycle.poll(t0 + Duration::from_secs(2)),
            Some(LifecycleAction::GiveUp)
        );
        assert_eq!(lifecycle.next_deadline(), None);
        assert!(lifecycle.is_exiting());
    }

    #[test]
    fn late_poll_fires_both_timers_in_order() {
        let mut lifecycle = lifecycle();
        let t0 = Instant::now();
        lifecycle.begin_exit(t0);
        let late = t0 + Duration::from_secs(5);
        assert_eq!(lifecycle.poll(late), Some(LifecycleAction::ForceKill));
        assert_eq!(lifecycle.poll(late), Some(LifecycleAction::GiveUp));
        assert_eq!(lifecycle.poll(late), None);
    }

    #[test]
    fn exit_cancels_timers() {
        let mut lifecycle = lifecycle();
        let t0 = Instant::now();
        lifecycle.begin_exit(t0);
        lifecycle.on_exited();
        assert_eq!(lifecycle.state(), LifecycleState::Exited);
        assert_eq!(lifecycle.next_deadline(), None);
        assert_eq!(lifecycle.poll(t0 + Duration::from_secs(5)), None);
        assert!(!lifecycle.begin_exit(t0));
    }
}
