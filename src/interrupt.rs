use log::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StopDecision {
    Immediate,
    /// Stop after this many milliseconds.
    After(f64),
}

/// `ms_played >= cutoff_ms` means the cutoff is already behind us.
pub fn decide(ms_played: f64, cutoff_ms: f64) -> StopDecision {
    if ms_played >= cutoff_ms {
        StopDecision::Immediate
    } else {
        StopDecision::After(cutoff_ms - ms_played)
    }
}

/// An interrupt that has been accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedInterrupt {
    pub turn_id: String,
    pub cutoff_ms: f64,
    pub decision: StopDecision,
}

#[derive(Debug, Clone)]
struct PendingStop {
    turn_id: String,
    cutoff_ms: f64,
    /// Clock time (seconds) at which the stop fires.
    deadline: f64,
}

#[derive(Default)]
pub struct InterruptController {
    active_turn: Option<String>,
    pending: Option<PendingStop>,
    /// Cutoff of the interrupt accepted for the active turn.
    cutoff_ms: Option<f64>,
}

impl InterruptController {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new turn cancels any stop still pending from the previous one.
    pub fn begin_turn(&mut self, turn_id: &str) {
        if let Some(stale) = self.pending.take() {
            debug!("Cancelled pending stop for turn {}", stale.turn_id);
        }
        self.active_turn = Some(turn_id.to_string());
        self.cutoff_ms = None;
    }

    pub fn active_turn(&self) -> Option<&str> {
        self.active_turn.as_deref()
    }

    pub fn is_interrupted(&self) -> bool {
        self.cutoff_ms.is_some()
    }

    pub fn cutoff_ms(&self) -> Option<f64> {
        self.cutoff_ms
    }

    pub fn has_pending_stop(&self) -> bool {
        self.pending.is_some()
    }

    /// Verifies the interrupt targets the active turn and decides how to stop.
    /// `now` is the audio clock time in seconds.
    pub fn accept(&mut self, turn_id: &str, cutoff_ms: f64, ms_played: f64, now: f64) -> Option<AcceptedInterrupt> {
        if self.active_turn.as_deref() != Some(turn_id) {
            debug!("Ignoring interrupt for turn {} (active: {:?})", turn_id, self.active_turn);
            return None;
        }
        // A repeated interrupt can only move the cutoff earlier
        let cutoff_ms = match self.cutoff_ms {
            Some(existing) if existing <= cutoff_ms => {
                debug!("Turn {} already interrupted at {}ms", turn_id, existing);
                return None;
            }
            _ => cutoff_ms,
        };
        self.cutoff_ms = Some(cutoff_ms);

        let decision = decide(ms_played, cutoff_ms);
        match decision {
            StopDecision::Immediate => {
                self.pending = None;
                info!("Interrupt at {}ms, already played {:.0}ms: stopping now", cutoff_ms, ms_played);
            }
            StopDecision::After(delay_ms) => {
                self.pending = Some(PendingStop {
                    turn_id: turn_id.to_string(),
                    cutoff_ms,
                    deadline: now + delay_ms / 1000.0,
                });
                info!("Interrupt at {}ms, played {:.0}ms: stopping in {:.0}ms", cutoff_ms, ms_played, delay_ms);
            }
        }

        Some(AcceptedInterrupt {
            turn_id: turn_id.to_string(),
            cutoff_ms,
            decision,
        })
    }

    /// Fires the scheduled stop once its deadline passes. Returns its cutoff.
    pub fn poll(&mut self, now: f64) -> Option<f64> {
        if self.pending.as_ref().map_or(false, |p| now >= p.deadline) {
            return self.pending.take().map(|p| p.cutoff_ms);
        }
        None
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide() {
        assert_eq!(decide(200.0, 500.0), StopDecision::After(300.0));
        assert_eq!(decide(500.0, 500.0), StopDecision::Immediate);
        assert_eq!(decide(900.0, 500.0), StopDecision::Immediate);
    }

    #[test]
    fn test_foreign_turn_ignored() {
        let mut ctl = InterruptController::new();
        ctl.begin_turn("B");
        assert_eq!(ctl.accept("A", 500.0, 200.0, 1.0), None);
        assert!(!ctl.is_interrupted());
        assert!(!ctl.has_pending_stop());
    }

    #[test]
    fn test_scheduled_stop_fires_at_deadline() {
        let mut ctl = InterruptController::new();
        ctl.begin_turn("A");
        let accepted = ctl.accept("A", 500.0, 200.0, 10.0).unwrap();
        assert_eq!(accepted.decision, StopDecision::After(300.0));
        assert!(ctl.is_interrupted());

        assert_eq!(ctl.poll(10.2), None);
        assert_eq!(ctl.poll(10.31), Some(500.0));
        assert_eq!(ctl.poll(11.0), None);
    }

    #[test]
    fn test_new_turn_cancels_pending_stop() {
        let mut ctl = InterruptController::new();
        ctl.begin_turn("A");
        ctl.accept("A", 1000.0, 100.0, 0.0);
        assert!(ctl.has_pending_stop());

        ctl.begin_turn("B");
        assert!(!ctl.has_pending_stop());
        assert!(!ctl.is_interrupted());
        assert_eq!(ctl.poll(100.0), None);
    }

    #[test]
    fn test_repeat_interrupt_only_moves_earlier() {
        let mut ctl = InterruptController::new();
        ctl.begin_turn("A");
        ctl.accept("A", 800.0, 100.0, 0.0);
        assert_eq!(ctl.accept("A", 900.0, 150.0, 0.05), None);

        let earlier = ctl.accept("A", 400.0, 150.0, 0.05).unwrap();
        assert_eq!(earlier.decision, StopDecision::After(250.0));
        assert_eq!(ctl.cutoff_ms(), Some(400.0));
    }
}
