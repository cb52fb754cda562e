//! Session state machine (§4.4 composes the Signalling Client's own
//! state machine into a session-wide one: disconnected → connecting →
//! connected → reconnecting → closed, with reconnecting re-entering
//! connected on success or disconnected on exhaustion).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransitionResult {
    Changed,
    NotChanged,
    Rejected,
}

impl SessionState {
    pub fn check_transition(self, to: SessionState) -> SessionTransitionResult {
        use SessionState::*;
        use SessionTransitionResult::*;

        if self == to {
            return NotChanged;
        }

        let allowed = matches!(
            (self, to),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Reconnecting)
                | (Connected, Disconnected)
                | (Reconnecting, Connected)
                | (Reconnecting, Disconnected)
                | (_, Closed)
        );

        if allowed {
            Changed
        } else {
            Rejected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;
    use SessionTransitionResult::*;

    #[test]
    fn join_protocol_moves_disconnected_to_connected_via_connecting() {
        assert_eq!(Disconnected.check_transition(Connecting), Changed);
        assert_eq!(Connecting.check_transition(Connected), Changed);
    }

    #[test]
    fn connected_can_enter_reconnecting_and_return() {
        assert_eq!(Connected.check_transition(Reconnecting), Changed);
        assert_eq!(Reconnecting.check_transition(Connected), Changed);
    }

    #[test]
    fn reconnect_exhaustion_lands_on_disconnected() {
        assert_eq!(Reconnecting.check_transition(Disconnected), Changed);
    }

    #[test]
    fn any_state_can_close() {
        for state in [Disconnected, Connecting, Connected, Reconnecting] {
            assert_eq!(state.check_transition(Closed), Changed);
        }
    }

    #[test]
    fn closed_is_terminal() {
        assert_eq!(Closed.check_transition(Connecting), Rejected);
    }

    #[test]
    fn disconnected_cannot_jump_straight_to_connected() {
        assert_eq!(Disconnected.check_transition(Connected), Rejected);
    }
}
