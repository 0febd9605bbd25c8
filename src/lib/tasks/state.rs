use super::types::State;

fn transitions(src: State) -> &'static [State] {
    match src {
        State::Pending => &[State::Scheduled, State::Failed],
        State::Scheduled => &[State::Scheduled, State::Running, State::Failed],
        State::Running => &[State::Running, State::Completed, State::Failed],
        State::Completed | State::Failed => &[],
    }
}

pub fn valid_state_transition(src: State, dst: State) -> bool {
    transitions(src).contains(&dst)
}

impl State {
    /// Terminal states have no outbound edges.
    pub fn is_terminal(self) -> bool {
        transitions(self).is_empty()
    }
}
