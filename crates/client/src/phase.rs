//! Screen flow as a closed state machine.

/// Which screen the client is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClientPhase {
    /// Start screen.
    #[default]
    Title,
    /// Host list.
    ServerBrowser,
    /// Connected, downloading the world.
    Loading,
    /// Picking a team.
    TeamSelection,
    /// Picking a class.
    ClassSelection,
    /// In the world.
    Playing,
}

/// Input driving [`ClientPhase::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseInput {
    /// Open the host list.
    Browse,
    /// Start joining a host.
    Join,
    /// World download finished.
    WorldReady,
    /// Team picked.
    TeamChosen,
    /// Class picked.
    ClassChosen,
    /// Reopen team selection from the game.
    ChangeTeam,
    /// Reopen class selection from the game.
    ChangeClass,
    /// Session ended (rejected, lost or closed).
    Disconnected,
    /// Back to the start screen.
    Quit,
}

impl ClientPhase {
    /// Phase after `input`. Inputs that make no sense in the current phase
    /// leave it unchanged.
    pub fn next(self, input: PhaseInput) -> ClientPhase {
        use ClientPhase::*;
        match (self, input) {
            (_, PhaseInput::Quit) => Title,
            (Title, PhaseInput::Browse) => ServerBrowser,
            (Title | ServerBrowser, PhaseInput::Join) => Loading,
            (Loading, PhaseInput::WorldReady) => TeamSelection,
            (TeamSelection, PhaseInput::TeamChosen) => ClassSelection,
            (ClassSelection, PhaseInput::ClassChosen) => Playing,
            (Playing | ClassSelection, PhaseInput::ChangeTeam) => TeamSelection,
            (Playing, PhaseInput::ChangeClass) => ClassSelection,
            (Title, PhaseInput::Disconnected) => Title,
            (_, PhaseInput::Disconnected) => ServerBrowser,
            (phase, _) => phase,
        }
    }

    /// Whether the local player is in the world.
    pub fn in_world(self) -> bool {
        self == ClientPhase::Playing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_join_flow() {
        let inputs = [
            PhaseInput::Browse,
            PhaseInput::Join,
            PhaseInput::WorldReady,
            PhaseInput::TeamChosen,
            PhaseInput::ClassChosen,
        ];
        let phases: Vec<_> = inputs
            .iter()
            .scan(ClientPhase::Title, |phase, input| {
                *phase = phase.next(*input);
                Some(*phase)
            })
            .collect();
        assert_eq!(
            phases,
            vec![
                ClientPhase::ServerBrowser,
                ClientPhase::Loading,
                ClientPhase::TeamSelection,
                ClientPhase::ClassSelection,
                ClientPhase::Playing,
            ]
        );
    }

    #[test]
    fn disconnect_returns_to_browser() {
        for phase in [
            ClientPhase::Loading,
            ClientPhase::TeamSelection,
            ClientPhase::ClassSelection,
            ClientPhase::Playing,
        ] {
            assert_eq!(
                phase.next(PhaseInput::Disconnected),
                ClientPhase::ServerBrowser
            );
        }
    }

    #[test]
    fn out_of_order_inputs_are_ignored() {
        assert_eq!(
            ClientPhase::Loading.next(PhaseInput::ClassChosen),
            ClientPhase::Loading
        );
        assert_eq!(
            ClientPhase::Title.next(PhaseInput::WorldReady),
            ClientPhase::Title
        );
        assert_eq!(
            ClientPhase::Playing.next(PhaseInput::ChangeTeam),
            ClientPhase::TeamSelection
        );
    }
}
