//! Player-facing enums: teams, tools, classes and chat scopes.

use crate::wire_enum::wire_enum;

wire_enum! {
    /// Team membership.
    pub enum PlayerTeam {
        /// Not yet on a team.
        None = 0,
        /// Red team.
        Red = 1,
        /// Blue team.
        Blue = 2,
    }
}

impl Default for PlayerTeam {
    fn default() -> Self {
        PlayerTeam::None
    }
}

impl PlayerTeam {
    /// Chat scope that addresses only this team.
    pub const fn team_chat(self) -> Option<ChatKind> {
        match self {
            PlayerTeam::Red => Some(ChatKind::SayRedTeam),
            PlayerTeam::Blue => Some(ChatKind::SayBlueTeam),
            PlayerTeam::None => None,
        }
    }
}

wire_enum! {
    /// Tool held by a player.
    pub enum PlayerTool {
        /// Digging tool.
        Pickaxe = 0,
        /// Places blocks.
        ConstructionGun = 1,
        /// Removes team blocks.
        DeconstructionGun = 2,
        /// Detects ore.
        ProspectingRadar = 3,
        /// Triggers placed explosives.
        Detonator = 4,
    }
}

impl Default for PlayerTool {
    fn default() -> Self {
        PlayerTool::Pickaxe
    }
}

wire_enum! {
    /// Class chosen after joining a team.
    pub enum PlayerClass {
        /// Radar-equipped scout.
        Prospector = 0,
        /// Fast digger with large ore capacity.
        Miner = 1,
        /// Builder.
        Engineer = 2,
        /// Demolitions.
        Sapper = 3,
    }
}

wire_enum! {
    /// Audience of a chat line.
    pub enum ChatKind {
        /// Server notice.
        None = 0,
        /// Everyone.
        SayAll = 1,
        /// Red team only.
        SayRedTeam = 2,
        /// Blue team only.
        SayBlueTeam = 3,
    }
}

impl ChatKind {
    /// Whether a member of `team` should see a line of this kind.
    pub const fn visible_to(self, team: PlayerTeam) -> bool {
        match self {
            ChatKind::None | ChatKind::SayAll => true,
            ChatKind::SayRedTeam => matches!(team, PlayerTeam::Red),
            ChatKind::SayBlueTeam => matches!(team, PlayerTeam::Blue),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn team_chat_is_scoped() {
        assert!(ChatKind::SayRedTeam.visible_to(PlayerTeam::Red));
        assert!(!ChatKind::SayRedTeam.visible_to(PlayerTeam::Blue));
        assert!(ChatKind::SayAll.visible_to(PlayerTeam::None));
        assert_eq!(PlayerTeam::None.team_chat(), None);
    }

    #[test]
    fn unknown_discriminants_are_rejected() {
        assert_eq!(PlayerTool::from_u8(5), None);
        assert_eq!(PlayerClass::from_u8(3), Some(PlayerClass::Sapper));
        assert_eq!(PlayerTeam::from_u8(200), None);
    }
}
