//! Player Sessions and Permission Groups
//!
//! Per-player bookkeeping for a multiplayer park: who is connected, which
//! permission group they belong to, and running action statistics. Only
//! the server mutates these after a top-level command commits; clients
//! mirror the list the server broadcasts.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::money::Money;
use crate::game::command::CommandKind;

/// Player identifier. The server host is always player 0.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub u8);

impl PlayerId {
    /// The hosting player (and the only player when offline).
    pub const HOST: PlayerId = PlayerId(0);
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Permission group identifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(pub u8);

impl GroupId {
    /// Full permissions.
    pub const ADMIN: GroupId = GroupId(0);
    /// Default group for joining players.
    pub const GUEST: GroupId = GroupId(1);
}

/// A named permission set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerGroup {
    /// Group id
    pub id: GroupId,
    /// Display name
    pub name: String,
    /// Command kinds members may issue
    pub allowed: BTreeSet<CommandKind>,
    /// Members may place scenery clusters (exempt from the scenery cooldown)
    pub scenery_cluster: bool,
}

impl PlayerGroup {
    /// Group that may do everything.
    pub fn admin() -> Self {
        Self {
            id: GroupId::ADMIN,
            name: "Admin".into(),
            allowed: CommandKind::ALL.iter().copied().collect(),
            scenery_cluster: true,
        }
    }

    /// Group for ordinary joining players.
    pub fn guest() -> Self {
        const RESTRICTED: [CommandKind; 5] = [
            CommandKind::SetPlayerGroup,
            CommandKind::ModifyGroups,
            CommandKind::KickPlayer,
            CommandKind::Cheat,
            CommandKind::EditScenarioOptions,
        ];
        Self {
            id: GroupId::GUEST,
            name: "Guest".into(),
            allowed: CommandKind::ALL
                .iter()
                .copied()
                .filter(|kind| !RESTRICTED.contains(kind))
                .collect(),
            scenery_cluster: false,
        }
    }

    /// True if members may issue `kind`.
    pub fn can_perform(&self, kind: CommandKind) -> bool {
        self.allowed.contains(&kind)
    }
}

/// Per-player statistics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSession {
    /// Player id
    pub id: PlayerId,
    /// Display name
    pub name: String,
    /// Permission group
    pub group: GroupId,
    /// Last committed command
    pub last_action: Option<CommandKind>,
    /// Wall-clock time of the last committed command
    pub last_action_time_ms: u64,
    /// Total committed spend
    pub money_spent: Money,
    /// Committed command count
    pub commands_ran: u32,
    /// Last measured round trip
    pub ping_ms: u32,
    /// Last committed scenery placement
    pub last_place_scenery_ms: Option<u64>,
    /// Last committed ride demolition
    pub last_demolish_ride_ms: Option<u64>,
}

impl PlayerSession {
    /// Fresh session with no history.
    pub fn new(id: PlayerId, name: impl Into<String>, group: GroupId) -> Self {
        Self {
            id,
            name: name.into(),
            group,
            last_action: None,
            last_action_time_ms: 0,
            money_spent: 0,
            commands_ran: 0,
            ping_ms: 0,
            last_place_scenery_ms: None,
            last_demolish_ride_ms: None,
        }
    }
}

/// Per-kind rate limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cooldowns {
    /// Minimum gap between scenery placements
    pub place_scenery_ms: u64,
    /// Minimum gap between ride demolitions
    pub demolish_ride_ms: u64,
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No free player slot.
    #[error("Server is full")]
    SessionFull,

    /// Player not found.
    #[error("Player not found")]
    PlayerNotFound,

    /// Player's group lacks the permission.
    #[error("Permission denied")]
    PermissionDenied,

    /// Command repeated inside its cooldown.
    #[error("Action rate limited")]
    RateLimited,
}

/// Everyone in the session plus the permission groups.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerList {
    players: BTreeMap<PlayerId, PlayerSession>,
    groups: BTreeMap<GroupId, PlayerGroup>,
    default_group: GroupId,
    max_players: usize,
}

impl PlayerList {
    /// Empty list with the Admin and Guest groups.
    pub fn new(max_players: usize) -> Self {
        let mut groups = BTreeMap::new();
        groups.insert(GroupId::ADMIN, PlayerGroup::admin());
        groups.insert(GroupId::GUEST, PlayerGroup::guest());
        Self {
            players: BTreeMap::new(),
            groups,
            default_group: GroupId::GUEST,
            max_players,
        }
    }

    /// Add a player at a specific id (host, or a mirrored server entry).
    pub fn insert(&mut self, session: PlayerSession) {
        self.players.insert(session.id, session);
    }

    /// Add a joining player at the lowest free id.
    pub fn add_player(&mut self, name: &str) -> Result<PlayerId, SessionError> {
        if self.players.len() >= self.max_players {
            return Err(SessionError::SessionFull);
        }
        let id = (0..=u8::MAX)
            .map(PlayerId)
            .find(|id| !self.players.contains_key(id))
            .ok_or(SessionError::SessionFull)?;
        let name = self.unique_name(name);
        self.players
            .insert(id, PlayerSession::new(id, name, self.default_group));
        Ok(id)
    }

    fn unique_name(&self, requested: &str) -> String {
        let base = if requested.trim().is_empty() { "Player" } else { requested.trim() };
        let taken = |candidate: &str| self.players.values().any(|p| p.name == candidate);
        if !taken(base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{base} #{n}"))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /// Remove a player.
    pub fn remove(&mut self, id: PlayerId) -> Option<PlayerSession> {
        self.players.remove(&id)
    }

    /// Look up a player.
    pub fn get(&self, id: PlayerId) -> Option<&PlayerSession> {
        self.players.get(&id)
    }

    /// Look up a player mutably.
    pub fn get_mut(&mut self, id: PlayerId) -> Option<&mut PlayerSession> {
        self.players.get_mut(&id)
    }

    /// Players in id order.
    pub fn iter(&self) -> impl Iterator<Item = &PlayerSession> {
        self.players.values()
    }

    /// Number of players.
    pub(crate) fn len(&self) -> usize {
        self.players.len()
    }

    /// Replace the player table with the server's copy.
    pub fn replace_players(&mut self, players: Vec<PlayerSession>) {
        self.players = players.into_iter().map(|p| (p.id, p)).collect();
    }

    /// Move a player to another group.
    pub fn set_group(&mut self, id: PlayerId, group: GroupId) -> Result<(), SessionError> {
        if !self.groups.contains_key(&group) {
            return Err(SessionError::PermissionDenied);
        }
        let player = self.players.get_mut(&id).ok_or(SessionError::PlayerNotFound)?;
        player.group = group;
        Ok(())
    }

    /// A player's group.
    pub fn group_of(&self, id: PlayerId) -> Option<&PlayerGroup> {
        self.players.get(&id).and_then(|p| self.groups.get(&p.group))
    }

    /// Check group permission and per-kind cooldowns for a remote command.
    pub fn check_command(
        &self,
        id: PlayerId,
        kind: CommandKind,
        now_ms: u64,
        cooldowns: Cooldowns,
    ) -> Result<(), SessionError> {
        let player = self.players.get(&id).ok_or(SessionError::PlayerNotFound)?;
        let group = self
            .groups
            .get(&player.group)
            .ok_or(SessionError::PermissionDenied)?;
        if !group.can_perform(kind) {
            return Err(SessionError::PermissionDenied);
        }

        let within = |last: Option<u64>, gap: u64| {
            last.is_some_and(|at| now_ms.saturating_sub(at) < gap)
        };
        match kind {
            CommandKind::PlaceScenery
                if !group.scenery_cluster
                    && within(player.last_place_scenery_ms, cooldowns.place_scenery_ms) =>
            {
                Err(SessionError::RateLimited)
            }
            CommandKind::DemolishRide
                if within(player.last_demolish_ride_ms, cooldowns.demolish_ride_ms) =>
            {
                Err(SessionError::RateLimited)
            }
            _ => Ok(()),
        }
    }

    /// Record a committed top-level command.
    pub fn record_action(&mut self, id: PlayerId, kind: CommandKind, cost: Money, now_ms: u64) {
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        player.last_action = Some(kind);
        player.last_action_time_ms = now_ms;
        player.money_spent = player.money_spent.saturating_add(cost);
        player.commands_ran = player.commands_ran.saturating_add(1);
        match kind {
            CommandKind::PlaceScenery => player.last_place_scenery_ms = Some(now_ms),
            CommandKind::DemolishRide => player.last_demolish_ride_ms = Some(now_ms),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWNS: Cooldowns = Cooldowns {
        place_scenery_ms: 20,
        demolish_ride_ms: 1000,
    };

    fn list_with_guest() -> (PlayerList, PlayerId) {
        let mut list = PlayerList::new(4);
        list.insert(PlayerSession::new(PlayerId::HOST, "Host", GroupId::ADMIN));
        let guest = list.add_player("Ann").unwrap();
        (list, guest)
    }

    #[test]
    fn test_add_player_assigns_lowest_free_id() {
        let (mut list, guest) = list_with_guest();
        assert_eq!(guest, PlayerId(1));
        let second = list.add_player("Bob").unwrap();
        assert_eq!(second, PlayerId(2));
        list.remove(guest);
        assert_eq!(list.add_player("Cat").unwrap(), PlayerId(1));
    }

    #[test]
    fn test_session_full() {
        let mut list = PlayerList::new(1);
        list.add_player("Ann").unwrap();
        assert_eq!(list.add_player("Bob"), Err(SessionError::SessionFull));
    }

    #[test]
    fn test_duplicate_names_are_suffixed() {
        let (mut list, _) = list_with_guest();
        let id = list.add_player("Ann").unwrap();
        assert_eq!(list.get(id).unwrap().name, "Ann #2");
    }

    #[test]
    fn test_guest_permissions() {
        let (list, guest) = list_with_guest();
        assert_eq!(
            list.check_command(guest, CommandKind::KickPlayer, 0, COOLDOWNS),
            Err(SessionError::PermissionDenied)
        );
        assert!(list.check_command(guest, CommandKind::PlaceScenery, 0, COOLDOWNS).is_ok());
        assert!(list.check_command(PlayerId::HOST, CommandKind::KickPlayer, 0, COOLDOWNS).is_ok());
        assert_eq!(
            list.check_command(PlayerId(9), CommandKind::PlaceScenery, 0, COOLDOWNS),
            Err(SessionError::PlayerNotFound)
        );
    }

    #[test]
    fn test_cooldowns() {
        let (mut list, guest) = list_with_guest();
        list.record_action(guest, CommandKind::DemolishRide, -500, 10_000);
        assert_eq!(
            list.check_command(guest, CommandKind::DemolishRide, 10_500, COOLDOWNS),
            Err(SessionError::RateLimited)
        );
        assert!(list.check_command(guest, CommandKind::DemolishRide, 11_000, COOLDOWNS).is_ok());

        list.record_action(guest, CommandKind::PlaceScenery, 30, 20_000);
        assert_eq!(
            list.check_command(guest, CommandKind::PlaceScenery, 20_010, COOLDOWNS),
            Err(SessionError::RateLimited)
        );

        // Admins may place clusters
        list.record_action(PlayerId::HOST, CommandKind::PlaceScenery, 30, 20_000);
        assert!(list.check_command(PlayerId::HOST, CommandKind::PlaceScenery, 20_001, COOLDOWNS).is_ok());
    }

    #[test]
    fn test_record_action_stats() {
        let (mut list, guest) = list_with_guest();
        list.record_action(guest, CommandKind::CreateRide, 400, 5);
        list.record_action(guest, CommandKind::DemolishRide, -100, 9);
        let player = list.get(guest).unwrap();
        assert_eq!(player.last_action, Some(CommandKind::DemolishRide));
        assert_eq!(player.money_spent, 300);
        assert_eq!(player.commands_ran, 2);
        assert_eq!(player.last_action_time_ms, 9);
    }

    #[test]
    fn test_set_group() {
        let (mut list, guest) = list_with_guest();
        list.set_group(guest, GroupId::ADMIN).unwrap();
        assert!(list.group_of(guest).unwrap().scenery_cluster);
        assert_eq!(list.set_group(guest, GroupId(7)), Err(SessionError::PermissionDenied));
    }
}
