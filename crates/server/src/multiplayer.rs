//! Authoritative host: world grid, player table and message relay.

use deepmine_core::{
    BlockGrid, BlockPos, BlockType, ChatKind, PlayerClass, PlayerTeam, Sound, DEFAULT_MAP_SIZE,
};
use deepmine_net::discovery::{LanAnnouncement, DIRECTORY_PROTOCOL_TAG};
use deepmine_net::{
    decode_client_message, encode_server_message, select_server_channel, truncate_chars,
    BeaconMap, BlockColumn, ClientMessage, Handshake, HostEvent, HostTransport, PeerId, PlayerId,
    PlayerState, RejectReason, ResourceTotals, ServerMessage, BAND_HEIGHT, MAX_BEACON_TEXT_LEN,
    MAX_CHAT_LEN, MAX_NAME_LEN, PROTOCOL_VERSION,
};
use glam::Vec3;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tracing::{debug, info, instrument, warn};

/// Host tuning.
#[derive(Debug, Clone)]
pub struct HostSettings {
    /// Name shown in host lists.
    pub server_name: String,
    /// Player cap.
    pub max_players: usize,
    /// World edge length.
    pub map_size: usize,
    /// Free-form text shown next to the name.
    pub extra: String,
    /// Addresses refused at handshake.
    pub banned: HashSet<IpAddr>,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            server_name: "deepmine".to_string(),
            max_players: 16,
            map_size: DEFAULT_MAP_SIZE,
            extra: String::new(),
            banned: HashSet::new(),
        }
    }
}

/// Player state tracked by the host.
#[derive(Debug, Clone)]
pub struct ConnectedPlayer {
    /// Assigned id.
    pub id: PlayerId,
    /// Transport connection.
    pub peer: PeerId,
    /// Remote address.
    pub addr: SocketAddr,
    /// Display name.
    pub name: String,
    /// Team.
    pub team: PlayerTeam,
    /// Class, once chosen.
    pub class: Option<PlayerClass>,
    /// Alive flag.
    pub alive: bool,
    /// Last reported motion state.
    pub state: Option<PlayerState>,
    /// Score in hundreds, as sent on the wire.
    pub score_hundreds: u16,
}

/// Client intent the host does not resolve itself; gameplay decides.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerAction {
    /// Acting player.
    pub player_id: PlayerId,
    /// The intent as received.
    pub intent: ClientMessage,
}

/// Authoritative side of a deepmine session.
pub struct Host<T: HostTransport> {
    transport: T,
    settings: HostSettings,
    world: BlockGrid,
    beacons: BeaconMap,
    players: BTreeMap<PlayerId, ConnectedPlayer>,
    peers: HashMap<PeerId, PlayerId>,
    next_player_id: PlayerId,
    ticks: u64,
}

impl<T: HostTransport> Host<T> {
    /// Host with an empty world.
    pub fn new(transport: T, settings: HostSettings) -> Self {
        let world = BlockGrid::new(settings.map_size);
        Self {
            transport,
            settings,
            world,
            beacons: BeaconMap::new(),
            players: BTreeMap::new(),
            peers: HashMap::new(),
            next_player_id: 1,
            ticks: 0,
        }
    }

    /// Settings in effect.
    pub fn settings(&self) -> &HostSettings {
        &self.settings
    }

    /// Authoritative world.
    pub fn world(&self) -> &BlockGrid {
        &self.world
    }

    /// Authoritative world, for map generation before anyone joins.
    pub fn world_mut(&mut self) -> &mut BlockGrid {
        &mut self.world
    }

    /// Connected players by id.
    pub fn players(&self) -> &BTreeMap<PlayerId, ConnectedPlayer> {
        &self.players
    }

    /// Number of connected players.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Refuse future handshakes from `ip`.
    pub fn ban(&mut self, ip: IpAddr) {
        self.settings.banned.insert(ip);
    }

    /// LAN discovery answer describing this host.
    pub fn announcement(&self, game_port: u16) -> LanAnnouncement {
        LanAnnouncement {
            name: self.settings.server_name.clone(),
            game_port,
            current_players: self.players.len() as u32,
            max_players: self.settings.max_players as u32,
            extra: self.settings.extra.clone(),
        }
    }

    /// Public directory line for this host.
    pub fn directory_line(&self, public_ip: Ipv4Addr) -> String {
        let clean = |s: &str| s.replace([';', '\r', '\n'], " ");
        format!(
            "{};{};{};{};{};{}",
            clean(&self.settings.server_name),
            public_ip,
            DIRECTORY_PROTOCOL_TAG,
            self.players.len(),
            self.settings.max_players,
            clean(&self.settings.extra),
        )
    }

    /// Drain the transport and apply every event. Returns intents that
    /// gameplay must resolve.
    #[instrument(skip(self), fields(tick = self.ticks, player_count = self.players.len()))]
    pub fn tick(&mut self) -> Vec<PlayerAction> {
        let mut actions = Vec::new();
        while let Some(event) = self.transport.read() {
            match event {
                HostEvent::ConnectRequest {
                    peer,
                    addr,
                    handshake,
                } => self.handle_connect(peer, addr, handshake),
                HostEvent::Data { peer, bytes } => {
                    if let Some(action) = self.handle_data(peer, &bytes) {
                        actions.push(action);
                    }
                }
                HostEvent::Disconnected { peer, reason } => self.handle_disconnect(peer, &reason),
            }
        }
        self.ticks += 1;
        actions
    }

    fn validate(&self, addr: SocketAddr, handshake: &Handshake) -> Result<String, RejectReason> {
        if handshake.version != PROTOCOL_VERSION {
            return Err(RejectReason::VersionMismatch {
                server_version: PROTOCOL_VERSION.to_string(),
            });
        }
        if self.settings.banned.contains(&addr.ip()) {
            return Err(RejectReason::Banned);
        }
        if self.players.len() >= self.settings.max_players {
            return Err(RejectReason::Other("server is full".to_string()));
        }
        let name = truncate_chars(handshake.name.trim(), MAX_NAME_LEN);
        if name.is_empty() {
            return Err(RejectReason::Other("a player name is required".to_string()));
        }
        Ok(name.to_string())
    }

    fn handle_connect(&mut self, peer: PeerId, addr: SocketAddr, handshake: Handshake) {
        let name = match self.validate(addr, &handshake) {
            Ok(name) => name,
            Err(reason) => {
                warn!(%peer, %addr, %reason, "rejecting handshake");
                self.transport.reject(peer, &reason);
                return;
            }
        };

        self.transport.accept(peer);
        let id = self.next_player_id;
        self.next_player_id += 1;
        info!(%peer, %addr, id, name = %name, "player joined");

        self.send_world(peer);

        // Existing roster to the joiner.
        let roster: Vec<ServerMessage> = self
            .players
            .values()
            .flat_map(|p| {
                let mut messages = vec![
                    ServerMessage::PlayerJoined {
                        player_id: p.id,
                        name: p.name.clone(),
                        this_is_me: false,
                        alive: p.alive,
                    },
                    ServerMessage::PlayerSetTeam {
                        player_id: p.id,
                        team: p.team,
                    },
                ];
                if let Some(state) = p.state {
                    messages.push(ServerMessage::PlayerUpdate {
                        player_id: p.id,
                        state,
                        score_hundreds: p.score_hundreds,
                    });
                }
                messages
            })
            .collect();
        for msg in &roster {
            self.send_peer(peer, msg);
        }
        let beacons: Vec<ServerMessage> = self
            .beacons
            .iter()
            .map(|(pos, beacon)| ServerMessage::SetBeacon {
                position: pos.min_corner(),
                text: beacon.text.clone(),
                team: beacon.team,
            })
            .collect();
        for msg in &beacons {
            self.send_peer(peer, msg);
        }

        self.players.insert(
            id,
            ConnectedPlayer {
                id,
                peer,
                addr,
                name: name.clone(),
                team: PlayerTeam::None,
                class: None,
                alive: false,
                state: None,
                score_hundreds: 0,
            },
        );
        self.peers.insert(peer, id);

        self.send_peer(
            peer,
            &ServerMessage::PlayerJoined {
                player_id: id,
                name: name.clone(),
                this_is_me: true,
                alive: false,
            },
        );
        self.broadcast_where(
            &ServerMessage::PlayerJoined {
                player_id: id,
                name: name.clone(),
                this_is_me: false,
                alive: false,
            },
            |p| p.id != id,
        );
        self.send_chat(ChatKind::SayAll, &format!("{name} has joined the adventure!"));
    }

    fn send_world(&mut self, peer: PeerId) {
        let size = self.world.size();
        for x in 0..size.min(256) {
            for y in (0..size.min(256)).step_by(BAND_HEIGHT) {
                let mut column = BlockColumn::empty(x as u8, y as u8);
                for dy in 0..BAND_HEIGHT {
                    for z in 0..size.min(deepmine_net::COLUMN_DEPTH) {
                        let pos = BlockPos::new(x as i32, (y + dy) as i32, z as i32);
                        column.set(dy, z, self.world.get(pos));
                    }
                }
                self.send_peer(peer, &ServerMessage::BlockBulkTransfer(column));
            }
        }
        debug!(%peer, "world sent");
    }

    fn handle_data(&mut self, peer: PeerId, bytes: &[u8]) -> Option<PlayerAction> {
        let Some(&player_id) = self.peers.get(&peer) else {
            debug!(%peer, "data from unknown peer");
            return None;
        };
        let msg = match decode_client_message(bytes) {
            Ok(msg) => msg,
            Err(err) => {
                warn!(player_id, "skipping malformed message: {err}");
                return None;
            }
        };
        if let Err(err) = msg.verify() {
            warn!(player_id, "skipping invalid message: {err}");
            return None;
        }

        match msg {
            ClientMessage::PlayerUpdate(state) => {
                let score_hundreds = self.players.get_mut(&player_id).map(|p| {
                    p.state = Some(state);
                    p.score_hundreds
                })?;
                self.broadcast_where(
                    &ServerMessage::PlayerUpdate {
                        player_id,
                        state,
                        score_hundreds,
                    },
                    |p| p.id != player_id,
                );
            }
            ClientMessage::PlayerSetTeam { team } => {
                let player = self.players.get_mut(&player_id)?;
                player.team = team;
                info!(player_id, ?team, "team change");
                self.broadcast(&ServerMessage::PlayerSetTeam { player_id, team });
            }
            ClientMessage::SelectClass { class } => {
                let player = self.players.get_mut(&player_id)?;
                player.class = Some(class);
                return Some(PlayerAction {
                    player_id,
                    intent: ClientMessage::SelectClass { class },
                });
            }
            ClientMessage::ChatMessage { kind, text } => {
                let sender = self.players.get(&player_id)?;
                // Team lines always go to the sender's own team.
                let kind = match kind {
                    ChatKind::SayRedTeam | ChatKind::SayBlueTeam => {
                        sender.team.team_chat().unwrap_or(ChatKind::SayAll)
                    }
                    ChatKind::None | ChatKind::SayAll => ChatKind::SayAll,
                };
                let line =
                    truncate_chars(&format!("{}: {text}", sender.name), MAX_CHAT_LEN).to_string();
                self.send_chat(kind, &line);
            }
            ClientMessage::PlayerDead { reason } => {
                let player = self.players.get_mut(&player_id)?;
                player.alive = false;
                let name = player.name.clone();
                self.broadcast(&ServerMessage::PlayerDead { player_id });
                if !reason.is_empty() {
                    let line = truncate_chars(&format!("{name} {reason}"), MAX_CHAT_LEN).to_string();
                    self.send_chat(ChatKind::SayAll, &line);
                }
            }
            ClientMessage::PlayerAlive => {
                self.players.get_mut(&player_id)?.alive = true;
                self.broadcast(&ServerMessage::PlayerAlive { player_id });
            }
            ClientMessage::PlayerPing => {
                let team = self.players.get(&player_id)?.team;
                self.broadcast_where(&ServerMessage::PlayerPing { player_id }, |p| {
                    p.team == team && p.id != player_id
                });
            }
            ClientMessage::PlaySound { sound, position } => {
                self.broadcast_where(
                    &ServerMessage::PlaySound {
                        sound,
                        position: Some(position),
                    },
                    |p| p.id != player_id,
                );
            }
            intent @ (ClientMessage::UseTool { .. }
            | ClientMessage::DepositOre
            | ClientMessage::DepositCash
            | ClientMessage::WithdrawOre) => {
                return Some(PlayerAction { player_id, intent });
            }
        }
        None
    }

    fn handle_disconnect(&mut self, peer: PeerId, reason: &str) {
        let Some(player_id) = self.peers.remove(&peer) else {
            return;
        };
        let Some(player) = self.players.remove(&player_id) else {
            return;
        };
        info!(player_id, name = %player.name, reason, "player left");
        self.broadcast(&ServerMessage::PlayerLeft { player_id });
        self.send_chat(ChatKind::SayAll, &format!("{} has left.", player.name));
    }

    fn send_peer(&mut self, peer: PeerId, msg: &ServerMessage) {
        match encode_server_message(msg) {
            Ok(bytes) => self.transport.send(peer, bytes, select_server_channel(msg)),
            Err(err) => warn!("failed to encode {:?}: {err}", msg.kind()),
        }
    }

    fn broadcast_where(&mut self, msg: &ServerMessage, include: impl Fn(&ConnectedPlayer) -> bool) {
        let bytes = match encode_server_message(msg) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("failed to encode {:?}: {err}", msg.kind());
                return;
            }
        };
        let class = select_server_channel(msg);
        for player in self.players.values().filter(|p| include(p)) {
            self.transport.send(player.peer, bytes.clone(), class);
        }
    }

    fn broadcast(&mut self, msg: &ServerMessage) {
        self.broadcast_where(msg, |_| true);
    }

    fn send_player(&mut self, player_id: PlayerId, msg: &ServerMessage) {
        if let Some(peer) = self.players.get(&player_id).map(|p| p.peer) {
            self.send_peer(peer, msg);
        }
    }

    /// Send a chat line to everyone who can see `kind`.
    pub fn send_chat(&mut self, kind: ChatKind, text: &str) {
        let msg = ServerMessage::ChatMessage {
            kind,
            text: truncate_chars(text, MAX_CHAT_LEN).to_string(),
        };
        self.broadcast_where(&msg, |p| kind.visible_to(p.team));
    }

    /// Change one cell and tell everyone. Returns `false` for cells outside
    /// the grid.
    pub fn set_block(&mut self, pos: BlockPos, block: BlockType) -> bool {
        let Some([x, y, z]) = pos.to_bytes() else {
            return false;
        };
        if self.world.set(pos, block).is_none() {
            return false;
        }
        self.broadcast(&ServerMessage::BlockSet { x, y, z, block });
        true
    }

    /// Explosion effect at `position`.
    pub fn trigger_explosion(&mut self, position: Vec3) {
        self.broadcast(&ServerMessage::TriggerExplosion { position });
    }

    /// Place, relabel or (with empty `text`) remove a beacon.
    pub fn set_beacon(&mut self, pos: BlockPos, text: &str, team: PlayerTeam) {
        let position = pos.min_corner();
        let text = truncate_chars(text, MAX_BEACON_TEXT_LEN);
        self.beacons.apply(position, text, team);
        self.broadcast(&ServerMessage::SetBeacon {
            position,
            text: text.to_string(),
            team,
        });
    }

    /// Sound cue for everyone.
    pub fn play_sound(&mut self, sound: Sound, position: Option<Vec3>) {
        self.broadcast(&ServerMessage::PlaySound { sound, position });
    }

    /// Push resource totals to one player.
    pub fn send_resources(&mut self, player_id: PlayerId, totals: ResourceTotals) {
        self.send_player(player_id, &ServerMessage::ResourceUpdate(totals));
    }

    /// Update a player's score; it travels with their next relayed update.
    pub fn set_score(&mut self, player_id: PlayerId, score: u32) {
        if let Some(player) = self.players.get_mut(&player_id) {
            player.score_hundreds = u16::try_from(score / 100).unwrap_or(u16::MAX);
        }
    }

    /// Construction gun recoil for one player.
    pub fn construction_gun_animation(&mut self, player_id: PlayerId, value: f32) {
        self.send_player(
            player_id,
            &ServerMessage::TriggerConstructionGunAnimation { value },
        );
    }

    /// Rumble one player's gamepad.
    pub fn vibrate(&mut self, player_id: PlayerId, strength: f32, duration_ms: u32) {
        self.send_player(
            player_id,
            &ServerMessage::VibrateGamepad {
                strength,
                duration_ms,
            },
        );
    }

    /// Announce the end of the round.
    pub fn game_over(&mut self, winner: PlayerTeam) {
        info!(?winner, "game over");
        self.broadcast(&ServerMessage::GameOver { winner });
    }

    /// Drop a player.
    pub fn kick(&mut self, player_id: PlayerId, reason: &str) {
        if let Some(peer) = self.players.get(&player_id).map(|p| p.peer) {
            self.transport.disconnect(peer, reason);
            self.handle_disconnect(peer, reason);
        }
    }
}
