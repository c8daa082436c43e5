//! Multiplayer client driver.
//!
//! Owns the session, world sync, remote entities and per-connection HUD
//! state. Collaborators (block engine, event sink, local player) are passed
//! in per call so nothing here is global.

use crate::phase::{ClientPhase, PhaseInput};
use deepmine_core::{
    BlockPos, BlockType, ChatKind, GameTime, PlayerClass, PlayerTeam, PlayerTool, Sound,
};
use deepmine_net::discovery::{discover, DiscoveryConfig, ServerInfo};
use deepmine_net::world_sync::BlockChange;
use deepmine_net::{
    decode_server_message, encode_client_message, select_client_channel, truncate_chars,
    BeaconMap, BlockStore, ChatLog, ClientMessage, EventSink, GameEvent, Handshake, PlayerId,
    PlayerState, RemoteEntity, ResourceTotals, SendThrottle, ServerMessage, Session,
    SessionError, SessionTransition, Transport, TransportError, TransportEvent, WorldSync,
    MAX_CHAT_LEN,
};
use glam::Vec3;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::{debug, info, instrument, trace, warn};

/// Construction gun animation values at or below this also click the radar.
const GUN_CLICK_THRESHOLD: f32 = -0.1;

/// Failure to start a client operation.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Operation not valid for the session.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Transport refused to start.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Gameplay-side view of the local player.
pub trait LocalPlayer {
    /// Current motion state, or `None` while not in the world.
    fn state(&self) -> Option<PlayerState>;

    /// A block changed next to the player's body; hazards need re-checking.
    fn on_nearby_block_change(&mut self, change: &BlockChange);
}

/// No local player; nothing is reported and hazards are ignored.
impl LocalPlayer for () {
    fn state(&self) -> Option<PlayerState> {
        None
    }

    fn on_nearby_block_change(&mut self, _change: &BlockChange) {}
}

/// Client half of a deepmine session.
pub struct MultiplayerClient<T: Transport> {
    transport: T,
    handle: String,
    session: Session,
    phase: ClientPhase,
    world: WorldSync,
    entities: BTreeMap<PlayerId, RemoteEntity>,
    my_id: Option<PlayerId>,
    team: PlayerTeam,
    class: Option<PlayerClass>,
    alive: bool,
    score: u32,
    resources: ResourceTotals,
    beacons: BeaconMap,
    chat: ChatLog,
    throttle: SendThrottle,
    clock: GameTime,
}

impl<T: Transport> MultiplayerClient<T> {
    /// Client using `transport`, introducing itself as `handle`.
    pub fn new(transport: T, handle: impl Into<String>) -> Self {
        Self::with_map_size(transport, handle, deepmine_core::DEFAULT_MAP_SIZE)
    }

    /// Client for a world of edge `map_size`.
    pub fn with_map_size(transport: T, handle: impl Into<String>, map_size: usize) -> Self {
        Self {
            transport,
            handle: handle.into(),
            session: Session::new(),
            phase: ClientPhase::Title,
            world: WorldSync::new(map_size),
            entities: BTreeMap::new(),
            my_id: None,
            team: PlayerTeam::None,
            class: None,
            alive: false,
            score: 0,
            resources: ResourceTotals::default(),
            beacons: BeaconMap::new(),
            chat: ChatLog::default(),
            throttle: SendThrottle::default(),
            clock: 0.0,
        }
    }

    /// Current screen.
    pub fn phase(&self) -> ClientPhase {
        self.phase
    }

    /// Session state.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// World sync state.
    pub fn world(&self) -> &WorldSync {
        &self.world
    }

    /// Other players by id.
    pub fn entities(&self) -> &BTreeMap<PlayerId, RemoteEntity> {
        &self.entities
    }

    /// One other player.
    pub fn entity(&self, id: PlayerId) -> Option<&RemoteEntity> {
        self.entities.get(&id)
    }

    /// Id the host assigned to this client.
    pub fn my_id(&self) -> Option<PlayerId> {
        self.my_id
    }

    /// Local team.
    pub fn team(&self) -> PlayerTeam {
        self.team
    }

    /// Local class, once chosen.
    pub fn class(&self) -> Option<PlayerClass> {
        self.class
    }

    /// Whether the local player is alive.
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Local score.
    pub fn score(&self) -> u32 {
        self.score
    }

    /// Latest resource totals.
    pub fn resources(&self) -> &ResourceTotals {
        &self.resources
    }

    /// Known beacons.
    pub fn beacons(&self) -> &BeaconMap {
        &self.beacons
    }

    /// Chat history.
    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    /// Local clock in seconds.
    pub fn clock(&self) -> GameTime {
        self.clock
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn fresh_session(&mut self) {
        if self.session.state() == deepmine_net::SessionState::Disconnected {
            self.session = Session::new();
        }
    }

    fn advance(&mut self, input: PhaseInput) {
        let next = self.phase.next(input);
        if next != self.phase {
            debug!(from = ?self.phase, to = ?next, "phase change");
            self.phase = next;
        }
    }

    /// Open the host list without searching.
    pub fn open_browser(&mut self) {
        self.advance(PhaseInput::Browse);
    }

    /// Search for hosts on the LAN and in the directory.
    pub async fn browse(&mut self, config: &DiscoveryConfig) -> Result<Vec<ServerInfo>, ClientError> {
        self.fresh_session();
        self.session.begin_discovery()?;
        self.advance(PhaseInput::Browse);
        let servers = discover(config).await;
        self.session.finish_discovery()?;
        Ok(servers)
    }

    /// Start joining the host at `endpoint`.
    pub fn join(&mut self, endpoint: SocketAddr) -> Result<(), ClientError> {
        self.fresh_session();
        self.session.begin_connect(endpoint)?;
        self.world.begin_transfer();
        let handshake = Handshake::new(self.handle.clone());
        if let Err(err) = self.transport.connect(endpoint, &handshake) {
            self.session.disconnect("transport failed to start");
            return Err(err.into());
        }
        self.advance(PhaseInput::Join);
        Ok(())
    }

    /// Leave the current host. Repeated calls are no-ops.
    pub fn disconnect(&mut self, reason: &str) {
        if self.session.disconnect(reason) {
            self.transport.disconnect(reason);
            self.advance(PhaseInput::Disconnected);
        }
    }

    /// One local tick: send the throttled player update, drain the
    /// transport and step every remote entity.
    #[instrument(level = "trace", skip_all)]
    pub fn update(
        &mut self,
        dt: GameTime,
        sink: &mut impl EventSink,
        store: &mut impl BlockStore,
        player: &mut impl LocalPlayer,
    ) {
        self.clock += dt;

        if self.throttle.tick(dt) && self.phase.in_world() && self.alive {
            if let Some(state) = player.state() {
                self.send(ClientMessage::PlayerUpdate(state));
            }
        }

        while let Some(event) = self.transport.read() {
            self.handle_transport_event(event, sink, store, player);
        }

        for entity in self.entities.values_mut() {
            entity.step(self.clock, dt);
        }
        self.chat.tick(dt);
    }

    fn handle_transport_event(
        &mut self,
        event: TransportEvent,
        sink: &mut impl EventSink,
        store: &mut impl BlockStore,
        player: &mut impl LocalPlayer,
    ) {
        match event {
            TransportEvent::StatusChanged(status) => match self.session.on_status(status) {
                SessionTransition::Established => self.reset_derived(store),
                SessionTransition::Lost => {
                    sink.emit(GameEvent::Disconnected {
                        reason: "connection lost".to_string(),
                    });
                    self.advance(PhaseInput::Disconnected);
                }
                SessionTransition::Rejected(_) | SessionTransition::Unchanged => {}
            },
            TransportEvent::Rejected(reason) => {
                if let SessionTransition::Rejected(reason) = self.session.on_rejected(reason) {
                    self.transport.disconnect("rejected");
                    sink.emit(GameEvent::Rejected(reason));
                    self.advance(PhaseInput::Disconnected);
                }
            }
            TransportEvent::Data(bytes) => {
                if !self.session.is_connected() {
                    trace!(len = bytes.len(), "data outside a session");
                    return;
                }
                match decode_server_message(&bytes) {
                    Ok(msg) => self.dispatch(msg, sink, store, player),
                    Err(err) => warn!("skipping malformed message: {err}"),
                }
            }
        }
    }

    /// Drop every piece of state derived from a previous connection.
    fn reset_derived(&mut self, store: &mut impl BlockStore) {
        info!("session established; resetting world and players");
        self.world.reset(store);
        self.entities.clear();
        self.beacons.clear();
        self.chat.clear();
        self.my_id = None;
        self.team = PlayerTeam::None;
        self.class = None;
        self.alive = false;
        self.score = 0;
        self.resources = ResourceTotals::default();
        self.throttle = SendThrottle::default();
    }

    fn dispatch(
        &mut self,
        msg: ServerMessage,
        sink: &mut impl EventSink,
        store: &mut impl BlockStore,
        player: &mut impl LocalPlayer,
    ) {
        match msg {
            ServerMessage::BlockBulkTransfer(column) => match self.world.apply_bulk(&column, store) {
                Ok(true) => {
                    sink.emit(GameEvent::WorldReady);
                    self.advance(PhaseInput::WorldReady);
                }
                Ok(false) => {}
                Err(err) => warn!("skipping bulk column: {err}"),
            },
            ServerMessage::BlockSet { x, y, z, block } => {
                let pos = BlockPos::new(x.into(), y.into(), z.into());
                let eye = player
                    .state()
                    .filter(|_| self.alive)
                    .map(|state| state.position);
                match self.world.apply_block_set(pos, block, store, eye) {
                    Ok(change) if change.near_player => player.on_nearby_block_change(&change),
                    Ok(_) => {}
                    Err(err) => warn!("skipping block set: {err}"),
                }
            }
            ServerMessage::ResourceUpdate(totals) => {
                self.resources = totals;
                sink.emit(GameEvent::Resources(totals));
            }
            ServerMessage::TriggerExplosion { position } => {
                sink.emit(GameEvent::Explosion { position });
            }
            ServerMessage::PlayerUpdate {
                player_id,
                state,
                score_hundreds,
            } => {
                if Some(player_id) == self.my_id {
                    self.score = u32::from(score_hundreds) * 100;
                } else if let Some(entity) = self.entities.get_mut(&player_id) {
                    let changes = entity.apply_update(&state, score_hundreds, self.clock);
                    if !changes.is_empty() {
                        sink.emit(GameEvent::EntityChanged { player_id, changes });
                    }
                } else {
                    debug!(player_id, "update for unknown player");
                }
            }
            ServerMessage::PlayerJoined {
                player_id,
                name,
                this_is_me,
                alive,
            } => {
                if this_is_me {
                    info!(player_id, "host assigned our id");
                    self.my_id = Some(player_id);
                    self.alive = alive;
                } else {
                    self.entities
                        .insert(player_id, RemoteEntity::new(player_id, name.clone(), alive));
                }
                sink.emit(GameEvent::PlayerJoined { player_id, name });
            }
            ServerMessage::PlayerLeft { player_id } => {
                if let Some(entity) = self.entities.remove(&player_id) {
                    sink.emit(GameEvent::PlayerLeft {
                        player_id,
                        name: entity.name,
                    });
                }
            }
            ServerMessage::PlayerSetTeam { player_id, team } => {
                if Some(player_id) == self.my_id {
                    self.team = team;
                } else if let Some(entity) = self.entities.get_mut(&player_id) {
                    let changes = entity.set_team(team);
                    if !changes.is_empty() {
                        sink.emit(GameEvent::EntityChanged { player_id, changes });
                    }
                }
            }
            ServerMessage::PlayerDead { player_id } => {
                let is_self = Some(player_id) == self.my_id;
                let (position, team) = if is_self {
                    self.alive = false;
                    let position = player.state().map(|s| s.position).unwrap_or(Vec3::ZERO);
                    (position, self.team)
                } else if let Some(entity) = self.entities.get_mut(&player_id) {
                    entity.alive = false;
                    (entity.position, entity.team)
                } else {
                    debug!(player_id, "death of unknown player");
                    return;
                };
                sink.emit(GameEvent::PlayerDied {
                    player_id,
                    position,
                    team,
                    is_self,
                });
                if !is_self {
                    sink.emit(GameEvent::Sound {
                        sound: Sound::Death,
                        position: Some(position),
                    });
                }
            }
            ServerMessage::PlayerAlive { player_id } => {
                if Some(player_id) == self.my_id {
                    self.alive = true;
                } else if let Some(entity) = self.entities.get_mut(&player_id) {
                    entity.alive = true;
                }
            }
            ServerMessage::PlayerPing { player_id } => {
                if let Some(entity) = self.entities.get_mut(&player_id) {
                    if entity.team == self.team && self.team != PlayerTeam::None {
                        entity.ping();
                        sink.emit(GameEvent::Ping { player_id });
                    }
                }
            }
            ServerMessage::ChatMessage { kind, text } => {
                self.chat.push(kind, text.clone());
                sink.emit(GameEvent::Chat { kind, text });
            }
            ServerMessage::GameOver { winner } => {
                sink.emit(GameEvent::GameOver { winner });
            }
            ServerMessage::PlaySound { sound, position } => {
                sink.emit(GameEvent::Sound { sound, position });
            }
            ServerMessage::TriggerConstructionGunAnimation { value } => {
                sink.emit(GameEvent::ConstructionGunAnimation { value });
                if value <= GUN_CLICK_THRESHOLD {
                    sink.emit(GameEvent::Sound {
                        sound: Sound::RadarSwitch,
                        position: None,
                    });
                }
            }
            ServerMessage::SetBeacon {
                position,
                text,
                team,
            } => {
                if let Some(event) = self.beacons.apply(position, &text, team) {
                    sink.emit(event);
                }
            }
            ServerMessage::VibrateGamepad {
                strength,
                duration_ms,
            } => {
                sink.emit(GameEvent::VibrateGamepad {
                    strength,
                    duration_ms,
                });
            }
        }
    }

    fn send(&mut self, msg: ClientMessage) {
        if !self.session.is_connected() {
            debug!(kind = ?msg.kind(), "not connected; dropping message");
            return;
        }
        match encode_client_message(&msg) {
            Ok(bytes) => self.transport.send(bytes, select_client_channel(&msg)),
            Err(err) => warn!("failed to encode {:?}: {err}", msg.kind()),
        }
    }

    /// Send a chat line to everyone, or only to the local team.
    pub fn send_chat(&mut self, text: &str, team_only: bool) {
        let text = truncate_chars(text.trim(), MAX_CHAT_LEN);
        if text.is_empty() {
            return;
        }
        let kind = if team_only {
            self.team.team_chat().unwrap_or(ChatKind::SayAll)
        } else {
            ChatKind::SayAll
        };
        self.send(ClientMessage::ChatMessage {
            kind,
            text: text.to_string(),
        });
    }

    /// Ask to join `team`.
    pub fn select_team(&mut self, team: PlayerTeam) {
        self.team = team;
        self.send(ClientMessage::PlayerSetTeam { team });
        self.advance(PhaseInput::TeamChosen);
    }

    /// Choose a class.
    pub fn select_class(&mut self, class: PlayerClass) {
        self.class = Some(class);
        self.send(ClientMessage::SelectClass { class });
        self.advance(PhaseInput::ClassChosen);
    }

    /// Reopen team selection.
    pub fn change_team(&mut self) {
        self.advance(PhaseInput::ChangeTeam);
    }

    /// Reopen class selection.
    pub fn change_class(&mut self) {
        self.advance(PhaseInput::ChangeClass);
    }

    /// Use `tool` from the given vantage point.
    pub fn use_tool(&mut self, state: &PlayerState, tool: PlayerTool, block: BlockType) {
        self.send(ClientMessage::UseTool {
            position: state.position,
            heading: state.heading,
            tool,
            block,
        });
    }

    /// Deposit carried ore.
    pub fn deposit_ore(&mut self) {
        self.send(ClientMessage::DepositOre);
    }

    /// Deposit carried cash.
    pub fn deposit_cash(&mut self) {
        self.send(ClientMessage::DepositCash);
    }

    /// Withdraw banked ore.
    pub fn withdraw_ore(&mut self) {
        self.send(ClientMessage::WithdrawOre);
    }

    /// Report the local player's death.
    pub fn report_death(&mut self, reason: &str) {
        self.alive = false;
        self.send(ClientMessage::PlayerDead {
            reason: reason.to_string(),
        });
    }

    /// Report the local player's respawn.
    pub fn report_alive(&mut self) {
        self.alive = true;
        self.send(ClientMessage::PlayerAlive);
    }

    /// Ping teammates.
    pub fn ping_team(&mut self) {
        self.send(ClientMessage::PlayerPing);
    }

    /// Relay a positional sound to other players.
    pub fn play_sound(&mut self, sound: Sound, position: Vec3) {
        self.send(ClientMessage::PlaySound { sound, position });
    }
}
