//! UDP game server implementation.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use idle_shared::{CharacterData, CharacterId, ClientMessage, EquipSlot, ServerMessage, PROTOCOL_VERSION};

use crate::combat::{ConnectionId, EncounterEngine};
use crate::entities::player;
use crate::error::InventoryError;
use crate::persistence::{CharacterRepository, CharacterUpdate};

/// Maximum packet size
const MAX_PACKET_SIZE: usize = 1200;

/// Connection timeout in seconds
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// How often idle connections are checked
const TIMEOUT_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Client connection state
#[derive(Debug)]
pub struct ClientConnection {
    pub addr: SocketAddr,
    pub connection_id: ConnectionId,
    /// Set once a character has been selected
    pub character_id: Option<CharacterId>,
    pub last_seen: Instant,
}

impl ClientConnection {
    pub fn new(addr: SocketAddr, connection_id: ConnectionId) -> Self {
        Self {
            addr,
            connection_id,
            character_id: None,
            last_seen: Instant::now(),
        }
    }

    pub fn is_timed_out(&self) -> bool {
        self.last_seen.elapsed() > CONNECTION_TIMEOUT
    }
}

/// Game server
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: HashMap<SocketAddr, ClientConnection>,
    addr_by_connection: HashMap<ConnectionId, SocketAddr>,
    next_connection_id: ConnectionId,
    engine: EncounterEngine,
    repository: Arc<dyn CharacterRepository>,
    /// Events emitted by the engine, drained into the socket
    events: mpsc::UnboundedReceiver<(ConnectionId, ServerMessage)>,
}

impl Server {
    /// Create a new server listening on the given port
    pub async fn new(
        port: u16,
        engine: EncounterEngine,
        repository: Arc<dyn CharacterRepository>,
        events: mpsc::UnboundedReceiver<(ConnectionId, ServerMessage)>,
    ) -> Result<Self, std::io::Error> {
        let addr = format!("0.0.0.0:{}", port);
        let socket = UdpSocket::bind(&addr).await?;

        Ok(Self {
            socket: Arc::new(socket),
            clients: HashMap::new(),
            addr_by_connection: HashMap::new(),
            next_connection_id: 1,
            engine,
            repository,
            events,
        })
    }

    /// Serve until the process is stopped
    pub async fn run(&mut self) {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let mut timeout_check = tokio::time::interval(TIMEOUT_CHECK_INTERVAL);

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, addr)) => self.handle_packet(&buf[..len], addr).await,
                    Err(e) => error!("Error receiving packet: {}", e),
                },
                Some((connection, message)) = self.events.recv() => {
                    self.deliver(connection, &message).await;
                }
                _ = timeout_check.tick() => self.check_timeouts(),
            }
        }
    }

    /// Handle a received packet
    async fn handle_packet(&mut self, data: &[u8], addr: SocketAddr) {
        let message = match ClientMessage::deserialize(data) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Failed to deserialize packet from {}: {}", addr, e);
                return;
            }
        };

        // Update last seen time for known clients
        if let Some(client) = self.clients.get_mut(&addr) {
            client.last_seen = Instant::now();
        }

        match message {
            ClientMessage::SelectCharacter { protocol_version, character_id } => {
                self.handle_select_character(addr, protocol_version, character_id).await;
            }
            ClientMessage::FindMonster => {
                self.handle_find_monster(addr).await;
            }
            ClientMessage::TravelToZone { zone_id } => {
                self.handle_travel(addr, zone_id).await;
            }
            ClientMessage::EquipItem { inventory_index } => {
                self.handle_equip_item(addr, inventory_index as usize).await;
            }
            ClientMessage::UnequipItem { slot } => {
                self.handle_unequip_item(addr, slot).await;
            }
            ClientMessage::Disconnect => {
                self.handle_disconnect(addr);
            }
        }
    }

    /// Connection id and selected character for an address
    fn session(&self, addr: SocketAddr) -> Option<(ConnectionId, CharacterId)> {
        let client = self.clients.get(&addr)?;
        Some((client.connection_id, client.character_id?))
    }

    async fn handle_select_character(&mut self, addr: SocketAddr, protocol_version: u32, character_id: CharacterId) {
        if protocol_version != PROTOCOL_VERSION {
            let msg = ServerMessage::Error {
                reason: format!(
                    "Protocol version mismatch. Server: {}, Client: {}",
                    PROTOCOL_VERSION, protocol_version
                ),
            };
            self.send_to(addr, &msg).await;
            return;
        }

        let character = match self.repository.find_by_id(character_id).await {
            Ok(Some(c)) => c,
            Ok(None) => {
                let msg = ServerMessage::Error { reason: "Character not found".to_string() };
                self.send_to(addr, &msg).await;
                return;
            }
            Err(e) => {
                error!("Failed to load character {}: {}", character_id, e);
                let msg = ServerMessage::Error { reason: "Failed to load character".to_string() };
                self.send_to(addr, &msg).await;
                return;
            }
        };

        let connection_id = match self.clients.get(&addr) {
            Some(client) => client.connection_id,
            None => {
                let id = self.next_connection_id;
                self.next_connection_id += 1;
                self.clients.insert(addr, ClientConnection::new(addr, id));
                self.addr_by_connection.insert(id, addr);
                id
            }
        };

        // Switching characters ends whatever the previous one was doing
        self.engine.clear_combat_state(connection_id);
        if let Some(client) = self.clients.get_mut(&addr) {
            client.character_id = Some(character_id);
        }

        info!(
            "Character '{}' ({}) selected on connection {} from {}",
            character.name, character_id, connection_id, addr
        );
        let msg = ServerMessage::CharacterSelected { character: player::projection(&character) };
        self.send_to(addr, &msg).await;
    }

    async fn handle_find_monster(&mut self, addr: SocketAddr) {
        let Some((connection_id, character_id)) = self.session(addr) else {
            warn!("FindMonster from {} without a selected character", addr);
            return;
        };

        // Failures are reported to the client by the engine
        if let Err(e) = self.engine.start_encounter(connection_id, character_id).await {
            debug!("Connection {} could not start an encounter: {}", connection_id, e);
        }
    }

    async fn handle_travel(&mut self, addr: SocketAddr, zone_id: String) {
        let Some((connection_id, character_id)) = self.session(addr) else {
            warn!("TravelToZone from {} without a selected character", addr);
            return;
        };

        if let Err(e) = self.engine.enter_zone(connection_id, character_id, &zone_id).await {
            warn!("Character {} failed to travel to '{}': {}", character_id, zone_id, e);
            let msg = ServerMessage::CombatError { reason: e.user_message() };
            self.send_to(addr, &msg).await;
        }
    }

    async fn handle_equip_item(&mut self, addr: SocketAddr, inventory_index: usize) {
        self.change_equipment(addr, |character| player::equip_item(character, inventory_index).map(|_| ()))
            .await;
    }

    async fn handle_unequip_item(&mut self, addr: SocketAddr, slot: EquipSlot) {
        self.change_equipment(addr, |character| player::unequip_item(character, slot).map(|_| ()))
            .await;
    }

    /// Load the character, apply an equipment change, save and report it
    async fn change_equipment<F>(&mut self, addr: SocketAddr, change: F)
    where
        F: FnOnce(&mut CharacterData) -> Result<(), InventoryError>,
    {
        let Some((connection_id, character_id)) = self.session(addr) else {
            return;
        };

        if self.engine.is_in_combat(connection_id) {
            let msg = ServerMessage::Error { reason: InventoryError::InCombat.to_string() };
            self.send_to(addr, &msg).await;
            return;
        }

        let mut character = match self.repository.find_by_id(character_id).await {
            Ok(Some(c)) => c,
            Ok(None) => return,
            Err(e) => {
                error!("Failed to load character {}: {}", character_id, e);
                return;
            }
        };

        if let Err(reason) = change(&mut character) {
            warn!("Character {} equipment change refused: {}", character_id, reason);
            let msg = ServerMessage::Error { reason: format!("Cannot change equipment: {}", reason) };
            self.send_to(addr, &msg).await;
            return;
        }

        let character = match self
            .repository
            .update(character_id, CharacterUpdate::equipment(&character))
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                error!("Failed to save equipment for character {}: {}", character_id, e);
                let msg = ServerMessage::Error { reason: "Failed to save equipment".to_string() };
                self.send_to(addr, &msg).await;
                return;
            }
        };

        let msg = ServerMessage::InventoryUpdate {
            inventory: character.inventory.clone(),
            equipment: character.equipment.clone(),
            character: player::projection(&character),
        };
        self.send_to(addr, &msg).await;
    }

    /// Handle disconnect
    fn handle_disconnect(&mut self, addr: SocketAddr) {
        if let Some(connection) = self.clients.remove(&addr) {
            self.addr_by_connection.remove(&connection.connection_id);
            let phase = self.engine.phase(connection.connection_id);
            self.engine.clear_combat_state(connection.connection_id);
            info!(
                "Connection {} ({}) disconnected while {:?}, {} encounter(s) still active",
                connection.connection_id,
                addr,
                phase,
                self.engine.active_encounters()
            );
        }
    }

    /// Check for timed out connections
    fn check_timeouts(&mut self) {
        let timed_out: Vec<SocketAddr> = self
            .clients
            .values()
            .filter(|c| c.is_timed_out())
            .map(|c| c.addr)
            .collect();

        for addr in timed_out {
            warn!("Connection from {} timed out", addr);
            self.handle_disconnect(addr);
        }
    }

    /// Send an engine event to the connection it belongs to
    async fn deliver(&self, connection: ConnectionId, message: &ServerMessage) {
        match self.addr_by_connection.get(&connection) {
            Some(addr) => self.send_to(*addr, message).await,
            None => debug!("Dropping event for closed connection {}", connection),
        }
    }

    /// Send a message to a specific address
    async fn send_to(&self, addr: SocketAddr, msg: &ServerMessage) {
        let data = match msg.serialize() {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to serialize message for {}: {}", addr, e);
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&data, addr).await {
            error!("Failed to send to {}: {}", addr, e);
        }
    }
}
