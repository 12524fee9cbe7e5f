use spacetimedb::{Identity, Timestamp, ReducerContext, Table, ConnectionId};
use log;

// ============================================================================
// SCHEDULE INITIALIZATION MACRO
// ============================================================================
// Inserts a schedule row and logs loudly on failure. A failed insert disables
// that system until the next publish instead of aborting init.
#[macro_export]
macro_rules! try_insert_schedule {
    ($table:expr, $schedule:expr, $system_name:expr) => {{
        match $table.try_insert($schedule) {
            Ok(_) => {
                log::info!("{} schedule initialized successfully", $system_name);
            }
            Err(e) => {
                log::error!("⚠️ CRITICAL: Failed to initialize {} schedule: {}", $system_name, e);
                log::error!("⚠️ Continuing startup with {} system DISABLED", $system_name);
            }
        }
    }};
}

mod models;
mod utils;
mod species;
mod permissions;
mod hunt_config;
mod hunt_generator;
mod hunts;
mod party;
mod turn_in;
mod economy;
mod reroll;
mod leaderboard;
mod hunt_editor;

use crate::hunts::remove_player_hunt_data;

const MAX_USERNAME_LEN: usize = 32;

// Registered players. Hunts, wallets and the leaderboard refer to these.
#[spacetimedb::table(accessor = player, public)]
#[derive(Clone, Debug)]
pub struct Player {
    #[primary_key]
    pub identity: Identity,
    pub username: String,
    pub is_online: bool,
    pub registered_at: Timestamp,
    pub last_login: Timestamp,
}

#[spacetimedb::table(accessor = active_connection, public)]
#[derive(Clone, Debug)]
pub struct ActiveConnection {
    #[primary_key]
    identity: Identity,
    // Current WebSocket connection for this identity
    connection_id: ConnectionId,
    timestamp: Timestamp,
}

// --- Lifecycle Reducers ---

// Called once when the module is published or updated
#[spacetimedb::reducer(init)]
pub fn init_module(ctx: &ReducerContext) -> Result<(), String> {
    log::info!("Initializing hunt module...");

    crate::hunt_config::seed_hunt_config(ctx)?;
    crate::hunts::get_or_init_global_state(ctx);
    crate::hunts::init_hunt_tick_schedule(ctx)?;

    log::info!("Hunt module initialization complete.");
    Ok(())
}

/// Tracks the client's connection and marks the player online.
#[spacetimedb::reducer(client_connected)]
pub fn identity_connected(ctx: &ReducerContext) -> Result<(), String> {
    let client_identity = ctx.sender();
    let connection_id = ctx.connection_id().ok_or_else(|| {
        log::error!("[Connect] Missing ConnectionId in client_connected context for {:?}", client_identity);
        "Internal error: Missing connection ID on connect".to_string()
    })?;

    track_connection(ctx, client_identity, connection_id)?;

    let players = ctx.db.player();
    if let Some(mut player) = players.identity().find(&client_identity) {
        if !player.is_online {
            player.is_online = true;
            player.last_login = ctx.timestamp;
            players.identity().update(player);
            log::info!("[Connect] Set player {:?} to online.", client_identity);
        }
    } else {
        // Not registered yet; register_player sets is_online.
        log::debug!("[Connect] Player {:?} not found in Player table yet.", client_identity);
    }
    Ok(())
}

/// Removes the matching connection record, marks the player offline and
/// drops their hunt state. A stale disconnect after a quick reconnect is ignored.
#[spacetimedb::reducer(client_disconnected)]
pub fn identity_disconnected(ctx: &ReducerContext) {
    let sender_id = ctx.sender();
    let Some(disconnecting_connection_id) = ctx.connection_id() else {
        return;
    };

    let active_connections = ctx.db.active_connection();
    let Some(active) = active_connections.identity().find(&sender_id) else {
        return;
    };
    if active.connection_id != disconnecting_connection_id {
        // Player already reconnected on a new connection
        return;
    }

    active_connections.identity().delete(&sender_id);

    let players = ctx.db.player();
    if let Some(mut player) = players.identity().find(&sender_id) {
        if player.is_online {
            player.is_online = false;
            players.identity().update(player);
            log::info!("[Disconnect] Set player {:?} to offline.", sender_id);
        }
    } else {
        log::warn!("[Disconnect] Player {:?} not found in Player table during disconnect cleanup.", sender_id);
    }

    remove_player_hunt_data(ctx, sender_id);
}

fn track_connection(ctx: &ReducerContext, identity: Identity, connection_id: ConnectionId) -> Result<(), String> {
    let active_connections = ctx.db.active_connection();
    let record = ActiveConnection {
        identity,
        connection_id,
        timestamp: ctx.timestamp,
    };
    if active_connections.identity().find(&identity).is_some() {
        active_connections.identity().update(record);
        return Ok(());
    }
    active_connections.try_insert(record).map(|_| ()).map_err(|e| {
        log::error!("[Connect] Failed to insert active connection for {:?}: {}", identity, e);
        format!("Failed to track connection: {}", e)
    })
}

fn validate_username(username: &str) -> Result<String, String> {
    let trimmed = username.trim();
    if trimmed.is_empty() {
        return Err("Username cannot be empty.".to_string());
    }
    if trimmed.chars().count() > MAX_USERNAME_LEN {
        return Err(format!("Username cannot be longer than {} characters.", MAX_USERNAME_LEN));
    }
    Ok(trimmed.to_string())
}

/// Registers a new player or refreshes an existing one on login.
#[spacetimedb::reducer]
pub fn register_player(ctx: &ReducerContext, username: String) -> Result<(), String> {
    let sender_id = ctx.sender();
    let username = validate_username(&username)?;
    let players = ctx.db.player();
    log::info!("Attempting registration/login for identity: {:?}, username: {}", sender_id, username);

    if let Some(mut existing_player) = players.identity().find(&sender_id) {
        log::info!("[RegisterPlayer] Found existing player {} ({:?}).", existing_player.username, sender_id);
        existing_player.is_online = true;
        existing_player.last_login = ctx.timestamp;
        players.identity().update(existing_player);
        return Ok(());
    }

    if players.iter().any(|p| p.username.eq_ignore_ascii_case(&username)) {
        log::warn!("Username '{}' already taken by another player. Registration failed for {:?}.", username, sender_id);
        return Err(format!("Username '{}' is already taken.", username));
    }

    players.insert(Player {
        identity: sender_id,
        username: username.clone(),
        is_online: true,
        registered_at: ctx.timestamp,
        last_login: ctx.timestamp,
    });
    log::info!("[RegisterPlayer] Registered new player {} ({:?}).", username, sender_id);
    Ok(())
}
