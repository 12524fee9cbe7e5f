/******************************************************************************
 *                                                                            *
 * Hunt System - Solo & Global Creature Hunts                                 *
 *                                                                            *
 * Handles:                                                                   *
 * - Per-player hunt state (previews, active hunts, cooldowns)                *
 * - Preview generation and hunt activation                                   *
 * - Global hunt rotation (active -> cooldown -> regenerated)                 *
 * - The 1s hunt tick (rotation, expiry, cache pruning)                       *
 * - Hunt chat messages                                                       *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::{Identity, ReducerContext, SpacetimeType, Table, Timestamp, TimeDuration};
use spacetimedb::spacetimedb_lib::ScheduleAt;
use std::time::Duration;
use thiserror::Error;
use log;

use crate::hunt_config::{current_settings, loot_pool, spawn_pool, GlobalSettings, HuntSettings};
use crate::hunt_generator::{roll_global_pool, roll_hunt};
use crate::models::{HuntDifficulty, HuntInstance};
use crate::permissions::{require_permission, PERM_ADMIN};
use crate::utils::{add_secs, deadline_after, format_duration, is_after, secs_until, MICROS_PER_SECOND};

// Import table traits
use crate::hunts::player_hunt_data as PlayerHuntDataTableTrait;
use crate::hunts::global_hunt_state as GlobalHuntStateTableTrait;
use crate::hunts::hunt_message as HuntMessageTableTrait;
use crate::hunts::hunt_tick_schedule as HuntTickScheduleTableTrait;
use crate::player as PlayerTableTrait;

// ============================================================================
// CONSTANTS
// ============================================================================

pub(crate) const HUNT_TICK_INTERVAL_SECS: u64 = 1;

/// Hunt chat lines older than this are pruned by the tick.
const HUNT_MESSAGE_TTL_SECS: i64 = 10 * 60;

const GLOBAL_STATE_ID: u8 = 0;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HuntError {
    #[error("{0} hunts are disabled.")]
    TierDisabled(HuntDifficulty),
    #[error("You have no {0} hunt to accept. Open the hunts menu first.")]
    NoPreview(HuntDifficulty),
    #[error("You already have an active {0} hunt.")]
    AlreadyActive(HuntDifficulty),
    #[error("You have no active {0} hunt.")]
    NoActiveHunt(HuntDifficulty),
    #[error("Your {difficulty} hunts are on cooldown for {remaining}.")]
    OnCooldown { difficulty: HuntDifficulty, remaining: String },
    #[error("There is no global hunt #{0}.")]
    NoGlobalHunt(u32),
    #[error("Global hunt #{0} has already been completed.")]
    GlobalHuntCompleted(u32),
    #[error("Global hunts are on cooldown.")]
    GlobalCooldown,
}

// ============================================================================
// TYPES
// ============================================================================

#[derive(SpacetimeType, Clone, Debug, PartialEq)]
pub struct HuntSlot {
    pub difficulty: HuntDifficulty,
    pub instance: HuntInstance,
}

#[derive(SpacetimeType, Clone, Debug, PartialEq)]
pub struct TierCooldown {
    pub difficulty: HuntDifficulty,
    pub ends_at: Timestamp,
}

#[derive(SpacetimeType, Clone, Debug, PartialEq)]
pub struct GlobalHuntSlot {
    pub instance: HuntInstance,
    /// Set when the hunt is locked for everyone after a completion.
    pub locked_by: Option<Identity>,
}

/// Outcome of one global rotation step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GlobalTransition {
    Unchanged,
    Expired,
    Regenerated(usize),
    /// Generation was due but the pool produced nothing; retried after the cooldown.
    Starved,
    Disabled,
}

// ============================================================================
// TABLES
// ============================================================================

/// Per-player hunt state. Created on first access, deleted on disconnect.
#[spacetimedb::table(accessor = player_hunt_data, public)]
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerHuntData {
    #[primary_key]
    pub player_id: Identity,
    pub previews: Vec<HuntSlot>,
    pub actives: Vec<HuntSlot>,
    pub cooldowns: Vec<TierCooldown>,
    /// Global hunt indices this player completed, valid for `completed_global_generation`.
    pub completed_global: Vec<u32>,
    pub completed_global_generation: u64,
}

/// Shared global hunt pool. Singleton, id always 0.
#[spacetimedb::table(accessor = global_hunt_state, public)]
#[derive(Clone, Debug, PartialEq)]
pub struct GlobalHuntState {
    #[primary_key]
    pub id: u8,
    pub hunts: Vec<GlobalHuntSlot>,
    pub ends_at: Option<Timestamp>,
    pub cooldown_ends_at: Option<Timestamp>,
    pub generation: u64,
}

/// Hunt chat lines. `player_id` of `None` is a broadcast.
#[spacetimedb::table(accessor = hunt_message, public)]
#[derive(Clone, Debug)]
pub struct HuntMessage {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub player_id: Option<Identity>,
    pub message: String,
    pub kind: String,
    pub sent_at: Timestamp,
}

#[spacetimedb::table(accessor = hunt_tick_schedule, scheduled(process_hunt_tick))]
#[derive(Clone)]
pub struct HuntTickSchedule {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub scheduled_at: ScheduleAt,
}

// ============================================================================
// PLAYER HUNT DATA
// ============================================================================

fn find_slot(slots: &[HuntSlot], difficulty: HuntDifficulty) -> Option<&HuntInstance> {
    slots.iter().find(|s| s.difficulty == difficulty).map(|s| &s.instance)
}

fn take_slot(slots: &mut Vec<HuntSlot>, difficulty: HuntDifficulty) -> Option<HuntInstance> {
    let index = slots.iter().position(|s| s.difficulty == difficulty)?;
    Some(slots.remove(index).instance)
}

impl PlayerHuntData {
    pub fn new(player_id: Identity) -> Self {
        PlayerHuntData {
            player_id,
            previews: Vec::new(),
            actives: Vec::new(),
            cooldowns: Vec::new(),
            completed_global: Vec::new(),
            completed_global_generation: 0,
        }
    }

    pub fn preview(&self, difficulty: HuntDifficulty) -> Option<&HuntInstance> {
        find_slot(&self.previews, difficulty)
    }

    pub fn active(&self, difficulty: HuntDifficulty) -> Option<&HuntInstance> {
        find_slot(&self.actives, difficulty)
    }

    pub fn cooldown_end(&self, difficulty: HuntDifficulty) -> Option<Timestamp> {
        self.cooldowns.iter().find(|c| c.difficulty == difficulty).map(|c| c.ends_at)
    }

    pub fn on_cooldown(&self, difficulty: HuntDifficulty, now: Timestamp) -> bool {
        self.cooldown_end(difficulty).map_or(false, |end| is_after(end, now))
    }

    pub fn set_preview(&mut self, difficulty: HuntDifficulty, instance: HuntInstance) {
        take_slot(&mut self.previews, difficulty);
        self.previews.push(HuntSlot { difficulty, instance });
    }

    pub fn clear_preview(&mut self, difficulty: HuntDifficulty) -> Option<HuntInstance> {
        take_slot(&mut self.previews, difficulty)
    }

    /// Rolls a preview for every enabled solo tier that has no cooldown, no
    /// active hunt and no preview yet. Existing previews are never replaced.
    pub fn generate_previews<F>(&mut self, now: Timestamp, settings: &HuntSettings, mut roll: F) -> Vec<HuntDifficulty>
    where
        F: FnMut(HuntDifficulty) -> Option<HuntInstance>,
    {
        let mut generated = Vec::new();
        for difficulty in HuntDifficulty::SOLO {
            if !settings.tier(difficulty).enabled
                || self.on_cooldown(difficulty, now)
                || self.active(difficulty).is_some()
                || self.preview(difficulty).is_some()
            {
                continue;
            }
            if let Some(instance) = roll(difficulty) {
                self.previews.push(HuntSlot { difficulty, instance });
                generated.push(difficulty);
            }
        }
        generated
    }

    /// Moves the preview into the active slot and stamps start and expiry.
    pub fn activate(&mut self, difficulty: HuntDifficulty, now: Timestamp, time_limit_secs: u64) -> Result<&HuntInstance, HuntError> {
        if self.active(difficulty).is_some() {
            return Err(HuntError::AlreadyActive(difficulty));
        }
        if let Some(end) = self.cooldown_end(difficulty).filter(|end| is_after(*end, now)) {
            return Err(HuntError::OnCooldown {
                difficulty,
                remaining: format_duration(secs_until(now, end)),
            });
        }
        let mut instance = self.clear_preview(difficulty).ok_or(HuntError::NoPreview(difficulty))?;
        instance.started_at = Some(now);
        instance.expires_at = deadline_after(now, time_limit_secs);
        self.actives.push(HuntSlot { difficulty, instance });
        Ok(&self.actives[self.actives.len() - 1].instance)
    }

    /// Clears a completed solo hunt and starts the tier cooldown.
    pub fn complete_solo(&mut self, difficulty: HuntDifficulty, now: Timestamp, cooldown_secs: u64) -> Option<HuntInstance> {
        let finished = take_slot(&mut self.actives, difficulty)?;
        self.cooldowns.retain(|c| c.difficulty != difficulty);
        if cooldown_secs > 0 {
            self.cooldowns.push(TierCooldown { difficulty, ends_at: add_secs(now, cooldown_secs) });
        }
        Some(finished)
    }

    /// Removes and returns active hunts whose time limit has passed.
    pub fn expire_actives(&mut self, now: Timestamp) -> Vec<HuntInstance> {
        let (expired, kept): (Vec<HuntSlot>, Vec<HuntSlot>) =
            self.actives.drain(..).partition(|slot| slot.instance.is_expired(now));
        self.actives = kept;
        expired.into_iter().map(|slot| slot.instance).collect()
    }

    /// Drops elapsed cooldowns. Returns true if anything changed.
    pub fn prune_cooldowns(&mut self, now: Timestamp) -> bool {
        let before = self.cooldowns.len();
        self.cooldowns.retain(|c| is_after(c.ends_at, now));
        before != self.cooldowns.len()
    }

    pub fn completed_global_hunt(&self, index: u32, generation: u64) -> bool {
        self.completed_global_generation == generation && self.completed_global.contains(&index)
    }

    pub fn mark_global_completed(&mut self, index: u32, generation: u64) {
        if self.completed_global_generation != generation {
            self.completed_global.clear();
            self.completed_global_generation = generation;
        }
        if !self.completed_global.contains(&index) {
            self.completed_global.push(index);
        }
    }
}

// ============================================================================
// GLOBAL HUNT STATE
// ============================================================================

impl GlobalHuntState {
    pub fn empty() -> Self {
        GlobalHuntState {
            id: GLOBAL_STATE_ID,
            hunts: Vec::new(),
            ends_at: None,
            cooldown_ends_at: None,
            generation: 0,
        }
    }

    /// One rotation step at `now`. `generate` is only called when a new pool is due.
    pub fn advance<F>(&mut self, now: Timestamp, settings: &GlobalSettings, generate: F) -> GlobalTransition
    where
        F: FnOnce() -> Vec<HuntInstance>,
    {
        if !settings.enabled {
            if self.hunts.is_empty() && self.ends_at.is_none() {
                return GlobalTransition::Unchanged;
            }
            self.hunts.clear();
            self.ends_at = None;
            self.cooldown_ends_at = None;
            return GlobalTransition::Disabled;
        }

        if !self.hunts.is_empty() {
            return match self.ends_at {
                Some(end) if is_after(now, end) => {
                    self.hunts.clear();
                    self.ends_at = None;
                    self.cooldown_ends_at = Some(add_secs(now, settings.cooldown_secs));
                    GlobalTransition::Expired
                }
                _ => GlobalTransition::Unchanged,
            };
        }

        if let Some(cooldown_end) = self.cooldown_ends_at {
            if !is_after(now, cooldown_end) {
                return GlobalTransition::Unchanged;
            }
        }

        let fresh = generate();
        if fresh.is_empty() {
            self.cooldown_ends_at = Some(add_secs(now, settings.cooldown_secs));
            return GlobalTransition::Starved;
        }

        let ends_at = deadline_after(now, settings.time_limit_secs);
        self.hunts = fresh
            .into_iter()
            .map(|mut instance| {
                instance.started_at = Some(now);
                instance.expires_at = ends_at;
                GlobalHuntSlot { instance, locked_by: None }
            })
            .collect();
        self.ends_at = ends_at;
        self.cooldown_ends_at = None;
        self.generation += 1;
        GlobalTransition::Regenerated(self.hunts.len())
    }

    /// The slot at `index` if `player` may still turn it in.
    pub fn available_slot(&self, index: u32, data: &PlayerHuntData) -> Result<&GlobalHuntSlot, HuntError> {
        if self.hunts.is_empty() {
            return Err(HuntError::GlobalCooldown);
        }
        let slot = self.hunts.get(index as usize).ok_or(HuntError::NoGlobalHunt(index))?;
        if slot.locked_by.is_some() || data.completed_global_hunt(index, self.generation) {
            return Err(HuntError::GlobalHuntCompleted(index));
        }
        Ok(slot)
    }

    pub fn lock(&mut self, index: u32, player_id: Identity) {
        if let Some(slot) = self.hunts.get_mut(index as usize) {
            slot.locked_by = Some(player_id);
        }
    }

    /// Forces regeneration on the next tick while invalidating old completions.
    pub fn reset(&mut self) {
        self.hunts.clear();
        self.ends_at = None;
        self.cooldown_ends_at = None;
    }
}

// ============================================================================
// TABLE HELPERS
// ============================================================================

pub fn get_or_init_player_hunt_data(ctx: &ReducerContext, player_id: Identity) -> PlayerHuntData {
    let table = ctx.db.player_hunt_data();
    if let Some(data) = table.player_id().find(&player_id) {
        return data;
    }
    let data = PlayerHuntData::new(player_id);
    table.insert(data.clone());
    log::info!("[Hunts] Initialized hunt data for player {:?}", player_id);
    data
}

pub fn save_player_hunt_data(ctx: &ReducerContext, data: PlayerHuntData) {
    ctx.db.player_hunt_data().player_id().update(data);
}

pub fn get_or_init_global_state(ctx: &ReducerContext) -> GlobalHuntState {
    let table = ctx.db.global_hunt_state();
    if let Some(state) = table.id().find(&GLOBAL_STATE_ID) {
        return state;
    }
    let state = GlobalHuntState::empty();
    table.insert(state.clone());
    state
}

pub fn save_global_state(ctx: &ReducerContext, state: GlobalHuntState) {
    ctx.db.global_hunt_state().id().update(state);
}

/// Deletes a player's hunt state; called on disconnect.
pub fn remove_player_hunt_data(ctx: &ReducerContext, player_id: Identity) {
    if ctx.db.player_hunt_data().player_id().delete(&player_id) {
        log::info!("[Hunts] Cleared hunt data for {:?}", player_id);
    }
}

/// Clears every player's hunt state and forces a new global pool.
pub fn restart_all_hunts(ctx: &ReducerContext) {
    let table = ctx.db.player_hunt_data();
    let players: Vec<Identity> = table.iter().map(|d| d.player_id).collect();
    let count = players.len();
    for player_id in players {
        table.player_id().delete(&player_id);
    }
    let mut state = get_or_init_global_state(ctx);
    state.reset();
    save_global_state(ctx, state);
    send_hunt_message(ctx, None, "All hunts have been restarted.", "restart");
    log::info!("[Hunts] Restarted hunts, cleared data for {} players", count);
}

/// Sends a hunt chat line to one player, or to everyone when `player_id` is `None`.
pub fn send_hunt_message(ctx: &ReducerContext, player_id: Option<Identity>, message: &str, kind: &str) {
    ctx.db.hunt_message().insert(HuntMessage {
        id: 0,
        player_id,
        message: message.to_string(),
        kind: kind.to_string(),
        sent_at: ctx.timestamp,
    });
    log::debug!("[Hunts] Message '{}' to {:?}: {}", kind, player_id, message);
}

fn prune_hunt_messages(ctx: &ReducerContext) {
    let cutoff = ctx.timestamp.to_micros_since_unix_epoch() - HUNT_MESSAGE_TTL_SECS * MICROS_PER_SECOND;
    let table = ctx.db.hunt_message();
    let stale: Vec<u64> = table.iter()
        .filter(|m| m.sent_at.to_micros_since_unix_epoch() < cutoff)
        .map(|m| m.id)
        .collect();
    for id in stale {
        table.id().delete(id);
    }
}

// ============================================================================
// TICK
// ============================================================================

pub fn init_hunt_tick_schedule(ctx: &ReducerContext) -> Result<(), String> {
    let schedule_table = ctx.db.hunt_tick_schedule();
    if schedule_table.iter().count() == 0 {
        log::info!("Starting hunt tick schedule (every {}s).", HUNT_TICK_INTERVAL_SECS);
        let interval = Duration::from_secs(HUNT_TICK_INTERVAL_SECS);
        crate::try_insert_schedule!(
            schedule_table,
            HuntTickSchedule {
                id: 0,
                scheduled_at: ScheduleAt::Interval(TimeDuration::from(interval)),
            },
            "Hunt tick"
        );
    } else {
        log::debug!("Hunt tick schedule already exists.");
    }
    Ok(())
}

/// Advances the global rotation and broadcasts the change.
pub fn tick_global_hunts(ctx: &ReducerContext, settings: &HuntSettings) {
    let now = ctx.timestamp;
    let mut state = get_or_init_global_state(ctx);
    let before = state.clone();

    let transition = state.advance(now, &settings.global, || {
        let pool = spawn_pool(ctx, HuntDifficulty::Global);
        let loot = loot_pool(ctx, HuntDifficulty::Global);
        let mut rng = ctx.rng();
        roll_global_pool(settings.global.hunt_count, &pool, &loot, settings, &mut rng)
    });

    match transition {
        GlobalTransition::Unchanged => {}
        GlobalTransition::Expired => {
            let cooldown = format_duration(settings.global.cooldown_secs);
            send_hunt_message(ctx, None, &format!("Global hunts have ended. New hunts in {}.", cooldown), "global_expired");
            log::info!("[GlobalHunts] Pool expired, cooldown {}", cooldown);
        }
        GlobalTransition::Regenerated(count) => {
            let names: Vec<String> = state.hunts.iter().map(|s| s.instance.entry.display_name()).collect();
            send_hunt_message(ctx, None, &format!("New global hunts: {}", names.join(", ")), "global_started");
            log::info!("[GlobalHunts] Generated {} global hunts (generation {})", count, state.generation);
        }
        GlobalTransition::Starved => {
            log::warn!("[GlobalHunts] No global hunts could be generated, retrying after cooldown");
        }
        GlobalTransition::Disabled => {
            log::info!("[GlobalHunts] Global hunts disabled, pool cleared");
        }
    }

    if state != before {
        save_global_state(ctx, state);
    }
}

/// Expires overdue solo hunts and prunes elapsed cooldowns for every player.
pub fn tick_player_hunts(ctx: &ReducerContext) {
    let now = ctx.timestamp;
    let rows: Vec<PlayerHuntData> = ctx.db.player_hunt_data().iter().collect();
    for mut data in rows {
        let expired = data.expire_actives(now);
        let pruned = data.prune_cooldowns(now);
        for instance in &expired {
            send_hunt_message(
                ctx,
                Some(data.player_id),
                &format!("Your {} hunt for {} has expired.", instance.difficulty, instance.entry.display_name()),
                "hunt_expired",
            );
            log::info!("[Hunts] {:?}'s {} hunt expired", data.player_id, instance.difficulty);
        }
        if !expired.is_empty() || pruned {
            save_player_hunt_data(ctx, data);
        }
    }
}

#[spacetimedb::reducer]
pub fn process_hunt_tick(ctx: &ReducerContext, _schedule: HuntTickSchedule) -> Result<(), String> {
    // Security check - only allow scheduler to call this
    if ctx.sender() != ctx.identity() {
        return Err("process_hunt_tick may only be called by the scheduler.".to_string());
    }

    crate::party::prune_capture_records(ctx);
    prune_hunt_messages(ctx);

    let online_player_count = ctx.db.player().iter().filter(|p| p.is_online).count();
    if online_player_count == 0 {
        log::trace!("No players online - skipping hunt tick.");
        return Ok(());
    }

    let settings = current_settings(ctx);
    tick_global_hunts(ctx, &settings);
    tick_player_hunts(ctx);
    Ok(())
}

// ============================================================================
// REDUCERS
// ============================================================================

/// Prepares the hunts menu: creates player data and rolls missing previews.
#[spacetimedb::reducer]
pub fn open_hunts_menu(ctx: &ReducerContext) -> Result<(), String> {
    let player_id = ctx.sender();
    if ctx.db.player().identity().find(&player_id).is_none() {
        return Err("Player not found. You need to register first.".to_string());
    }

    let settings = current_settings(ctx);
    let mut data = get_or_init_player_hunt_data(ctx, player_id);
    let mut rng = ctx.rng();
    let generated = data.generate_previews(ctx.timestamp, &settings, |difficulty| {
        let pool = spawn_pool(ctx, difficulty);
        let loot = loot_pool(ctx, difficulty);
        roll_hunt(difficulty, &pool, &loot, &settings, &mut rng)
    });

    if !generated.is_empty() {
        log::info!("[Hunts] Generated {} previews for {:?}", generated.len(), player_id);
        save_player_hunt_data(ctx, data);
    }
    Ok(())
}

/// Accepts the previewed hunt for a solo difficulty.
#[spacetimedb::reducer]
pub fn accept_hunt(ctx: &ReducerContext, difficulty: String) -> Result<(), String> {
    let player_id = ctx.sender();
    let difficulty = HuntDifficulty::parse_solo(&difficulty)?;
    let settings = current_settings(ctx);
    let tier = settings.tier(difficulty);
    if !tier.enabled {
        return Err(HuntError::TierDisabled(difficulty).to_string());
    }

    let mut data = get_or_init_player_hunt_data(ctx, player_id);
    let instance = data
        .activate(difficulty, ctx.timestamp, tier.time_limit_secs)
        .map_err(|e| e.to_string())?;

    let limit_text = match tier.time_limit_secs {
        0 => "no time limit".to_string(),
        secs => format!("{} to complete it", format_duration(secs)),
    };
    let message = format!("{} hunt started: {} ({}).", difficulty, instance.summary(), limit_text);
    save_player_hunt_data(ctx, data);

    send_hunt_message(ctx, Some(player_id), &message, "hunt_started");
    log::info!("[Hunts] {:?} accepted a {} hunt", player_id, difficulty);
    Ok(())
}

/// Admin: wipe all hunt progress and regenerate the global pool.
#[spacetimedb::reducer]
pub fn restart_hunts(ctx: &ReducerContext) -> Result<(), String> {
    require_permission(ctx, PERM_ADMIN)?;
    restart_all_hunts(ctx);
    Ok(())
}
