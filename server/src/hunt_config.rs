//! # Hunt Configuration
//!
//! Admin-editable configuration for the hunt system: timers, points, reroll policy,
//! feature toggles, and the per-difficulty spawn and loot tables.
//!
//! The configuration is a JSON document. A default copy is embedded in the module and
//! seeded on first publish; `reload_hunts_config` replaces it at runtime and restarts
//! all hunts. Settings live in the singleton `hunt_config` row, pool rows in
//! `hunt_spawn_entry` and `hunt_loot_entry`.

use spacetimedb::{ReducerContext, SpacetimeType, Table, Timestamp};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use log;

use crate::models::{HuntDifficulty, HuntPokemonEntry, LootReward};
use crate::party::CAPTURE_RECORD_TTL_SECS;
use crate::permissions::{require_permission, PERM_ADMIN, PERM_REROLL};
use crate::species::SpeciesGender;

// Import table traits
use crate::hunt_config::hunt_config as HuntConfigTableTrait;
use crate::hunt_config::hunt_spawn_entry as HuntSpawnEntryTableTrait;
use crate::hunt_config::hunt_loot_entry as HuntLootEntryTableTrait;

const DEFAULT_CONFIG_JSON: &str = include_str!("../config/default_hunts.json");

pub const PRIMARY_CURRENCY: &str = "primary";

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(SpacetimeType, Serialize, Clone, Debug, PartialEq)]
pub struct TierSettings {
    pub enabled: bool,
    /// Cooldown after a successful turn-in.
    pub cooldown_secs: u64,
    /// Time to complete an accepted hunt; 0 means no limit.
    pub time_limit_secs: u64,
    pub points: u64,
    /// Daily rerolls; 0 means unlimited.
    pub reroll_limit: u32,
    pub reroll_cost: u64,
    /// Required perfect IVs for entries that don't set their own count.
    pub iv_count: u8,
}

/// A tier block as written in the document. Fields left out keep the tier's default.
#[derive(Deserialize, Default)]
#[serde(default)]
struct TierOverride {
    enabled: Option<bool>,
    cooldown_secs: Option<u64>,
    time_limit_secs: Option<u64>,
    points: Option<u64>,
    reroll_limit: Option<u32>,
    reroll_cost: Option<u64>,
    iv_count: Option<u8>,
}

impl TierOverride {
    fn over(self, base: TierSettings) -> TierSettings {
        TierSettings {
            enabled: self.enabled.unwrap_or(base.enabled),
            cooldown_secs: self.cooldown_secs.unwrap_or(base.cooldown_secs),
            time_limit_secs: self.time_limit_secs.unwrap_or(base.time_limit_secs),
            points: self.points.unwrap_or(base.points),
            reroll_limit: self.reroll_limit.unwrap_or(base.reroll_limit),
            reroll_cost: self.reroll_cost.unwrap_or(base.reroll_cost),
            iv_count: self.iv_count.unwrap_or(base.iv_count),
        }
    }
}

impl TierSettings {
    fn with(cooldown_secs: u64, time_limit_secs: u64, points: u64, iv_count: u8) -> Self {
        TierSettings {
            enabled: true,
            cooldown_secs,
            time_limit_secs,
            points,
            reroll_limit: 3,
            reroll_cost: 0,
            iv_count,
        }
    }
}

fn default_easy() -> TierSettings {
    TierSettings::with(300, 1_800, 1, 0)
}

fn default_normal() -> TierSettings {
    TierSettings::with(600, 2_700, 2, 0)
}

fn default_medium() -> TierSettings {
    TierSettings::with(900, 3_600, 3, 0)
}

fn default_hard() -> TierSettings {
    TierSettings::with(1_800, 3_600, 5, 2)
}

#[derive(SpacetimeType, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(from = "SoloTiersOverride")]
pub struct SoloTiers {
    pub easy: TierSettings,
    pub normal: TierSettings,
    pub medium: TierSettings,
    pub hard: TierSettings,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SoloTiersOverride {
    easy: TierOverride,
    normal: TierOverride,
    medium: TierOverride,
    hard: TierOverride,
}

impl From<SoloTiersOverride> for SoloTiers {
    fn from(raw: SoloTiersOverride) -> Self {
        SoloTiers {
            easy: raw.easy.over(default_easy()),
            normal: raw.normal.over(default_normal()),
            medium: raw.medium.over(default_medium()),
            hard: raw.hard.over(default_hard()),
        }
    }
}

impl Default for SoloTiers {
    fn default() -> Self {
        SoloTiers {
            easy: default_easy(),
            normal: default_normal(),
            medium: default_medium(),
            hard: default_hard(),
        }
    }
}

#[derive(SpacetimeType, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct GlobalSettings {
    pub enabled: bool,
    pub hunt_count: u32,
    /// Shared lifetime of a global pool; 0 means it never expires.
    pub time_limit_secs: u64,
    pub cooldown_secs: u64,
    pub points: u64,
    /// Completing a global hunt locks it for every player instead of just the completer.
    pub lock_on_completion: bool,
    pub resolve_gender: bool,
    pub resolve_nature: bool,
    pub iv_count: u8,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        GlobalSettings {
            enabled: true,
            hunt_count: 3,
            time_limit_secs: 3_600,
            cooldown_secs: 300,
            points: 5,
            lock_on_completion: false,
            resolve_gender: true,
            resolve_nature: false,
            iv_count: 0,
        }
    }
}

#[derive(SpacetimeType, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct HuntSettings {
    pub tiers: SoloTiers,
    pub global: GlobalSettings,
    /// Only creatures captured after the hunt started may be turned in.
    pub require_capture_after_start: bool,
    pub consume_creature_on_turn_in: bool,
    pub prevent_duplicate_reroll: bool,
    /// When set, one shared daily counter replaces every per-tier reroll limit.
    pub universal_reroll_limit: Option<u32>,
    pub reroll_currency: String,
    pub currencies: Vec<String>,
    pub default_permissions: Vec<String>,
    pub species_genders: Vec<SpeciesGender>,
}

impl Default for HuntSettings {
    fn default() -> Self {
        HuntSettings {
            tiers: SoloTiers::default(),
            global: GlobalSettings::default(),
            require_capture_after_start: false,
            consume_creature_on_turn_in: true,
            prevent_duplicate_reroll: true,
            universal_reroll_limit: None,
            reroll_currency: PRIMARY_CURRENCY.to_string(),
            currencies: vec![PRIMARY_CURRENCY.to_string()],
            default_permissions: vec![PERM_REROLL.to_string()],
            species_genders: Vec::new(),
        }
    }
}

impl HuntSettings {
    /// Settings for a solo tier. Global hunts have their own block.
    pub fn tier(&self, difficulty: HuntDifficulty) -> &TierSettings {
        match difficulty {
            HuntDifficulty::Easy => &self.tiers.easy,
            HuntDifficulty::Normal => &self.tiers.normal,
            HuntDifficulty::Medium => &self.tiers.medium,
            HuntDifficulty::Hard | HuntDifficulty::Global => &self.tiers.hard,
        }
    }

    pub fn points_for(&self, difficulty: HuntDifficulty) -> u64 {
        match difficulty {
            HuntDifficulty::Global => self.global.points,
            solo => self.tier(solo).points,
        }
    }
}

// ============================================================================
// CONFIG DOCUMENT
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default, bound(deserialize = "T: Deserialize<'de>"))]
pub struct DifficultyTables<T> {
    pub easy: Vec<T>,
    pub normal: Vec<T>,
    pub medium: Vec<T>,
    pub hard: Vec<T>,
    pub global: Vec<T>,
}

impl<T> Default for DifficultyTables<T> {
    fn default() -> Self {
        DifficultyTables {
            easy: Vec::new(),
            normal: Vec::new(),
            medium: Vec::new(),
            hard: Vec::new(),
            global: Vec::new(),
        }
    }
}

impl<T> DifficultyTables<T> {
    pub fn get(&self, difficulty: HuntDifficulty) -> &[T] {
        match difficulty {
            HuntDifficulty::Easy => &self.easy,
            HuntDifficulty::Normal => &self.normal,
            HuntDifficulty::Medium => &self.medium,
            HuntDifficulty::Hard => &self.hard,
            HuntDifficulty::Global => &self.global,
        }
    }

    pub fn all(&self) -> [(HuntDifficulty, &[T]); 5] {
        [
            (HuntDifficulty::Easy, self.easy.as_slice()),
            (HuntDifficulty::Normal, self.normal.as_slice()),
            (HuntDifficulty::Medium, self.medium.as_slice()),
            (HuntDifficulty::Hard, self.hard.as_slice()),
            (HuntDifficulty::Global, self.global.as_slice()),
        ]
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct HuntsConfigFile {
    #[serde(default)]
    pub settings: HuntSettings,
    #[serde(default)]
    pub spawn_tables: DifficultyTables<HuntPokemonEntry>,
    #[serde(default)]
    pub loot_tables: DifficultyTables<LootReward>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Hunt config is not valid JSON: {0}")]
    Parse(String),
    #[error("Invalid hunt config: {0}")]
    Invalid(String),
}

/// Parses and validates a config document. Empty pools are allowed and only
/// warned about; they make the matching hunts unavailable.
pub fn parse_config(json: &str) -> Result<HuntsConfigFile, ConfigError> {
    let file: HuntsConfigFile = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_config(&file)?;
    Ok(file)
}

pub fn validate_config(file: &HuntsConfigFile) -> Result<(), ConfigError> {
    for (difficulty, entries) in file.spawn_tables.all() {
        for entry in entries {
            if entry.species.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{} spawn table has an entry without a species", difficulty)));
            }
            if !entry.chance.is_finite() || entry.chance < 0.0 {
                return Err(ConfigError::Invalid(format!("{} entry '{}' has a negative chance", difficulty, entry.species)));
            }
            if entry.iv_count.map_or(false, |c| c > 6) {
                return Err(ConfigError::Invalid(format!("{} entry '{}' requires more than 6 IVs", difficulty, entry.species)));
            }
        }
        if entries.is_empty() && (difficulty.is_solo() || file.settings.global.enabled) {
            log::warn!("[HuntConfig] {} spawn table is empty; those hunts will be unavailable", difficulty);
        }
    }
    for (difficulty, rewards) in file.loot_tables.all() {
        for reward in rewards {
            if let LootReward::Command(cmd) = reward {
                if cmd.command.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!("{} loot table has an empty command", difficulty)));
                }
            }
        }
        if rewards.is_empty() {
            log::warn!("[HuntConfig] {} loot table is empty; those hunts give no reward", difficulty);
        }
    }
    if file.settings.tiers.hard.iv_count > 6 || file.settings.global.iv_count > 6 {
        return Err(ConfigError::Invalid("iv_count cannot exceed 6".to_string()));
    }
    if file.settings.require_capture_after_start {
        let ttl = CAPTURE_RECORD_TTL_SECS as u64;
        for difficulty in HuntDifficulty::SOLO {
            let limit = file.settings.tier(difficulty).time_limit_secs;
            if limit == 0 || limit > ttl {
                log::warn!(
                    "[HuntConfig] {} time limit outlasts capture records ({}s); late turn-ins will be rejected",
                    difficulty, ttl
                );
            }
        }
    }
    Ok(())
}

pub fn default_config() -> Result<HuntsConfigFile, ConfigError> {
    parse_config(DEFAULT_CONFIG_JSON)
}

// ============================================================================
// TABLES
// ============================================================================

/// Singleton settings row, id always 0.
#[spacetimedb::table(accessor = hunt_config, public)]
#[derive(Clone, Debug)]
pub struct HuntConfig {
    #[primary_key]
    pub id: u8,
    pub settings: HuntSettings,
    pub updated_at: Timestamp,
}

#[spacetimedb::table(accessor = hunt_spawn_entry, public)]
#[derive(Clone, Debug)]
pub struct HuntSpawnEntry {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub difficulty: HuntDifficulty,
    pub entry: HuntPokemonEntry,
}

#[spacetimedb::table(accessor = hunt_loot_entry, public)]
#[derive(Clone, Debug)]
pub struct HuntLootEntry {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub difficulty: HuntDifficulty,
    pub reward: LootReward,
}

// ============================================================================
// ACCESSORS
// ============================================================================

pub fn current_settings(ctx: &ReducerContext) -> HuntSettings {
    match ctx.db.hunt_config().id().find(&0) {
        Some(config) => config.settings,
        None => {
            log::warn!("[HuntConfig] No hunt_config row found, using defaults");
            HuntSettings::default()
        }
    }
}

/// Spawn entries for a difficulty in configured order.
pub fn spawn_pool(ctx: &ReducerContext, difficulty: HuntDifficulty) -> Vec<HuntPokemonEntry> {
    let mut rows: Vec<HuntSpawnEntry> = ctx.db.hunt_spawn_entry().iter()
        .filter(|row| row.difficulty == difficulty)
        .collect();
    rows.sort_by_key(|row| row.id);
    rows.into_iter().map(|row| row.entry).collect()
}

/// Loot rewards for a difficulty in configured order.
pub fn loot_pool(ctx: &ReducerContext, difficulty: HuntDifficulty) -> Vec<LootReward> {
    let mut rows: Vec<HuntLootEntry> = ctx.db.hunt_loot_entry().iter()
        .filter(|row| row.difficulty == difficulty)
        .collect();
    rows.sort_by_key(|row| row.id);
    rows.into_iter().map(|row| row.reward).collect()
}

// ============================================================================
// SEEDING / RELOAD
// ============================================================================

/// Replaces settings and both pool tables with the contents of `file`.
pub fn apply_config(ctx: &ReducerContext, file: &HuntsConfigFile) {
    let config_table = ctx.db.hunt_config();
    let row = HuntConfig {
        id: 0,
        settings: file.settings.clone(),
        updated_at: ctx.timestamp,
    };
    if config_table.id().find(&0).is_some() {
        config_table.id().update(row);
    } else {
        config_table.insert(row);
    }

    let spawn_table = ctx.db.hunt_spawn_entry();
    let old_spawns: Vec<u64> = spawn_table.iter().map(|row| row.id).collect();
    for id in old_spawns {
        spawn_table.id().delete(id);
    }
    let loot_table = ctx.db.hunt_loot_entry();
    let old_loot: Vec<u64> = loot_table.iter().map(|row| row.id).collect();
    for id in old_loot {
        loot_table.id().delete(id);
    }

    let mut spawn_count = 0;
    for (difficulty, entries) in file.spawn_tables.all() {
        for entry in entries {
            spawn_table.insert(HuntSpawnEntry { id: 0, difficulty, entry: entry.clone() });
            spawn_count += 1;
        }
    }
    let mut loot_count = 0;
    for (difficulty, rewards) in file.loot_tables.all() {
        for reward in rewards {
            loot_table.insert(HuntLootEntry { id: 0, difficulty, reward: reward.clone() });
            loot_count += 1;
        }
    }

    log::info!("[HuntConfig] Applied config: {} spawn entries, {} loot rewards", spawn_count, loot_count);
}

/// Seeds the embedded default config. Skipped if settings already exist.
pub fn seed_hunt_config(ctx: &ReducerContext) -> Result<(), String> {
    if ctx.db.hunt_config().iter().count() > 0 {
        log::info!("[HuntConfig] Hunt config already seeded");
        return Ok(());
    }
    let file = default_config().map_err(|e| e.to_string())?;
    apply_config(ctx, &file);
    Ok(())
}

/// Hot-reloads the configuration from a JSON document and restarts every hunt.
#[spacetimedb::reducer]
pub fn reload_hunts_config(ctx: &ReducerContext, config_json: String) -> Result<(), String> {
    require_permission(ctx, PERM_ADMIN)?;
    let file = parse_config(&config_json).map_err(|e| e.to_string())?;
    apply_config(ctx, &file);
    crate::hunts::restart_all_hunts(ctx);
    log::info!("[HuntConfig] Config reloaded by {:?}", ctx.sender());
    Ok(())
}

/// Restores the embedded default configuration.
#[spacetimedb::reducer]
pub fn reset_hunts_config(ctx: &ReducerContext) -> Result<(), String> {
    require_permission(ctx, PERM_ADMIN)?;
    let file = default_config().map_err(|e| e.to_string())?;
    apply_config(ctx, &file);
    crate::hunts::restart_all_hunts(ctx);
    Ok(())
}
