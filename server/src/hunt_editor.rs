//! # Hunt Editor
//!
//! Admin reducers that edit the live spawn and loot tables row by row.
//! Edits apply to the next roll; hunts already rolled keep their values.

use spacetimedb::{ReducerContext, Table};
use std::str::FromStr;
use log;

use crate::hunt_config::{HuntLootEntry, HuntSpawnEntry};
use crate::models::{CommandReward, Gender, HuntDifficulty, HuntPokemonEntry, ItemReward, LootReward, Nature};
use crate::permissions::{require_permission, PERM_ADMIN};

// Import table traits
use crate::hunt_config::hunt_spawn_entry as HuntSpawnEntryTableTrait;
use crate::hunt_config::hunt_loot_entry as HuntLootEntryTableTrait;

pub fn validate_chance(chance: f64) -> Result<f64, String> {
    if !chance.is_finite() || chance < 0.0 {
        return Err(format!("Chance must be a non-negative number, got {}", chance));
    }
    Ok(chance)
}

/// `None`, empty or "random" clears the constraint.
pub fn parse_constraint<T>(value: Option<String>) -> Result<Option<T>, String>
where
    T: FromStr<Err = String>,
{
    match value {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() || raw.trim().eq_ignore_ascii_case("random") => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some),
    }
}

pub fn apply_constraints(
    mut entry: HuntPokemonEntry,
    gender: Option<String>,
    nature: Option<String>,
    iv_count: Option<u8>,
) -> Result<HuntPokemonEntry, String> {
    if iv_count.map_or(false, |c| c > 6) {
        return Err("iv_count cannot exceed 6".to_string());
    }
    entry.gender = parse_constraint::<Gender>(gender)?;
    entry.nature = parse_constraint::<Nature>(nature)?;
    entry.iv_count = iv_count;
    Ok(entry)
}

pub fn with_chance(reward: LootReward, chance: f64) -> LootReward {
    match reward {
        LootReward::Item(item) => LootReward::Item(ItemReward { chance, ..item }),
        LootReward::Command(cmd) => LootReward::Command(CommandReward { chance, ..cmd }),
    }
}

fn find_spawn_entry(ctx: &ReducerContext, id: u64) -> Result<HuntSpawnEntry, String> {
    ctx.db.hunt_spawn_entry().id().find(id).ok_or_else(|| format!("Spawn entry {} not found", id))
}

fn find_loot_entry(ctx: &ReducerContext, id: u64) -> Result<HuntLootEntry, String> {
    ctx.db.hunt_loot_entry().id().find(id).ok_or_else(|| format!("Loot entry {} not found", id))
}

fn insert_loot(ctx: &ReducerContext, difficulty: String, reward: LootReward) -> Result<(), String> {
    let difficulty = HuntDifficulty::from_str(&difficulty)?;
    let description = reward.describe();
    let row = ctx.db.hunt_loot_entry().insert(HuntLootEntry { id: 0, difficulty, reward });
    log::info!("[HuntEditor] Added {} loot entry {}: {}", difficulty, row.id, description);
    Ok(())
}

// ============================================================================
// SPAWN TABLE
// ============================================================================

#[spacetimedb::reducer]
pub fn add_spawn_entry(
    ctx: &ReducerContext,
    difficulty: String,
    species: String,
    form: Option<String>,
    aspects: Vec<String>,
    chance: f64,
) -> Result<(), String> {
    require_permission(ctx, PERM_ADMIN)?;
    let difficulty = HuntDifficulty::from_str(&difficulty)?;
    let species = species.trim().to_string();
    if species.is_empty() {
        return Err("Species cannot be empty".to_string());
    }
    let mut entry = HuntPokemonEntry::new(&species, validate_chance(chance)?);
    entry.form = form.filter(|f| !f.trim().is_empty());
    entry.aspects = aspects.into_iter().filter(|a| !a.trim().is_empty()).collect();

    let row = ctx.db.hunt_spawn_entry().insert(HuntSpawnEntry { id: 0, difficulty, entry });
    log::info!("[HuntEditor] Added {} spawn entry {}: {}", difficulty, row.id, species);
    Ok(())
}

#[spacetimedb::reducer]
pub fn remove_spawn_entry(ctx: &ReducerContext, entry_id: u64) -> Result<(), String> {
    require_permission(ctx, PERM_ADMIN)?;
    let row = find_spawn_entry(ctx, entry_id)?;
    ctx.db.hunt_spawn_entry().id().delete(entry_id);
    log::info!("[HuntEditor] Removed {} spawn entry {} ({})", row.difficulty, entry_id, row.entry.species);
    Ok(())
}

#[spacetimedb::reducer]
pub fn set_spawn_entry_chance(ctx: &ReducerContext, entry_id: u64, chance: f64) -> Result<(), String> {
    require_permission(ctx, PERM_ADMIN)?;
    let mut row = find_spawn_entry(ctx, entry_id)?;
    row.entry.chance = validate_chance(chance)?;
    ctx.db.hunt_spawn_entry().id().update(row);
    log::info!("[HuntEditor] Spawn entry {} chance set to {}", entry_id, chance);
    Ok(())
}

/// Sets or clears an entry's fixed gender, nature and IV count.
#[spacetimedb::reducer]
pub fn set_spawn_entry_constraints(
    ctx: &ReducerContext,
    entry_id: u64,
    gender: Option<String>,
    nature: Option<String>,
    iv_count: Option<u8>,
) -> Result<(), String> {
    require_permission(ctx, PERM_ADMIN)?;
    let mut row = find_spawn_entry(ctx, entry_id)?;
    row.entry = apply_constraints(row.entry, gender, nature, iv_count)?;
    log::info!(
        "[HuntEditor] Spawn entry {} constraints: gender {:?}, nature {:?}, ivs {:?}",
        entry_id, row.entry.gender, row.entry.nature, row.entry.iv_count
    );
    ctx.db.hunt_spawn_entry().id().update(row);
    Ok(())
}

// ============================================================================
// LOOT TABLE
// ============================================================================

#[spacetimedb::reducer]
pub fn add_item_reward(
    ctx: &ReducerContext,
    difficulty: String,
    item_id: String,
    count: u32,
    data: Option<String>,
    chance: f64,
) -> Result<(), String> {
    require_permission(ctx, PERM_ADMIN)?;
    if item_id.trim().is_empty() {
        return Err("Item id cannot be empty".to_string());
    }
    if count == 0 {
        return Err("Count must be at least 1".to_string());
    }
    let reward = LootReward::Item(ItemReward {
        chance: validate_chance(chance)?,
        item_id: item_id.trim().to_string(),
        count,
        data,
    });
    insert_loot(ctx, difficulty, reward)
}

#[spacetimedb::reducer]
pub fn add_command_reward(
    ctx: &ReducerContext,
    difficulty: String,
    command: String,
    display_item: String,
    chance: f64,
) -> Result<(), String> {
    require_permission(ctx, PERM_ADMIN)?;
    let command = command.trim().trim_start_matches('/').to_string();
    if command.is_empty() {
        return Err("Command cannot be empty".to_string());
    }
    let reward = LootReward::Command(CommandReward {
        chance: validate_chance(chance)?,
        command,
        display_item,
    });
    insert_loot(ctx, difficulty, reward)
}

#[spacetimedb::reducer]
pub fn remove_loot_entry(ctx: &ReducerContext, entry_id: u64) -> Result<(), String> {
    require_permission(ctx, PERM_ADMIN)?;
    let row = find_loot_entry(ctx, entry_id)?;
    ctx.db.hunt_loot_entry().id().delete(entry_id);
    log::info!("[HuntEditor] Removed {} loot entry {}", row.difficulty, entry_id);
    Ok(())
}

#[spacetimedb::reducer]
pub fn set_loot_entry_chance(ctx: &ReducerContext, entry_id: u64, chance: f64) -> Result<(), String> {
    require_permission(ctx, PERM_ADMIN)?;
    let mut row = find_loot_entry(ctx, entry_id)?;
    row.reward = with_chance(row.reward, validate_chance(chance)?);
    ctx.db.hunt_loot_entry().id().update(row);
    log::info!("[HuntEditor] Loot entry {} chance set to {}", entry_id, chance);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::Weighted;

    #[test]
    fn chances_must_be_non_negative() {
        assert_eq!(validate_chance(2.5), Ok(2.5));
        assert_eq!(validate_chance(0.0), Ok(0.0));
        assert!(validate_chance(-1.0).is_err());
        assert!(validate_chance(f64::NAN).is_err());
    }

    #[test]
    fn constraints_parse_and_clear() {
        let entry = HuntPokemonEntry::new("eevee", 1.0);
        let entry = apply_constraints(entry, Some("Female".to_string()), Some("modest".to_string()), Some(3)).unwrap();
        assert_eq!(entry.gender, Some(Gender::Female));
        assert_eq!(entry.nature, Some(Nature::Modest));
        assert_eq!(entry.iv_count, Some(3));

        let cleared = apply_constraints(entry, Some("random".to_string()), None, None).unwrap();
        assert_eq!(cleared.gender, None);
        assert_eq!(cleared.nature, None);
        assert_eq!(cleared.iv_count, None);
    }

    #[test]
    fn bad_constraints_are_rejected() {
        let entry = HuntPokemonEntry::new("eevee", 1.0);
        assert!(apply_constraints(entry.clone(), Some("robot".to_string()), None, None).is_err());
        assert!(apply_constraints(entry, None, None, Some(7)).is_err());
    }

    #[test]
    fn with_chance_keeps_the_reward() {
        let reward = LootReward::Command(CommandReward {
            chance: 1.0,
            command: "eco give %player% 5".to_string(),
            display_item: String::new(),
        });
        let updated = with_chance(reward, 8.0);
        assert_eq!(updated.weight(), 8.0);
        assert!(matches!(updated, LootReward::Command(c) if c.command == "eco give %player% 5"));
    }
}
