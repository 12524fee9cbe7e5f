/******************************************************************************
 *                                                                            *
 * Hunt Turn-In                                                               *
 *                                                                            *
 * Validates a party creature against an active hunt and settles completed    *
 * hunts: leaderboard points, reward delivery, cooldowns and global locks.    *
 * Rewards are written to outbound tables that the host bridge executes.      *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::{Identity, ReducerContext, Table, Timestamp};
use thiserror::Error;
use log;

use crate::hunt_config::{current_settings, loot_pool, HuntSettings};
use crate::hunts::{
    get_or_init_global_state, get_or_init_player_hunt_data, save_global_state, save_player_hunt_data,
    send_hunt_message, HuntError,
};
use crate::leaderboard::award_points;
use crate::models::{HuntDifficulty, HuntInstance, LootReward};
use crate::party::{capture_time, find_party_creature, remove_party_creature, CreatureSnapshot};
use crate::permissions::{require_permission, PERM_ADMIN};
use crate::species::same_species;
use crate::utils::weighted_pick;

// Import table traits
use crate::turn_in::reward_delivery as RewardDeliveryTableTrait;
use crate::turn_in::command_dispatch as CommandDispatchTableTrait;
use crate::player as PlayerTableTrait;

/// Minimum value for every IV a hunt requires.
pub const IV_THRESHOLD: u8 = 20;

const PLAYER_TOKEN: &str = "%player%";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TurnInRejection {
    #[error("This hunt has expired.")]
    Expired,
    #[error("This Pokémon must be caught after the hunt started.")]
    CapturedBeforeStart,
    #[error("No recent capture is recorded for this Pokémon.")]
    CaptureUnknown,
    #[error("This Pokémon does not meet the requirements: {}", .0.join(", "))]
    Mismatch(Vec<String>),
}

// ============================================================================
// OUTBOUND TABLES
// ============================================================================

/// An item grant waiting for the host bridge.
#[spacetimedb::table(accessor = reward_delivery, public)]
#[derive(Clone, Debug)]
pub struct RewardDelivery {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub player_id: Identity,
    pub item_id: String,
    pub count: u32,
    pub data: Option<String>,
    pub difficulty: HuntDifficulty,
    pub created_at: Timestamp,
}

/// A rendered console command waiting for the host bridge.
#[spacetimedb::table(accessor = command_dispatch, public)]
#[derive(Clone, Debug)]
pub struct CommandDispatch {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub player_id: Identity,
    pub command: String,
    pub difficulty: HuntDifficulty,
    pub created_at: Timestamp,
}

// ============================================================================
// VALIDATION
// ============================================================================

fn required_form(instance: &HuntInstance) -> Option<&str> {
    instance
        .entry
        .form
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty() && !f.eq_ignore_ascii_case("normal"))
}

/// Every reason the creature fails the hunt. Empty means a full match.
pub fn find_mismatches(instance: &HuntInstance, creature: &CreatureSnapshot) -> Vec<String> {
    let mut reasons = Vec::new();

    if !same_species(&instance.entry.species, &creature.species) {
        reasons.push("Incorrect species".to_string());
    }

    if let Some(form) = required_form(instance) {
        let actual = creature.form.as_deref().unwrap_or("");
        if !actual.trim().eq_ignore_ascii_case(form) {
            reasons.push("Incorrect form".to_string());
        }
    }

    let missing: Vec<&str> = instance
        .entry
        .aspects
        .iter()
        .filter(|wanted| !creature.aspects.iter().any(|a| a.eq_ignore_ascii_case(wanted)))
        .map(|s| s.as_str())
        .collect();
    if !missing.is_empty() {
        reasons.push(format!("Missing aspects: {}", missing.join(", ")));
    }

    if let Some(gender) = instance.required_gender {
        if creature.gender != gender {
            reasons.push("Incorrect gender".to_string());
        }
    }

    if let Some(nature) = instance.required_nature {
        if creature.nature != nature {
            reasons.push("Incorrect nature".to_string());
        }
    }

    for stat in &instance.required_ivs {
        if creature.ivs.get(*stat) < IV_THRESHOLD {
            reasons.push(format!("{} IV must be at least {}", stat, IV_THRESHOLD));
        }
    }

    reasons
}

/// Expiry and capture time are checked before attributes.
pub fn evaluate_turn_in(
    instance: &HuntInstance,
    creature: &CreatureSnapshot,
    captured_at: Option<Timestamp>,
    require_capture_after_start: bool,
    now: Timestamp,
) -> Result<(), TurnInRejection> {
    if instance.is_expired(now) {
        return Err(TurnInRejection::Expired);
    }

    if require_capture_after_start {
        if let Some(started_at) = instance.started_at {
            let caught = captured_at.ok_or(TurnInRejection::CaptureUnknown)?;
            if caught.to_micros_since_unix_epoch() < started_at.to_micros_since_unix_epoch() {
                return Err(TurnInRejection::CapturedBeforeStart);
            }
        }
    }

    let reasons = find_mismatches(instance, creature);
    if reasons.is_empty() {
        Ok(())
    } else {
        Err(TurnInRejection::Mismatch(reasons))
    }
}

pub fn render_command(template: &str, player_name: &str) -> String {
    template.replace(PLAYER_TOKEN, player_name)
}

// ============================================================================
// SETTLEMENT
// ============================================================================

fn deliver_reward(ctx: &ReducerContext, player_id: Identity, player_name: &str, reward: &LootReward, difficulty: HuntDifficulty) {
    match reward {
        LootReward::Item(item) => {
            ctx.db.reward_delivery().insert(RewardDelivery {
                id: 0,
                player_id,
                item_id: item.item_id.clone(),
                count: item.count,
                data: item.data.clone(),
                difficulty,
                created_at: ctx.timestamp,
            });
        }
        LootReward::Command(cmd) => {
            ctx.db.command_dispatch().insert(CommandDispatch {
                id: 0,
                player_id,
                command: render_command(&cmd.command, player_name),
                difficulty,
                created_at: ctx.timestamp,
            });
        }
    }
}

/// Applies points, reward and creature consumption. Returns the chat line for the player.
fn settle_turn_in(
    ctx: &ReducerContext,
    player_id: Identity,
    player_name: &str,
    instance: &HuntInstance,
    creature_uuid: &str,
    settings: &HuntSettings,
) -> String {
    let difficulty = instance.difficulty;
    let points = settings.points_for(difficulty);
    award_points(ctx, player_id, player_name, points);

    let reward = instance.reward.clone().or_else(|| {
        let pool = loot_pool(ctx, difficulty);
        let mut rng = ctx.rng();
        weighted_pick(&pool, &mut rng).cloned()
    });
    match &reward {
        Some(reward) => deliver_reward(ctx, player_id, player_name, reward, difficulty),
        None => log::warn!("[HuntTurnIn] No reward available for {} hunt", difficulty),
    }

    if settings.consume_creature_on_turn_in {
        remove_party_creature(ctx, creature_uuid);
    }

    let mut message = format!(
        "{} hunt complete! You turned in {} and earned {} points.",
        difficulty,
        instance.entry.display_name(),
        points
    );
    if let Some(reward) = &reward {
        message.push_str(&format!(" Reward: {}.", reward.describe()));
    }
    message
}

fn player_name(ctx: &ReducerContext, player_id: Identity) -> Result<String, String> {
    ctx.db.player()
        .identity()
        .find(&player_id)
        .map(|p| p.username)
        .ok_or_else(|| "Player not found. You need to register first.".to_string())
}

fn party_creature_for(ctx: &ReducerContext, player_id: Identity, creature_uuid: &str) -> Result<CreatureSnapshot, String> {
    find_party_creature(ctx, player_id, creature_uuid)
        .ok_or_else(|| "That Pokémon is not in your party.".to_string())
}

// ============================================================================
// REDUCERS
// ============================================================================

/// Turns in a party creature for the caller's active solo hunt.
#[spacetimedb::reducer]
pub fn turn_in_hunt(ctx: &ReducerContext, difficulty: String, creature_uuid: String) -> Result<(), String> {
    let player_id = ctx.sender();
    let difficulty = HuntDifficulty::parse_solo(&difficulty)?;
    let name = player_name(ctx, player_id)?;
    let settings = current_settings(ctx);

    let mut data = get_or_init_player_hunt_data(ctx, player_id);
    let instance = data
        .active(difficulty)
        .cloned()
        .ok_or_else(|| HuntError::NoActiveHunt(difficulty).to_string())?;
    let creature = party_creature_for(ctx, player_id, &creature_uuid)?;
    let captured_at = capture_time(ctx, player_id, &creature_uuid);

    if let Err(rejection) = evaluate_turn_in(&instance, &creature, captured_at, settings.require_capture_after_start, ctx.timestamp) {
        log::info!("[HuntTurnIn] {} rejected for {} hunt: {}", name, difficulty, rejection);
        return Err(rejection.to_string());
    }

    let message = settle_turn_in(ctx, player_id, &name, &instance, &creature_uuid, &settings);
    data.complete_solo(difficulty, ctx.timestamp, settings.tier(difficulty).cooldown_secs);
    save_player_hunt_data(ctx, data);

    send_hunt_message(ctx, Some(player_id), &message, "hunt_completed");
    log::info!("[HuntTurnIn] {} completed a {} hunt for {}", name, difficulty, instance.entry.species);
    Ok(())
}

/// Turns in a party creature for global hunt `index`.
#[spacetimedb::reducer]
pub fn turn_in_global_hunt(ctx: &ReducerContext, index: u32, creature_uuid: String) -> Result<(), String> {
    let player_id = ctx.sender();
    let name = player_name(ctx, player_id)?;
    let settings = current_settings(ctx);

    let mut state = get_or_init_global_state(ctx);
    let mut data = get_or_init_player_hunt_data(ctx, player_id);
    let instance = state
        .available_slot(index, &data)
        .map_err(|e| e.to_string())?
        .instance
        .clone();
    let creature = party_creature_for(ctx, player_id, &creature_uuid)?;
    let captured_at = capture_time(ctx, player_id, &creature_uuid);

    if let Err(rejection) = evaluate_turn_in(&instance, &creature, captured_at, settings.require_capture_after_start, ctx.timestamp) {
        log::info!("[HuntTurnIn] {} rejected for global hunt #{}: {}", name, index, rejection);
        return Err(rejection.to_string());
    }

    let message = settle_turn_in(ctx, player_id, &name, &instance, &creature_uuid, &settings);
    data.mark_global_completed(index, state.generation);
    save_player_hunt_data(ctx, data);

    if settings.global.lock_on_completion {
        state.lock(index, player_id);
        save_global_state(ctx, state);
        send_hunt_message(
            ctx,
            None,
            &format!("{} completed the global hunt for {}!", name, instance.entry.display_name()),
            "global_completed",
        );
    }

    send_hunt_message(ctx, Some(player_id), &message, "hunt_completed");
    log::info!("[HuntTurnIn] {} completed global hunt #{} ({})", name, index, instance.entry.species);
    Ok(())
}

/// Host bridge: an item delivery was handed out.
#[spacetimedb::reducer]
pub fn acknowledge_reward_delivery(ctx: &ReducerContext, delivery_id: u64) -> Result<(), String> {
    require_permission(ctx, PERM_ADMIN)?;
    if !ctx.db.reward_delivery().id().delete(delivery_id) {
        return Err(format!("Reward delivery {} not found", delivery_id));
    }
    Ok(())
}

/// Host bridge: a reward command was executed.
#[spacetimedb::reducer]
pub fn acknowledge_command_dispatch(ctx: &ReducerContext, dispatch_id: u64) -> Result<(), String> {
    require_permission(ctx, PERM_ADMIN)?;
    if !ctx.db.command_dispatch().id().delete(dispatch_id) {
        return Err(format!("Command dispatch {} not found", dispatch_id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Gender, HuntPokemonEntry, IvSet, IvStat, Nature};
    use crate::utils::MICROS_PER_SECOND;

    fn ts(secs: i64) -> Timestamp {
        Timestamp::from_micros_since_unix_epoch(secs * MICROS_PER_SECOND)
    }

    fn hunt(species: &str) -> HuntInstance {
        HuntInstance {
            difficulty: HuntDifficulty::Normal,
            entry: HuntPokemonEntry::new(species, 1.0),
            required_gender: None,
            required_nature: None,
            required_ivs: Vec::new(),
            reward: None,
            started_at: Some(ts(100)),
            expires_at: Some(ts(200)),
        }
    }

    fn creature(species: &str, gender: Gender) -> CreatureSnapshot {
        CreatureSnapshot {
            uuid: "c-1".to_string(),
            species: species.to_string(),
            form: None,
            aspects: Vec::new(),
            gender,
            nature: Nature::Hardy,
            ivs: IvSet::default(),
        }
    }

    #[test]
    fn wrong_gender_is_the_only_reason() {
        let mut instance = hunt("pikachu");
        instance.required_gender = Some(Gender::Female);
        instance.required_nature = Some(Nature::Adamant);
        instance.required_ivs = vec![IvStat::Hp, IvStat::Speed];

        let mut mon = creature("Pikachu", Gender::Male);
        mon.nature = Nature::Adamant;
        mon.ivs.hp = 31;
        mon.ivs.speed = 22;
        assert_eq!(find_mismatches(&instance, &mon), vec!["Incorrect gender".to_string()]);

        mon.gender = Gender::Female;
        assert!(find_mismatches(&instance, &mon).is_empty());
    }

    #[test]
    fn full_match_has_no_reasons() {
        let mut instance = hunt("cobblemon:vulpix");
        instance.entry.form = Some("alolan".to_string());
        instance.entry.aspects = vec!["shiny".to_string()];
        instance.required_gender = Some(Gender::Female);
        instance.required_nature = Some(Nature::Timid);
        instance.required_ivs = vec![IvStat::Speed, IvStat::SpecialAttack];

        let mut mon = creature("vulpix", Gender::Female);
        mon.form = Some("Alolan".to_string());
        mon.aspects = vec!["SHINY".to_string(), "alolan".to_string()];
        mon.nature = Nature::Timid;
        mon.ivs.speed = 20;
        mon.ivs.special_attack = 31;

        assert!(find_mismatches(&instance, &mon).is_empty());
    }

    #[test]
    fn every_failed_check_is_reported() {
        let mut instance = hunt("gible");
        instance.entry.form = Some("galarian".to_string());
        instance.entry.aspects = vec!["shiny".to_string(), "marked".to_string()];
        instance.required_gender = Some(Gender::Female);
        instance.required_nature = Some(Nature::Jolly);
        instance.required_ivs = vec![IvStat::Hp, IvStat::Attack];

        let mut mon = creature("eevee", Gender::Male);
        mon.aspects = vec!["shiny".to_string()];
        mon.ivs.hp = 19;
        mon.ivs.attack = 25;

        assert_eq!(
            find_mismatches(&instance, &mon),
            vec![
                "Incorrect species".to_string(),
                "Incorrect form".to_string(),
                "Missing aspects: marked".to_string(),
                "Incorrect gender".to_string(),
                "Incorrect nature".to_string(),
                "HP IV must be at least 20".to_string(),
            ]
        );
    }

    #[test]
    fn normal_form_needs_no_match() {
        let mut instance = hunt("eevee");
        instance.entry.form = Some("normal".to_string());
        let mut mon = creature("eevee", Gender::Male);
        mon.form = Some("whatever".to_string());
        assert!(find_mismatches(&instance, &mon).is_empty());
    }

    #[test]
    fn expired_hunts_are_rejected_first() {
        let instance = hunt("pikachu");
        let mon = creature("ditto", Gender::Genderless);
        assert_eq!(evaluate_turn_in(&instance, &mon, None, true, ts(201)), Err(TurnInRejection::Expired));
        assert!(matches!(evaluate_turn_in(&instance, &mon, None, false, ts(200)), Err(TurnInRejection::Mismatch(_))));
    }

    #[test]
    fn capture_must_follow_hunt_start_when_required() {
        let instance = hunt("pikachu");
        let mon = creature("pikachu", Gender::Male);
        assert_eq!(evaluate_turn_in(&instance, &mon, Some(ts(99)), true, ts(150)), Err(TurnInRejection::CapturedBeforeStart));
        assert_eq!(evaluate_turn_in(&instance, &mon, None, true, ts(150)), Err(TurnInRejection::CaptureUnknown));
        assert_eq!(evaluate_turn_in(&instance, &mon, Some(ts(100)), true, ts(150)), Ok(()));
        assert_eq!(evaluate_turn_in(&instance, &mon, None, false, ts(150)), Ok(()));
    }

    #[test]
    fn missing_capture_record_has_its_own_message() {
        let instance = hunt("pikachu");
        let mon = creature("pikachu", Gender::Male);
        let rejection = evaluate_turn_in(&instance, &mon, None, true, ts(150)).unwrap_err();
        assert_ne!(rejection.to_string(), TurnInRejection::CapturedBeforeStart.to_string());
        assert!(rejection.to_string().contains("No recent capture"));
    }

    #[test]
    fn rejection_messages_list_reasons() {
        let rejection = TurnInRejection::Mismatch(vec!["Incorrect gender".to_string(), "Incorrect nature".to_string()]);
        assert_eq!(
            rejection.to_string(),
            "This Pokémon does not meet the requirements: Incorrect gender, Incorrect nature"
        );
    }

    #[test]
    fn commands_substitute_the_player_name() {
        assert_eq!(render_command("eco give %player% 100", "Ash"), "eco give Ash 100");
        assert_eq!(render_command("say %player% beat %player%", "Misty"), "say Misty beat Misty");
        assert_eq!(render_command("broadcast done", "Brock"), "broadcast done");
    }
}
