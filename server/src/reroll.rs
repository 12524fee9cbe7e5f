//! # Hunt Rerolls
//!
//! Replaces a solo preview with a fresh roll, subject to a daily limit and a
//! currency cost. Counters reset when the UTC day changes; a configured
//! universal limit replaces the per-tier counters with one shared counter.
//! Usage lives in its own table so it survives reconnects.

use spacetimedb::{Identity, ReducerContext, SpacetimeType, Table};
use thiserror::Error;
use log;

use crate::economy::{resolve_currency, Economy, EconomyError, TableEconomy};
use crate::hunt_config::{current_settings, loot_pool, spawn_pool, HuntSettings};
use crate::hunt_generator::roll_hunt;
use crate::hunts::{get_or_init_player_hunt_data, save_player_hunt_data, send_hunt_message, PlayerHuntData};
use crate::models::{HuntDifficulty, HuntInstance};
use crate::permissions::{has_permission, require_permission, PERM_REROLL, PERM_REROLL_BYPASS_COST, PERM_REROLL_BYPASS_LIMIT};
use crate::species::same_species;
use crate::utils::day_index;

// Import table traits
use crate::reroll::player_reroll_usage as PlayerRerollUsageTableTrait;

/// Draws spent trying to avoid the previous species before accepting a duplicate.
pub const DUPLICATE_REROLL_ATTEMPTS: usize = 5;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RerollError {
    #[error("{0} hunts are disabled.")]
    TierDisabled(HuntDifficulty),
    #[error("You cannot reroll an active {0} hunt.")]
    ActiveHunt(HuntDifficulty),
    #[error("You have no {0} hunt to reroll. Open the hunts menu first.")]
    NoPreview(HuntDifficulty),
    #[error("You have used all {limit} rerolls for today.")]
    LimitReached { limit: u32 },
    #[error("No hunts are available to reroll into.")]
    EmptyPool,
    #[error(transparent)]
    Payment(#[from] EconomyError),
}

/// Limits and cost for one reroll, with bypasses already applied.
#[derive(Clone, Debug, PartialEq)]
pub struct RerollPolicy {
    /// 0 means unlimited.
    pub limit: u32,
    pub universal: bool,
    pub cost: u64,
    pub currency: String,
    pub bypass_limit: bool,
    pub bypass_cost: bool,
    pub prevent_duplicates: bool,
}

impl RerollPolicy {
    pub fn for_tier(settings: &HuntSettings, difficulty: HuntDifficulty, bypass_limit: bool, bypass_cost: bool) -> Self {
        let tier = settings.tier(difficulty);
        let (limit, universal) = match settings.universal_reroll_limit {
            Some(limit) => (limit, true),
            None => (tier.reroll_limit, false),
        };
        RerollPolicy {
            limit,
            universal,
            cost: tier.reroll_cost,
            currency: resolve_currency(&settings.reroll_currency, &settings.currencies),
            bypass_limit,
            bypass_cost,
            prevent_duplicates: settings.prevent_duplicate_reroll,
        }
    }

    fn charges(&self) -> bool {
        !self.bypass_cost && self.cost > 0
    }
}

#[derive(SpacetimeType, Clone, Debug, PartialEq)]
pub struct RerollCounter {
    pub difficulty: HuntDifficulty,
    pub used: u32,
}

/// Rerolls spent on `day` (UTC day index). Kept across disconnects.
#[spacetimedb::table(accessor = player_reroll_usage, public)]
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerRerollUsage {
    #[primary_key]
    pub player_id: Identity,
    pub day: i64,
    pub counters: Vec<RerollCounter>,
    pub universal: u32,
}

impl PlayerRerollUsage {
    pub fn new(player_id: Identity) -> Self {
        PlayerRerollUsage {
            player_id,
            day: 0,
            counters: Vec::new(),
            universal: 0,
        }
    }

    /// Rerolls already used today for `difficulty` (or the shared counter).
    pub fn used(&self, difficulty: HuntDifficulty, today: i64, universal: bool) -> u32 {
        if self.day != today {
            return 0;
        }
        if universal {
            return self.universal;
        }
        self.counters
            .iter()
            .find(|c| c.difficulty == difficulty)
            .map_or(0, |c| c.used)
    }

    fn record(&mut self, difficulty: HuntDifficulty, today: i64, universal: bool) {
        if self.day != today {
            self.day = today;
            self.counters.clear();
            self.universal = 0;
        }
        if universal {
            self.universal += 1;
            return;
        }
        match self.counters.iter_mut().find(|c| c.difficulty == difficulty) {
            Some(counter) => counter.used += 1,
            None => self.counters.push(RerollCounter { difficulty, used: 1 }),
        }
    }
}

fn load_reroll_usage(ctx: &ReducerContext, player_id: Identity) -> PlayerRerollUsage {
    ctx.db
        .player_reroll_usage()
        .player_id()
        .find(&player_id)
        .unwrap_or_else(|| PlayerRerollUsage::new(player_id))
}

fn save_reroll_usage(ctx: &ReducerContext, usage: PlayerRerollUsage) {
    let table = ctx.db.player_reroll_usage();
    if table.player_id().find(&usage.player_id).is_some() {
        table.player_id().update(usage);
    } else {
        table.insert(usage);
    }
}

/// Replaces the preview for `difficulty`. Nothing on `data`, `usage` or `economy`
/// changes unless the whole reroll succeeds.
pub fn reroll_preview<E, F>(
    data: &mut PlayerHuntData,
    usage: &mut PlayerRerollUsage,
    difficulty: HuntDifficulty,
    policy: &RerollPolicy,
    today: i64,
    economy: &mut E,
    mut roll: F,
) -> Result<HuntInstance, RerollError>
where
    E: Economy + ?Sized,
    F: FnMut() -> Option<HuntInstance>,
{
    if data.active(difficulty).is_some() {
        return Err(RerollError::ActiveHunt(difficulty));
    }
    let previous_species = data
        .preview(difficulty)
        .map(|p| p.entry.species.clone())
        .ok_or(RerollError::NoPreview(difficulty))?;

    let used = usage.used(difficulty, today, policy.universal);
    if !policy.bypass_limit && policy.limit > 0 && used >= policy.limit {
        return Err(RerollError::LimitReached { limit: policy.limit });
    }

    let attempts = if policy.prevent_duplicates { DUPLICATE_REROLL_ATTEMPTS } else { 1 };
    let mut candidate = None;
    for _ in 0..attempts {
        let rolled = roll().ok_or(RerollError::EmptyPool)?;
        let duplicate = same_species(&rolled.entry.species, &previous_species);
        candidate = Some(rolled);
        if !duplicate {
            break;
        }
    }
    let fresh = candidate.ok_or(RerollError::EmptyPool)?;

    if policy.charges() {
        economy.withdraw(data.player_id, &policy.currency, policy.cost)?;
    }

    usage.record(difficulty, today, policy.universal);
    data.set_preview(difficulty, fresh.clone());
    Ok(fresh)
}

fn remaining_text(usage: &PlayerRerollUsage, difficulty: HuntDifficulty, policy: &RerollPolicy, today: i64) -> String {
    if policy.bypass_limit || policy.limit == 0 {
        return "unlimited rerolls".to_string();
    }
    let used = usage.used(difficulty, today, policy.universal);
    format!("{} of {} rerolls left today", policy.limit.saturating_sub(used), policy.limit)
}

fn reroll_policy_for(ctx: &ReducerContext, player_id: Identity, settings: &HuntSettings, difficulty: HuntDifficulty) -> RerollPolicy {
    RerollPolicy::for_tier(
        settings,
        difficulty,
        has_permission(ctx, player_id, PERM_REROLL_BYPASS_LIMIT),
        has_permission(ctx, player_id, PERM_REROLL_BYPASS_COST),
    )
}

/// Rerolls the caller's preview for a solo difficulty.
#[spacetimedb::reducer]
pub fn reroll_hunt(ctx: &ReducerContext, difficulty: String) -> Result<(), String> {
    require_permission(ctx, PERM_REROLL)?;
    let player_id = ctx.sender();
    let difficulty = HuntDifficulty::parse_solo(&difficulty)?;
    let settings = current_settings(ctx);
    if !settings.tier(difficulty).enabled {
        return Err(RerollError::TierDisabled(difficulty).to_string());
    }

    let policy = reroll_policy_for(ctx, player_id, &settings, difficulty);
    let today = day_index(ctx.timestamp);
    let mut data = get_or_init_player_hunt_data(ctx, player_id);
    let mut usage = load_reroll_usage(ctx, player_id);
    let mut economy = TableEconomy::new(ctx);
    let pool = spawn_pool(ctx, difficulty);
    let loot = loot_pool(ctx, difficulty);
    let mut rng = ctx.rng();

    let fresh = reroll_preview(&mut data, &mut usage, difficulty, &policy, today, &mut economy, || {
        roll_hunt(difficulty, &pool, &loot, &settings, &mut rng)
    })
    .map_err(|e| {
        log::info!("[HuntReroll] {:?} reroll of {} rejected: {}", player_id, difficulty, e);
        e.to_string()
    })?;

    let mut message = format!("Rerolled your {} hunt: {}", difficulty, fresh.summary());
    if policy.charges() {
        message.push_str(&format!(" (-{} {})", policy.cost, policy.currency));
    }
    message.push_str(&format!(". {}.", remaining_text(&usage, difficulty, &policy, today)));
    save_player_hunt_data(ctx, data);
    save_reroll_usage(ctx, usage);

    send_hunt_message(ctx, Some(player_id), &message, "hunt_rerolled");
    log::info!("[HuntReroll] {:?} rerolled {} into {}", player_id, difficulty, fresh.entry.species);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::economy::tests::FakeEconomy;
    use crate::models::HuntPokemonEntry;

    const DAY: i64 = 20_000;

    fn player() -> Identity {
        Identity::from_byte_array([9; 32])
    }

    fn instance(species: &str) -> HuntInstance {
        HuntInstance {
            difficulty: HuntDifficulty::Easy,
            entry: HuntPokemonEntry::new(species, 1.0),
            required_gender: None,
            required_nature: None,
            required_ivs: Vec::new(),
            reward: None,
            started_at: None,
            expires_at: None,
        }
    }

    fn data_with_preview(species: &str) -> PlayerHuntData {
        let mut data = PlayerHuntData::new(player());
        data.set_preview(HuntDifficulty::Easy, instance(species));
        data
    }

    fn free_policy(limit: u32) -> RerollPolicy {
        RerollPolicy {
            limit,
            universal: false,
            cost: 0,
            currency: "primary".to_string(),
            bypass_limit: false,
            bypass_cost: false,
            prevent_duplicates: false,
        }
    }

    #[test]
    fn fourth_reroll_in_a_day_is_rejected() {
        let mut data = data_with_preview("pidgey");
        let mut usage = PlayerRerollUsage::new(player());
        let mut economy = FakeEconomy::default();
        let policy = free_policy(3);
        for n in 0..3 {
            let fresh = reroll_preview(&mut data, &mut usage, HuntDifficulty::Easy, &policy, DAY, &mut economy, || Some(instance(&format!("mon{}", n))));
            assert!(fresh.is_ok());
        }
        let before = (data.clone(), usage.clone());
        let fourth = reroll_preview(&mut data, &mut usage, HuntDifficulty::Easy, &policy, DAY, &mut economy, || Some(instance("rattata")));
        assert_eq!(fourth, Err(RerollError::LimitReached { limit: 3 }));
        assert_eq!((data.clone(), usage.clone()), before);
        assert_eq!(data.preview(HuntDifficulty::Easy).unwrap().entry.species, "mon2");
    }

    #[test]
    fn counters_reset_on_a_new_day() {
        let mut data = data_with_preview("pidgey");
        let mut usage = PlayerRerollUsage::new(player());
        let mut economy = FakeEconomy::default();
        let policy = free_policy(1);
        assert!(reroll_preview(&mut data, &mut usage, HuntDifficulty::Easy, &policy, DAY, &mut economy, || Some(instance("a"))).is_ok());
        assert!(reroll_preview(&mut data, &mut usage, HuntDifficulty::Easy, &policy, DAY, &mut economy, || Some(instance("b"))).is_err());
        assert!(reroll_preview(&mut data, &mut usage, HuntDifficulty::Easy, &policy, DAY + 1, &mut economy, || Some(instance("c"))).is_ok());
        assert_eq!(usage.used(HuntDifficulty::Easy, DAY + 1, false), 1);
    }

    #[test]
    fn zero_limit_and_bypass_are_unlimited() {
        let mut data = data_with_preview("pidgey");
        let mut usage = PlayerRerollUsage::new(player());
        let mut economy = FakeEconomy::default();
        let unlimited = free_policy(0);
        for _ in 0..10 {
            assert!(reroll_preview(&mut data, &mut usage, HuntDifficulty::Easy, &unlimited, DAY, &mut economy, || Some(instance("a"))).is_ok());
        }
        let bypass = RerollPolicy { bypass_limit: true, ..free_policy(1) };
        assert!(reroll_preview(&mut data, &mut usage, HuntDifficulty::Easy, &bypass, DAY, &mut economy, || Some(instance("b"))).is_ok());
    }

    #[test]
    fn failed_payment_changes_nothing() {
        let mut data = data_with_preview("pidgey");
        let mut usage = PlayerRerollUsage::new(player());
        let mut economy = FakeEconomy::with_balance(player(), "primary", 40);
        let policy = RerollPolicy { cost: 50, ..free_policy(3) };
        let before = (data.clone(), usage.clone());

        let result = reroll_preview(&mut data, &mut usage, HuntDifficulty::Easy, &policy, DAY, &mut economy, || Some(instance("rattata")));
        assert!(matches!(result, Err(RerollError::Payment(EconomyError::InsufficientFunds { .. }))));
        assert_eq!((data, usage), before);
        assert_eq!(economy.balance(player(), "primary"), 40);
    }

    #[test]
    fn successful_payment_is_withdrawn() {
        let mut data = data_with_preview("pidgey");
        let mut usage = PlayerRerollUsage::new(player());
        let mut economy = FakeEconomy::with_balance(player(), "primary", 120);
        let policy = RerollPolicy { cost: 50, ..free_policy(3) };
        assert!(reroll_preview(&mut data, &mut usage, HuntDifficulty::Easy, &policy, DAY, &mut economy, || Some(instance("rattata"))).is_ok());
        assert_eq!(economy.balance(player(), "primary"), 70);

        let free = RerollPolicy { bypass_cost: true, ..policy };
        assert!(reroll_preview(&mut data, &mut usage, HuntDifficulty::Easy, &free, DAY, &mut economy, || Some(instance("spearow"))).is_ok());
        assert_eq!(economy.balance(player(), "primary"), 70);
    }

    #[test]
    fn universal_limit_is_shared_across_tiers() {
        let mut settings = HuntSettings::default();
        settings.universal_reroll_limit = Some(2);
        let policy = RerollPolicy::for_tier(&settings, HuntDifficulty::Easy, false, false);
        assert!(policy.universal);
        assert_eq!(policy.limit, 2);

        let mut data = data_with_preview("pidgey");
        data.set_preview(HuntDifficulty::Hard, instance("gible"));
        let mut usage = PlayerRerollUsage::new(player());
        let mut economy = FakeEconomy::default();
        let free = RerollPolicy { cost: 0, ..policy };
        assert!(reroll_preview(&mut data, &mut usage, HuntDifficulty::Easy, &free, DAY, &mut economy, || Some(instance("a"))).is_ok());
        assert!(reroll_preview(&mut data, &mut usage, HuntDifficulty::Hard, &free, DAY, &mut economy, || Some(instance("b"))).is_ok());
        assert_eq!(
            reroll_preview(&mut data, &mut usage, HuntDifficulty::Easy, &free, DAY, &mut economy, || Some(instance("c"))),
            Err(RerollError::LimitReached { limit: 2 })
        );
    }

    #[test]
    fn duplicate_species_is_avoided_while_possible() {
        let mut data = data_with_preview("pidgey");
        let mut usage = PlayerRerollUsage::new(player());
        let mut economy = FakeEconomy::default();
        let policy = RerollPolicy { prevent_duplicates: true, ..free_policy(0) };

        let mut draws = vec!["rattata", "Pidgey", "pidgey"];
        let fresh = reroll_preview(&mut data, &mut usage, HuntDifficulty::Easy, &policy, DAY, &mut economy, || draws.pop().map(instance)).unwrap();
        assert_eq!(fresh.entry.species, "rattata");

        // Only duplicates available: accepted after the attempts run out
        let mut calls = 0;
        let fresh = reroll_preview(&mut data, &mut usage, HuntDifficulty::Easy, &policy, DAY, &mut economy, || {
            calls += 1;
            Some(instance("rattata"))
        })
        .unwrap();
        assert_eq!(calls, DUPLICATE_REROLL_ATTEMPTS);
        assert_eq!(fresh.entry.species, "rattata");
    }

    #[test]
    fn active_hunts_and_missing_previews_cannot_be_rerolled() {
        let mut usage = PlayerRerollUsage::new(player());
        let mut economy = FakeEconomy::default();
        let policy = free_policy(3);
        let mut empty = PlayerHuntData::new(player());
        assert_eq!(
            reroll_preview(&mut empty, &mut usage, HuntDifficulty::Easy, &policy, DAY, &mut economy, || Some(instance("a"))),
            Err(RerollError::NoPreview(HuntDifficulty::Easy))
        );

        let mut data = data_with_preview("pidgey");
        let now = spacetimedb::Timestamp::from_micros_since_unix_epoch(0);
        data.activate(HuntDifficulty::Easy, now, 60).unwrap();
        data.set_preview(HuntDifficulty::Easy, instance("rattata"));
        assert_eq!(
            reroll_preview(&mut data, &mut usage, HuntDifficulty::Easy, &policy, DAY, &mut economy, || Some(instance("a"))),
            Err(RerollError::ActiveHunt(HuntDifficulty::Easy))
        );
    }

    #[test]
    fn usage_outlives_a_fresh_hunt_row() {
        let mut economy = FakeEconomy::default();
        let mut usage = PlayerRerollUsage::new(player());
        let policy = free_policy(3);
        let mut data = data_with_preview("pidgey");
        for n in 0..3 {
            assert!(reroll_preview(&mut data, &mut usage, HuntDifficulty::Easy, &policy, DAY, &mut economy, || Some(instance(&format!("mon{}", n)))).is_ok());
        }

        // Reconnecting rebuilds hunt data but keeps the day's usage
        let mut reconnected = data_with_preview("caterpie");
        assert_eq!(
            reroll_preview(&mut reconnected, &mut usage, HuntDifficulty::Easy, &policy, DAY, &mut economy, || Some(instance("weedle"))),
            Err(RerollError::LimitReached { limit: 3 })
        );
        assert_eq!(usage.used(HuntDifficulty::Easy, DAY, false), 3);
        assert_eq!(usage.used(HuntDifficulty::Easy, DAY + 1, false), 0);
    }

    #[test]
    fn unknown_reroll_currency_uses_primary() {
        let mut settings = HuntSettings::default();
        settings.reroll_currency = "gems".to_string();
        let policy = RerollPolicy::for_tier(&settings, HuntDifficulty::Normal, false, false);
        assert_eq!(policy.currency, "primary");
    }
}
