//! # Hunt Generator
//!
//! Turns a weighted spawn pool into a concrete [`HuntInstance`]: picks an entry,
//! resolves the constraints the difficulty calls for, and draws the reward.
//! Everything here is pure over an injected RNG.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use log;

use crate::hunt_config::{GlobalSettings, HuntSettings};
use crate::models::{Gender, HuntDifficulty, HuntInstance, HuntPokemonEntry, IvStat, LootReward, Nature};
use crate::species::{gender_profile, normalize_species, SpeciesGender};
use crate::utils::{weighted_pick, weighted_pick_excluding};

/// Which constraints get resolved for a roll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConstraintRules {
    pub gender: bool,
    pub nature: bool,
    /// Default IV count; 0 disables IV requirements.
    pub iv_count: u8,
}

impl ConstraintRules {
    pub fn for_difficulty(difficulty: HuntDifficulty, settings: &HuntSettings) -> Self {
        match difficulty {
            HuntDifficulty::Easy => ConstraintRules { gender: false, nature: false, iv_count: 0 },
            HuntDifficulty::Normal => ConstraintRules { gender: true, nature: false, iv_count: 0 },
            HuntDifficulty::Medium => ConstraintRules { gender: true, nature: true, iv_count: 0 },
            HuntDifficulty::Hard => ConstraintRules {
                gender: true,
                nature: true,
                iv_count: settings.tiers.hard.iv_count,
            },
            HuntDifficulty::Global => Self::for_global(&settings.global),
        }
    }

    fn for_global(global: &GlobalSettings) -> Self {
        ConstraintRules {
            gender: global.resolve_gender,
            nature: global.resolve_nature,
            iv_count: global.iv_count,
        }
    }

    /// IVs only apply where the difficulty enables them; entries may raise or lower the count.
    fn ivs_enabled(&self, difficulty: HuntDifficulty) -> bool {
        match difficulty {
            HuntDifficulty::Hard => true,
            HuntDifficulty::Global => self.iv_count > 0,
            _ => false,
        }
    }
}

pub fn resolve_gender<R: Rng + ?Sized>(
    entry: &HuntPokemonEntry,
    overrides: &[SpeciesGender],
    rng: &mut R,
) -> Gender {
    if let Some(explicit) = entry.gender {
        return explicit;
    }
    if let Some(single) = gender_profile(&entry.species, overrides).single_gender() {
        return single;
    }
    if rng.gen_bool(0.5) { Gender::Male } else { Gender::Female }
}

pub fn resolve_nature<R: Rng + ?Sized>(entry: &HuntPokemonEntry, rng: &mut R) -> Nature {
    match entry.nature {
        Some(nature) => nature,
        None => Nature::ALL[rng.gen_range(0..Nature::ALL.len())],
    }
}

/// Draws `count` distinct stats, returned in canonical stat order.
pub fn resolve_ivs<R: Rng + ?Sized>(count: u8, rng: &mut R) -> Vec<IvStat> {
    let count = (count as usize).min(IvStat::ALL.len());
    let mut stats: Vec<IvStat> = IvStat::ALL.choose_multiple(rng, count).copied().collect();
    stats.sort();
    stats
}

/// Builds an unstarted instance from an already chosen entry.
pub fn build_instance<R: Rng + ?Sized>(
    difficulty: HuntDifficulty,
    entry: &HuntPokemonEntry,
    loot: &[LootReward],
    settings: &HuntSettings,
    rng: &mut R,
) -> HuntInstance {
    let rules = ConstraintRules::for_difficulty(difficulty, settings);

    let required_gender = if rules.gender {
        Some(resolve_gender(entry, &settings.species_genders, rng))
    } else {
        None
    };
    let required_nature = if rules.nature { Some(resolve_nature(entry, rng)) } else { None };
    let required_ivs = if rules.ivs_enabled(difficulty) {
        resolve_ivs(entry.iv_count.unwrap_or(rules.iv_count), rng)
    } else {
        Vec::new()
    };

    let reward = weighted_pick(loot, rng).cloned();
    if reward.is_none() {
        log::warn!("[Hunts] {} loot table is empty, hunt for {} has no reward", difficulty, entry.species);
    }

    HuntInstance {
        difficulty,
        entry: entry.clone(),
        required_gender,
        required_nature,
        required_ivs,
        reward,
        started_at: None,
        expires_at: None,
    }
}

/// Rolls one hunt from `pool`. Returns `None` (with a warning) for an empty pool.
pub fn roll_hunt<R: Rng + ?Sized>(
    difficulty: HuntDifficulty,
    pool: &[HuntPokemonEntry],
    loot: &[LootReward],
    settings: &HuntSettings,
    rng: &mut R,
) -> Option<HuntInstance> {
    let Some(entry) = weighted_pick(pool, rng) else {
        log::warn!("[Hunts] {} spawn table is empty, cannot roll a hunt", difficulty);
        return None;
    };
    Some(build_instance(difficulty, entry, loot, settings, rng))
}

/// Rolls `count` global hunts, avoiding repeated species while the pool allows.
pub fn roll_global_pool<R: Rng + ?Sized>(
    count: u32,
    pool: &[HuntPokemonEntry],
    loot: &[LootReward],
    settings: &HuntSettings,
    rng: &mut R,
) -> Vec<HuntInstance> {
    if pool.is_empty() {
        log::warn!("[GlobalHunts] Global spawn table is empty, no global hunts generated");
        return Vec::new();
    }

    let mut used_species: HashSet<String> = HashSet::new();
    let mut hunts = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let Some(entry) = weighted_pick_excluding(pool, &used_species, |e| normalize_species(&e.species), rng) else {
            break;
        };
        used_species.insert(normalize_species(&entry.species));
        hunts.push(build_instance(HuntDifficulty::Global, entry, loot, settings, rng));
    }
    hunts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemReward;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn loot() -> Vec<LootReward> {
        vec![LootReward::Item(ItemReward {
            chance: 1.0,
            item_id: "cobblemon:poke_ball".to_string(),
            count: 3,
            data: None,
        })]
    }

    #[test]
    fn easy_hunts_have_no_constraints() {
        let mut rng = StdRng::seed_from_u64(1);
        let settings = HuntSettings::default();
        let pool = vec![HuntPokemonEntry::new("pidgey", 1.0)];
        let hunt = roll_hunt(HuntDifficulty::Easy, &pool, &loot(), &settings, &mut rng).unwrap();
        assert_eq!(hunt.required_gender, None);
        assert_eq!(hunt.required_nature, None);
        assert!(hunt.required_ivs.is_empty());
        assert!(hunt.reward.is_some());
        assert_eq!(hunt.started_at, None);
    }

    #[test]
    fn normal_resolves_gender_only() {
        let mut rng = StdRng::seed_from_u64(2);
        let settings = HuntSettings::default();
        let pool = vec![HuntPokemonEntry::new("eevee", 1.0)];
        let hunt = roll_hunt(HuntDifficulty::Normal, &pool, &loot(), &settings, &mut rng).unwrap();
        assert!(matches!(hunt.required_gender, Some(Gender::Male) | Some(Gender::Female)));
        assert_eq!(hunt.required_nature, None);
    }

    #[test]
    fn single_gender_species_resolve_deterministically() {
        let mut rng = StdRng::seed_from_u64(3);
        let settings = HuntSettings::default();
        let pool = vec![HuntPokemonEntry::new("tauros", 1.0)];
        for _ in 0..50 {
            let hunt = roll_hunt(HuntDifficulty::Medium, &pool, &loot(), &settings, &mut rng).unwrap();
            assert_eq!(hunt.required_gender, Some(Gender::Male));
            assert!(hunt.required_nature.is_some());
        }
    }

    #[test]
    fn explicit_entry_values_win() {
        let mut rng = StdRng::seed_from_u64(4);
        let settings = HuntSettings::default();
        let mut entry = HuntPokemonEntry::new("eevee", 1.0);
        entry.gender = Some(Gender::Female);
        entry.nature = Some(Nature::Adamant);
        let hunt = roll_hunt(HuntDifficulty::Medium, &[entry], &loot(), &settings, &mut rng).unwrap();
        assert_eq!(hunt.required_gender, Some(Gender::Female));
        assert_eq!(hunt.required_nature, Some(Nature::Adamant));
    }

    #[test]
    fn hard_draws_distinct_ivs() {
        let mut rng = StdRng::seed_from_u64(5);
        let settings = HuntSettings::default();
        let mut entry = HuntPokemonEntry::new("dratini", 1.0);
        entry.iv_count = Some(4);
        for _ in 0..50 {
            let hunt = roll_hunt(HuntDifficulty::Hard, &[entry.clone()], &loot(), &settings, &mut rng).unwrap();
            assert_eq!(hunt.required_ivs.len(), 4);
            let unique: HashSet<_> = hunt.required_ivs.iter().collect();
            assert_eq!(unique.len(), 4);
        }
        let plain = HuntPokemonEntry::new("gible", 1.0);
        let hunt = roll_hunt(HuntDifficulty::Hard, &[plain], &loot(), &settings, &mut rng).unwrap();
        assert_eq!(hunt.required_ivs.len(), settings.tiers.hard.iv_count as usize);
    }

    #[test]
    fn iv_count_is_capped_at_six() {
        let mut rng = StdRng::seed_from_u64(6);
        assert_eq!(resolve_ivs(9, &mut rng).len(), 6);
        assert!(resolve_ivs(0, &mut rng).is_empty());
    }

    #[test]
    fn empty_pools_yield_nothing() {
        let mut rng = StdRng::seed_from_u64(7);
        let settings = HuntSettings::default();
        assert!(roll_hunt(HuntDifficulty::Easy, &[], &loot(), &settings, &mut rng).is_none());
        assert!(roll_global_pool(3, &[], &loot(), &settings, &mut rng).is_empty());

        let pool = vec![HuntPokemonEntry::new("pidgey", 1.0)];
        let hunt = roll_hunt(HuntDifficulty::Easy, &pool, &[], &settings, &mut rng).unwrap();
        assert!(hunt.reward.is_none());
    }

    #[test]
    fn global_pool_avoids_duplicate_species_while_possible() {
        let mut rng = StdRng::seed_from_u64(8);
        let settings = HuntSettings::default();
        let pool = vec![
            HuntPokemonEntry::new("pikachu", 50.0),
            HuntPokemonEntry::new("Pikachu", 50.0),
            HuntPokemonEntry::new("bulbasaur", 1.0),
            HuntPokemonEntry::new("squirtle", 1.0),
        ];
        for _ in 0..20 {
            let hunts = roll_global_pool(3, &pool, &loot(), &settings, &mut rng);
            assert_eq!(hunts.len(), 3);
            let species: HashSet<String> = hunts.iter().map(|h| normalize_species(&h.entry.species)).collect();
            assert_eq!(species.len(), 3);
        }
        // More hunts than species: duplicates are allowed once exhausted
        let hunts = roll_global_pool(5, &pool, &loot(), &settings, &mut rng);
        assert_eq!(hunts.len(), 5);
    }

    #[test]
    fn global_constraints_follow_global_settings() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut settings = HuntSettings::default();
        settings.global.resolve_gender = false;
        settings.global.resolve_nature = true;
        settings.global.iv_count = 1;
        let pool = vec![HuntPokemonEntry::new("riolu", 1.0)];
        let hunts = roll_global_pool(1, &pool, &loot(), &settings, &mut rng);
        assert_eq!(hunts[0].required_gender, None);
        assert!(hunts[0].required_nature.is_some());
        assert_eq!(hunts[0].required_ivs.len(), 1);
        assert_eq!(hunts[0].difficulty, HuntDifficulty::Global);
    }
}
