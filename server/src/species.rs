use spacetimedb::SpacetimeType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use lazy_static::lazy_static;

use crate::models::Gender;

/// Which genders a species can roll.
#[derive(SpacetimeType, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GenderProfile {
    Mixed,
    MaleOnly,
    FemaleOnly,
    Genderless,
}

impl GenderProfile {
    /// The only gender this species can have, if there is exactly one.
    pub fn single_gender(&self) -> Option<Gender> {
        match self {
            GenderProfile::Mixed => None,
            GenderProfile::MaleOnly => Some(Gender::Male),
            GenderProfile::FemaleOnly => Some(Gender::Female),
            GenderProfile::Genderless => Some(Gender::Genderless),
        }
    }
}

/// Per-species override carried in the hunt settings.
#[derive(SpacetimeType, Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SpeciesGender {
    pub species: String,
    pub profile: GenderProfile,
}

// --- Built-in gender catalog ---

lazy_static! {
    pub static ref SPECIES_GENDER_PROFILES: HashMap<&'static str, GenderProfile> = {
        let mut profiles = HashMap::new();

        // Male-only lines
        for species in [
            "nidoranm", "nidorino", "nidoking", "hitmonlee", "hitmonchan", "hitmontop",
            "tyrogue", "tauros", "volbeat", "gallade", "mothim", "throh", "sawk",
            "rufflet", "braviary", "tornadus", "thundurus", "landorus", "latios",
            "impidimp", "morgrem", "grimmsnarl", "okidogi", "munkidori", "fezandipiti",
        ] {
            profiles.insert(species, GenderProfile::MaleOnly);
        }

        // Female-only lines
        for species in [
            "nidoranf", "nidorina", "nidoqueen", "chansey", "blissey", "happiny",
            "kangaskhan", "jynx", "smoochum", "miltank", "illumise", "froslass",
            "vespiquen", "wormadam", "petilil", "lilligant", "vullaby", "mandibuzz",
            "flabebe", "floette", "florges", "bounsweet", "steenee", "tsareena",
            "salazzle", "hatenna", "hattrem", "hatterene", "milcery", "alcremie",
            "latias", "cresselia", "enamorus", "tinkatink", "tinkatuff", "tinkaton",
        ] {
            profiles.insert(species, GenderProfile::FemaleOnly);
        }

        // Genderless
        for species in [
            "magnemite", "magneton", "magnezone", "voltorb", "electrode", "staryu",
            "starmie", "porygon", "porygon2", "porygonz", "ditto", "beldum", "metang",
            "metagross", "bronzor", "bronzong", "baltoy", "claydol", "lunatone",
            "solrock", "shedinja", "unown", "rotom", "klink", "klang", "klinklang",
            "golett", "golurk", "cryogonal", "carbink", "minior", "dhelmise",
            "sinistea", "polteageist", "falinks", "dracozolt", "arctozolt",
            "dracovish", "arctovish", "gimmighoul", "gholdengo",
            // Legendary and mythical
            "articuno", "zapdos", "moltres", "mewtwo", "mew", "raikou", "entei",
            "suicune", "lugia", "hooh", "celebi", "regirock", "regice", "registeel",
            "kyogre", "groudon", "rayquaza", "jirachi", "deoxys", "uxie", "mesprit",
            "azelf", "dialga", "palkia", "giratina", "regigigas", "phione", "manaphy",
            "darkrai", "shaymin", "arceus", "victini", "cobalion", "terrakion",
            "virizion", "reshiram", "zekrom", "kyurem", "keldeo", "meloetta",
            "genesect", "xerneas", "yveltal", "zygarde", "diancie", "hoopa",
            "volcanion", "typenull", "silvally", "tapukoko", "tapulele", "tapubulu",
            "tapufini", "cosmog", "cosmoem", "solgaleo", "lunala", "nihilego",
            "buzzwole", "pheromosa", "xurkitree", "celesteela", "kartana", "guzzlord",
            "necrozma", "magearna", "marshadow", "poipole", "naganadel", "stakataka",
            "blacephalon", "zeraora", "meltan", "melmetal", "zacian", "zamazenta",
            "eternatus", "zarude", "regieleki", "regidrago", "glastrier", "spectrier",
            "calyrex", "wochien", "chienpao", "tinglu", "chiyu", "koraidon",
            "miraidon", "ogerpon", "terapagos", "pecharunt",
        ] {
            profiles.insert(species, GenderProfile::Genderless);
        }

        profiles
    };
}

/// Species lookup normalizes case, spaces, dashes and a `cobblemon:` namespace.
pub fn normalize_species(species: &str) -> String {
    let trimmed = species.trim();
    let without_namespace = trimmed.rsplit(':').next().unwrap_or(trimmed);
    without_namespace
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Gender profile for `species`: settings overrides first, then the built-in catalog.
pub fn gender_profile(species: &str, overrides: &[SpeciesGender]) -> GenderProfile {
    let key = normalize_species(species);
    if let Some(found) = overrides.iter().find(|o| normalize_species(&o.species) == key) {
        return found.profile;
    }
    SPECIES_GENDER_PROFILES
        .get(key.as_str())
        .copied()
        .unwrap_or(GenderProfile::Mixed)
}

/// Case-insensitive species equality over the normalized form.
pub fn same_species(a: &str, b: &str) -> bool {
    normalize_species(a) == normalize_species(b)
}
