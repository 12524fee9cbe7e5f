use spacetimedb::{SpacetimeType, Timestamp};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::Weighted;

/// Hunt difficulty. The four solo tiers plus the shared global category.
#[derive(SpacetimeType, Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HuntDifficulty {
    Easy,
    Normal,
    Medium,
    Hard,
    Global,
}

impl HuntDifficulty {
    pub const SOLO: [HuntDifficulty; 4] = [
        HuntDifficulty::Easy,
        HuntDifficulty::Normal,
        HuntDifficulty::Medium,
        HuntDifficulty::Hard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HuntDifficulty::Easy => "easy",
            HuntDifficulty::Normal => "normal",
            HuntDifficulty::Medium => "medium",
            HuntDifficulty::Hard => "hard",
            HuntDifficulty::Global => "global",
        }
    }

    pub fn is_solo(&self) -> bool {
        !matches!(self, HuntDifficulty::Global)
    }

    /// Parses a solo difficulty name as typed by a player.
    pub fn parse_solo(value: &str) -> Result<HuntDifficulty, String> {
        match value.parse::<HuntDifficulty>() {
            Ok(d) if d.is_solo() => Ok(d),
            Ok(_) => Err("Global hunts are turned in by index".to_string()),
            Err(e) => Err(e),
        }
    }
}

impl FromStr for HuntDifficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(HuntDifficulty::Easy),
            "normal" => Ok(HuntDifficulty::Normal),
            "medium" => Ok(HuntDifficulty::Medium),
            "hard" => Ok(HuntDifficulty::Hard),
            "global" => Ok(HuntDifficulty::Global),
            other => Err(format!("Unknown hunt difficulty '{}'", other)),
        }
    }
}

impl fmt::Display for HuntDifficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HuntDifficulty::Easy => "Easy",
            HuntDifficulty::Normal => "Normal",
            HuntDifficulty::Medium => "Medium",
            HuntDifficulty::Hard => "Hard",
            HuntDifficulty::Global => "Global",
        };
        f.write_str(label)
    }
}

#[derive(SpacetimeType, Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Genderless,
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "genderless" => Ok(Gender::Genderless),
            other => Err(format!("Unknown gender '{}'", other)),
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gender::Male => f.write_str("Male"),
            Gender::Female => f.write_str("Female"),
            Gender::Genderless => f.write_str("Genderless"),
        }
    }
}

#[derive(SpacetimeType, Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Nature {
    Hardy,
    Lonely,
    Brave,
    Adamant,
    Naughty,
    Bold,
    Docile,
    Relaxed,
    Impish,
    Lax,
    Timid,
    Hasty,
    Serious,
    Jolly,
    Naive,
    Modest,
    Mild,
    Quiet,
    Bashful,
    Rash,
    Calm,
    Gentle,
    Sassy,
    Careful,
    Quirky,
}

impl Nature {
    pub const ALL: [Nature; 25] = [
        Nature::Hardy, Nature::Lonely, Nature::Brave, Nature::Adamant, Nature::Naughty,
        Nature::Bold, Nature::Docile, Nature::Relaxed, Nature::Impish, Nature::Lax,
        Nature::Timid, Nature::Hasty, Nature::Serious, Nature::Jolly, Nature::Naive,
        Nature::Modest, Nature::Mild, Nature::Quiet, Nature::Bashful, Nature::Rash,
        Nature::Calm, Nature::Gentle, Nature::Sassy, Nature::Careful, Nature::Quirky,
    ];
}

impl FromStr for Nature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Nature::ALL
            .iter()
            .copied()
            .find(|n| format!("{:?}", n).eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("Unknown nature '{}'", wanted))
    }
}

impl fmt::Display for Nature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(SpacetimeType, Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum IvStat {
    Hp,
    Attack,
    Defence,
    SpecialAttack,
    SpecialDefence,
    Speed,
}

impl IvStat {
    pub const ALL: [IvStat; 6] = [
        IvStat::Hp,
        IvStat::Attack,
        IvStat::Defence,
        IvStat::SpecialAttack,
        IvStat::SpecialDefence,
        IvStat::Speed,
    ];
}

impl fmt::Display for IvStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IvStat::Hp => "HP",
            IvStat::Attack => "Attack",
            IvStat::Defence => "Defence",
            IvStat::SpecialAttack => "Sp. Atk",
            IvStat::SpecialDefence => "Sp. Def",
            IvStat::Speed => "Speed",
        };
        f.write_str(label)
    }
}

/// Individual values of a creature, 0..=31 each.
#[derive(SpacetimeType, Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct IvSet {
    pub hp: u8,
    pub attack: u8,
    pub defence: u8,
    pub special_attack: u8,
    pub special_defence: u8,
    pub speed: u8,
}

impl IvSet {
    pub fn get(&self, stat: IvStat) -> u8 {
        match stat {
            IvStat::Hp => self.hp,
            IvStat::Attack => self.attack,
            IvStat::Defence => self.defence,
            IvStat::SpecialAttack => self.special_attack,
            IvStat::SpecialDefence => self.special_defence,
            IvStat::Speed => self.speed,
        }
    }
}

/// Accepts `null`, a missing field or `"random"` as "no fixed value".
fn random_or_value<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr<Err = String>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) if s.trim().is_empty() || s.trim().eq_ignore_ascii_case("random") => Ok(None),
        Some(s) => s.parse::<T>().map(Some).map_err(serde::de::Error::custom),
    }
}

/// One weighted row of a spawn table.
#[derive(SpacetimeType, Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HuntPokemonEntry {
    pub species: String,
    #[serde(default)]
    pub form: Option<String>,
    #[serde(default)]
    pub aspects: Vec<String>,
    #[serde(default = "default_chance")]
    pub chance: f64,
    #[serde(default, deserialize_with = "random_or_value")]
    pub gender: Option<Gender>,
    #[serde(default, deserialize_with = "random_or_value")]
    pub nature: Option<Nature>,
    #[serde(default)]
    pub iv_count: Option<u8>,
}

fn default_chance() -> f64 {
    1.0
}

impl HuntPokemonEntry {
    pub fn new(species: &str, chance: f64) -> Self {
        HuntPokemonEntry {
            species: species.to_string(),
            form: None,
            aspects: Vec::new(),
            chance,
            gender: None,
            nature: None,
            iv_count: None,
        }
    }

    /// Display name, e.g. "Shiny Alolan Vulpix".
    pub fn display_name(&self) -> String {
        let mut parts: Vec<String> = self.aspects.iter().map(|a| capitalize(a)).collect();
        if let Some(form) = &self.form {
            parts.push(capitalize(form));
        }
        parts.push(capitalize(&self.species));
        parts.join(" ")
    }
}

impl Weighted for HuntPokemonEntry {
    fn weight(&self) -> f64 {
        self.chance
    }
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[derive(SpacetimeType, Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ItemReward {
    pub chance: f64,
    pub item_id: String,
    #[serde(default = "default_count")]
    pub count: u32,
    /// Serialized item payload (components/NBT), passed through to the host.
    #[serde(default)]
    pub data: Option<String>,
}

fn default_count() -> u32 {
    1
}

#[derive(SpacetimeType, Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CommandReward {
    pub chance: f64,
    /// Console command; `%player%` is replaced with the player's name.
    pub command: String,
    /// Serialized item shown in menus for this reward.
    #[serde(default)]
    pub display_item: String,
}

/// Written as `{"type": "item" | "command", ...}`. Read through a flat row:
/// internally tagged enums cannot read numbers under serde_json's `arbitrary_precision`.
#[derive(SpacetimeType, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase", try_from = "RawLootReward")]
pub enum LootReward {
    Item(ItemReward),
    Command(CommandReward),
}

#[derive(Deserialize)]
struct RawLootReward {
    #[serde(rename = "type")]
    kind: String,
    chance: f64,
    #[serde(default)]
    item_id: Option<String>,
    #[serde(default = "default_count")]
    count: u32,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    display_item: String,
}

impl TryFrom<RawLootReward> for LootReward {
    type Error = String;

    fn try_from(raw: RawLootReward) -> Result<Self, Self::Error> {
        match raw.kind.to_ascii_lowercase().as_str() {
            "item" => {
                let item_id = raw.item_id.ok_or("item reward is missing `item_id`")?;
                Ok(LootReward::Item(ItemReward {
                    chance: raw.chance,
                    item_id,
                    count: raw.count,
                    data: raw.data,
                }))
            }
            "command" => {
                let command = raw.command.ok_or("command reward is missing `command`")?;
                Ok(LootReward::Command(CommandReward {
                    chance: raw.chance,
                    command,
                    display_item: raw.display_item,
                }))
            }
            other => Err(format!("unknown reward type '{}'", other)),
        }
    }
}

impl LootReward {
    pub fn describe(&self) -> String {
        match self {
            LootReward::Item(item) => format!("{}x {}", item.count, item.item_id),
            LootReward::Command(cmd) => {
                if cmd.display_item.is_empty() {
                    "a special reward".to_string()
                } else {
                    cmd.display_item.clone()
                }
            }
        }
    }
}

impl Weighted for LootReward {
    fn weight(&self) -> f64 {
        match self {
            LootReward::Item(item) => item.chance,
            LootReward::Command(cmd) => cmd.chance,
        }
    }
}

/// A rolled hunt with its constraints resolved.
#[derive(SpacetimeType, Clone, Debug, PartialEq)]
pub struct HuntInstance {
    pub difficulty: HuntDifficulty,
    pub entry: HuntPokemonEntry,
    pub required_gender: Option<Gender>,
    pub required_nature: Option<Nature>,
    pub required_ivs: Vec<IvStat>,
    pub reward: Option<LootReward>,
    pub started_at: Option<Timestamp>,
    pub expires_at: Option<Timestamp>,
}

impl HuntInstance {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        match self.expires_at {
            Some(expires_at) => now.to_micros_since_unix_epoch() > expires_at.to_micros_since_unix_epoch(),
            None => false,
        }
    }

    /// One-line summary used in chat messages.
    pub fn summary(&self) -> String {
        let mut text = self.entry.display_name();
        if let Some(gender) = self.required_gender {
            text.push_str(&format!(" | {}", gender));
        }
        if let Some(nature) = self.required_nature {
            text.push_str(&format!(" | {}", nature));
        }
        if !self.required_ivs.is_empty() {
            let stats: Vec<String> = self.required_ivs.iter().map(|s| s.to_string()).collect();
            text.push_str(&format!(" | IVs: {}", stats.join(", ")));
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_parses_case_insensitively() {
        assert_eq!("HARD".parse::<HuntDifficulty>(), Ok(HuntDifficulty::Hard));
        assert_eq!(" normal ".parse::<HuntDifficulty>(), Ok(HuntDifficulty::Normal));
        assert!("legendary".parse::<HuntDifficulty>().is_err());
        assert!(HuntDifficulty::parse_solo("global").is_err());
    }

    #[test]
    fn nature_lookup_ignores_case() {
        assert_eq!("adamant".parse::<Nature>(), Ok(Nature::Adamant));
        assert_eq!("JOLLY".parse::<Nature>(), Ok(Nature::Jolly));
        assert!("grumpy".parse::<Nature>().is_err());
    }

    #[test]
    fn entry_treats_random_as_unset() {
        let json = r#"{"species":"eevee","chance":3.5,"gender":"random","nature":"Modest","iv_count":2}"#;
        let entry: HuntPokemonEntry = serde_json::from_str(json).expect("entry should parse");
        assert_eq!(entry.gender, None);
        assert_eq!(entry.nature, Some(Nature::Modest));
        assert_eq!(entry.iv_count, Some(2));
        assert!(entry.aspects.is_empty());
    }

    #[test]
    fn entry_rejects_unknown_gender() {
        let json = r#"{"species":"eevee","gender":"sometimes"}"#;
        assert!(serde_json::from_str::<HuntPokemonEntry>(json).is_err());
    }

    #[test]
    fn loot_reward_is_tagged_by_type() {
        let json = r#"[
            {"type":"item","chance":5.0,"item_id":"cobblemon:rare_candy","count":2},
            {"type":"command","chance":1.0,"command":"eco give %player% 100","display_item":"minecraft:emerald"}
        ]"#;
        let rewards: Vec<LootReward> = serde_json::from_str(json).expect("rewards should parse");
        assert_eq!(rewards[0].weight(), 5.0);
        assert_eq!(rewards[0].describe(), "2x cobblemon:rare_candy");
        assert!(matches!(&rewards[1], LootReward::Command(c) if c.command.contains("%player%")));
    }

    #[test]
    fn loot_reward_numbers_survive_inside_documents() {
        let json = r#"{"easy":[{"type":"item","chance":7.5,"item_id":"cobblemon:poke_ball"}]}"#;
        let tables: std::collections::HashMap<String, Vec<LootReward>> =
            serde_json::from_str(json).expect("nested rewards should parse");
        let reward = &tables["easy"][0];
        assert_eq!(reward.weight(), 7.5);
        assert_eq!(reward.describe(), "1x cobblemon:poke_ball");
    }

    #[test]
    fn loot_reward_rejects_bad_rows() {
        assert!(serde_json::from_str::<LootReward>(r#"{"type":"potion","chance":1.0}"#).is_err());
        assert!(serde_json::from_str::<LootReward>(r#"{"type":"item","chance":1.0}"#).is_err());
        assert!(serde_json::from_str::<LootReward>(r#"{"type":"command","chance":1.0}"#).is_err());
    }

    #[test]
    fn loot_reward_serializes_with_its_tag() {
        let reward = LootReward::Command(CommandReward {
            chance: 2.0,
            command: "say hi %player%".to_string(),
            display_item: String::new(),
        });
        let json = serde_json::to_value(&reward).unwrap();
        assert_eq!(json["type"], "command");
        assert_eq!(json["command"], "say hi %player%");
    }

    #[test]
    fn display_name_includes_aspects_and_form() {
        let mut entry = HuntPokemonEntry::new("vulpix", 1.0);
        entry.form = Some("alolan".to_string());
        entry.aspects = vec!["shiny".to_string()];
        assert_eq!(entry.display_name(), "Shiny Alolan Vulpix");
    }

    #[test]
    fn instance_without_expiry_never_expires() {
        let instance = HuntInstance {
            difficulty: HuntDifficulty::Easy,
            entry: HuntPokemonEntry::new("pidgey", 1.0),
            required_gender: None,
            required_nature: None,
            required_ivs: Vec::new(),
            reward: None,
            started_at: None,
            expires_at: None,
        };
        assert!(!instance.is_expired(Timestamp::from_micros_since_unix_epoch(i64::MAX / 2)));
    }
}
