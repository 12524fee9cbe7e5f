use spacetimedb::{Identity, ReducerContext, Table, Timestamp};
use log;

use crate::hunts::send_hunt_message;

// Import table traits
use crate::leaderboard::hunt_leaderboard as HuntLeaderboardTableTrait;

pub const LEADERBOARD_SIZE: usize = 10;

/// Accumulated hunt points per player name.
#[spacetimedb::table(accessor = hunt_leaderboard, public)]
#[derive(Clone, Debug, PartialEq)]
pub struct HuntLeaderboardEntry {
    #[primary_key]
    pub player_name: String,
    pub player_id: Identity,
    pub points: u64,
    pub hunts_completed: u32,
    pub updated_at: Timestamp,
}

pub fn award_points(ctx: &ReducerContext, player_id: Identity, player_name: &str, points: u64) {
    let table = ctx.db.hunt_leaderboard();
    let name = player_name.to_string();
    match table.player_name().find(&name) {
        Some(mut entry) => {
            entry.points += points;
            entry.hunts_completed += 1;
            entry.player_id = player_id;
            entry.updated_at = ctx.timestamp;
            table.player_name().update(entry);
        }
        None => {
            table.insert(HuntLeaderboardEntry {
                player_name: name,
                player_id,
                points,
                hunts_completed: 1,
                updated_at: ctx.timestamp,
            });
        }
    }
    log::info!("[HuntLeaderboard] {} earned {} points", player_name, points);
}

/// Highest scores first; ties broken by name.
pub fn top_entries(mut entries: Vec<HuntLeaderboardEntry>, limit: usize) -> Vec<HuntLeaderboardEntry> {
    entries.sort_by(|a, b| b.points.cmp(&a.points).then_with(|| a.player_name.cmp(&b.player_name)));
    entries.truncate(limit);
    entries
}

pub fn format_leaderboard(entries: &[HuntLeaderboardEntry]) -> String {
    if entries.is_empty() {
        return "No hunts have been completed yet.".to_string();
    }
    let lines: Vec<String> = entries
        .iter()
        .enumerate()
        .map(|(rank, e)| format!("{}. {} - {} points", rank + 1, e.player_name, e.points))
        .collect();
    format!("Hunt Leaderboard\n{}", lines.join("\n"))
}

/// Posts the top ten to the caller.
#[spacetimedb::reducer]
pub fn show_hunt_leaderboard(ctx: &ReducerContext) -> Result<(), String> {
    let entries: Vec<HuntLeaderboardEntry> = ctx.db.hunt_leaderboard().iter().collect();
    let top = top_entries(entries, LEADERBOARD_SIZE);
    send_hunt_message(ctx, Some(ctx.sender()), &format_leaderboard(&top), "leaderboard");
    Ok(())
}
