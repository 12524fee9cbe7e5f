/******************************************************************************
 *                                                                            *
 * Hunt Permissions                                                           *
 *                                                                            *
 * Permission nodes gate admin commands, the host bridge and rerolls.         *
 * The module identity (server console / host bridge) holds every node.       *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::{Identity, ReducerContext, Table};
use log;

use crate::hunt_config::current_settings;
use crate::permissions::hunt_permission as HuntPermissionTableTrait;

pub const PERM_ADMIN: &str = "cobblehunts.admin";
pub const PERM_REROLL: &str = "cobblehunts.reroll";
pub const PERM_REROLL_BYPASS_LIMIT: &str = "cobblehunts.reroll.bypass.limit";
pub const PERM_REROLL_BYPASS_COST: &str = "cobblehunts.reroll.bypass.cost";

#[spacetimedb::table(accessor = hunt_permission, public)]
#[derive(Clone, Debug)]
pub struct HuntPermission {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub player_id: Identity,
    pub node: String,
}

/// Resolves a node against explicit grants and the defaults everyone holds.
/// The admin node implies every other node.
pub fn permission_granted(granted: &[String], defaults: &[String], node: &str) -> bool {
    let holds = |n: &str| granted.iter().chain(defaults.iter()).any(|g| g.eq_ignore_ascii_case(n));
    holds(node) || holds(PERM_ADMIN)
}

pub fn has_permission(ctx: &ReducerContext, player_id: Identity, node: &str) -> bool {
    if player_id == ctx.identity() {
        return true;
    }
    let granted: Vec<String> = ctx.db.hunt_permission().iter()
        .filter(|p| p.player_id == player_id)
        .map(|p| p.node)
        .collect();
    let defaults = current_settings(ctx).default_permissions;
    permission_granted(&granted, &defaults, node)
}

/// Errors with a user-facing message unless the caller holds `node`.
pub fn require_permission(ctx: &ReducerContext, node: &str) -> Result<(), String> {
    if has_permission(ctx, ctx.sender(), node) {
        Ok(())
    } else {
        log::info!("[Hunts] {:?} denied permission '{}'", ctx.sender(), node);
        Err("You do not have permission to do that.".to_string())
    }
}

#[spacetimedb::reducer]
pub fn grant_hunt_permission(ctx: &ReducerContext, player_id: Identity, node: String) -> Result<(), String> {
    require_permission(ctx, PERM_ADMIN)?;
    let node = node.trim().to_ascii_lowercase();
    if node.is_empty() {
        return Err("Permission node cannot be empty".to_string());
    }
    let table = ctx.db.hunt_permission();
    if table.iter().any(|p| p.player_id == player_id && p.node == node) {
        return Ok(());
    }
    table.insert(HuntPermission { id: 0, player_id, node: node.clone() });
    log::info!("[Hunts] Granted '{}' to {:?}", node, player_id);
    Ok(())
}

#[spacetimedb::reducer]
pub fn revoke_hunt_permission(ctx: &ReducerContext, player_id: Identity, node: String) -> Result<(), String> {
    require_permission(ctx, PERM_ADMIN)?;
    let node = node.trim().to_ascii_lowercase();
    let table = ctx.db.hunt_permission();
    let matching: Vec<HuntPermission> = table.iter()
        .filter(|p| p.player_id == player_id && p.node == node)
        .collect();
    for grant in matching {
        table.id().delete(grant.id);
    }
    log::info!("[Hunts] Revoked '{}' from {:?}", node, player_id);
    Ok(())
}
