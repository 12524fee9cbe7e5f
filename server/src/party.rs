/******************************************************************************
 *                                                                            *
 * Party Mirror                                                               *
 *                                                                            *
 * The host bridge mirrors each player's party creatures and capture times    *
 * into these tables so turn-ins can be validated inside the module.          *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::{Identity, ReducerContext, SpacetimeType, Table, Timestamp};
use log;

use crate::models::{Gender, IvSet, Nature};
use crate::permissions::{require_permission, PERM_ADMIN};
use crate::utils::MICROS_PER_SECOND;

// Import table traits
use crate::party::party_creature as PartyCreatureTableTrait;
use crate::party::capture_record as CaptureRecordTableTrait;

/// Capture records are only needed while a hunt could still be turned in.
pub const CAPTURE_RECORD_TTL_SECS: i64 = 60 * 60;

/// Attributes of one creature as reported by the host.
#[derive(SpacetimeType, Clone, Debug, PartialEq)]
pub struct CreatureSnapshot {
    pub uuid: String,
    pub species: String,
    pub form: Option<String>,
    pub aspects: Vec<String>,
    pub gender: Gender,
    pub nature: Nature,
    pub ivs: IvSet,
}

#[spacetimedb::table(accessor = party_creature, public)]
#[derive(Clone, Debug)]
pub struct PartyCreature {
    #[primary_key]
    pub uuid: String,
    pub owner: Identity,
    pub creature: CreatureSnapshot,
    pub updated_at: Timestamp,
}

#[spacetimedb::table(accessor = capture_record, public)]
#[derive(Clone, Debug)]
pub struct CaptureRecord {
    #[primary_key]
    pub creature_uuid: String,
    pub player_id: Identity,
    pub captured_at: Timestamp,
}

/// The creature with `uuid` if it is in `owner`'s party.
pub fn find_party_creature(ctx: &ReducerContext, owner: Identity, uuid: &str) -> Option<CreatureSnapshot> {
    ctx.db.party_creature()
        .uuid()
        .find(&uuid.to_string())
        .filter(|row| row.owner == owner)
        .map(|row| row.creature)
}

/// When `player_id` captured `uuid`, if still recorded.
pub fn capture_time(ctx: &ReducerContext, player_id: Identity, uuid: &str) -> Option<Timestamp> {
    ctx.db.capture_record()
        .creature_uuid()
        .find(&uuid.to_string())
        .filter(|record| record.player_id == player_id)
        .map(|record| record.captured_at)
}

/// Removes a creature from the mirror, e.g. after it was turned in.
pub fn remove_party_creature(ctx: &ReducerContext, uuid: &str) {
    let uuid = uuid.to_string();
    ctx.db.party_creature().uuid().delete(&uuid);
    ctx.db.capture_record().creature_uuid().delete(&uuid);
}

pub fn prune_capture_records(ctx: &ReducerContext) {
    let cutoff = ctx.timestamp.to_micros_since_unix_epoch() - CAPTURE_RECORD_TTL_SECS * MICROS_PER_SECOND;
    let table = ctx.db.capture_record();
    let stale: Vec<String> = table.iter()
        .filter(|r| r.captured_at.to_micros_since_unix_epoch() < cutoff)
        .map(|r| r.creature_uuid)
        .collect();
    if stale.is_empty() {
        return;
    }
    let count = stale.len();
    for uuid in stale {
        table.creature_uuid().delete(&uuid);
    }
    log::debug!("[Hunts] Pruned {} capture records", count);
}

fn upsert_party_creature(ctx: &ReducerContext, owner: Identity, creature: CreatureSnapshot) -> Result<String, String> {
    if creature.uuid.trim().is_empty() {
        return Err("Creature uuid cannot be empty".to_string());
    }
    let uuid = creature.uuid.clone();
    let row = PartyCreature {
        uuid: uuid.clone(),
        owner,
        creature,
        updated_at: ctx.timestamp,
    };
    let party = ctx.db.party_creature();
    if party.uuid().find(&uuid).is_some() {
        party.uuid().update(row);
    } else {
        party.insert(row);
    }
    Ok(uuid)
}

/// Host bridge: a creature was captured by `owner`. Stamps the capture time.
#[spacetimedb::reducer]
pub fn record_capture(ctx: &ReducerContext, owner: Identity, creature: CreatureSnapshot) -> Result<(), String> {
    require_permission(ctx, PERM_ADMIN)?;
    let species = creature.species.clone();
    let uuid = upsert_party_creature(ctx, owner, creature)?;

    let record = CaptureRecord {
        creature_uuid: uuid.clone(),
        player_id: owner,
        captured_at: ctx.timestamp,
    };
    let captures = ctx.db.capture_record();
    if captures.creature_uuid().find(&uuid).is_some() {
        captures.creature_uuid().update(record);
    } else {
        captures.insert(record);
    }

    log::info!("[Hunts] Recorded capture of {} ({}) for {:?}", species, uuid, owner);
    Ok(())
}

/// Host bridge: a creature joined or changed in `owner`'s party without a new capture
/// (trades, evolutions, login sync). Existing capture times are kept.
#[spacetimedb::reducer]
pub fn sync_party_creature(ctx: &ReducerContext, owner: Identity, creature: CreatureSnapshot) -> Result<(), String> {
    require_permission(ctx, PERM_ADMIN)?;
    let uuid = upsert_party_creature(ctx, owner, creature)?;
    log::debug!("[Hunts] Synced party creature {} for {:?}", uuid, owner);
    Ok(())
}

/// Host bridge: a creature left its owner's party.
#[spacetimedb::reducer]
pub fn release_party_creature(ctx: &ReducerContext, uuid: String) -> Result<(), String> {
    require_permission(ctx, PERM_ADMIN)?;
    remove_party_creature(ctx, &uuid);
    log::debug!("[Hunts] Released party creature {}", uuid);
    Ok(())
}
