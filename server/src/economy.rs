/******************************************************************************
 *                                                                            *
 * Hunt Economy - Player Wallets                                              *
 *                                                                            *
 * Per-player, per-currency balances used to pay reroll costs. The host       *
 * bridge (or an admin) deposits; rerolls withdraw through `Economy`.         *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::{Identity, ReducerContext, Table, Timestamp};
use thiserror::Error;
use log;

use crate::hunt_config::{current_settings, PRIMARY_CURRENCY};
use crate::permissions::{require_permission, PERM_ADMIN};

// Import table traits
use crate::economy::player_wallet as PlayerWalletTableTrait;

#[spacetimedb::table(accessor = player_wallet, public)]
#[derive(Clone, Debug)]
pub struct PlayerWallet {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub player_id: Identity,
    pub currency: String,

    /// Current balance
    pub balance: u64,

    /// Total ever deposited
    pub total_earned: u64,

    /// Total ever withdrawn
    pub total_spent: u64,

    pub last_transaction: Timestamp,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EconomyError {
    #[error("You need {needed} {currency} but only have {available}.")]
    InsufficientFunds { currency: String, needed: u64, available: u64 },
}

/// Balance access used by rerolls.
pub trait Economy {
    fn balance(&self, player_id: Identity, currency: &str) -> u64;
    fn withdraw(&mut self, player_id: Identity, currency: &str, amount: u64) -> Result<(), EconomyError>;
}

/// Maps a configured currency onto a known one, falling back to the primary currency.
pub fn resolve_currency(requested: &str, known: &[String]) -> String {
    let requested = requested.trim();
    if let Some(found) = known.iter().find(|c| c.eq_ignore_ascii_case(requested)) {
        return found.to_ascii_lowercase();
    }
    log::warn!("[Economy] Unknown currency '{}', falling back to '{}'", requested, PRIMARY_CURRENCY);
    PRIMARY_CURRENCY.to_string()
}

/// `Economy` over the `player_wallet` table.
pub struct TableEconomy<'a> {
    ctx: &'a ReducerContext,
}

impl<'a> TableEconomy<'a> {
    pub fn new(ctx: &'a ReducerContext) -> Self {
        TableEconomy { ctx }
    }

    fn wallet(&self, player_id: Identity, currency: &str) -> Option<PlayerWallet> {
        self.ctx.db.player_wallet().iter().find(|w| w.player_id == player_id && w.currency == currency)
    }
}

impl Economy for TableEconomy<'_> {
    fn balance(&self, player_id: Identity, currency: &str) -> u64 {
        self.wallet(player_id, currency).map_or(0, |w| w.balance)
    }

    fn withdraw(&mut self, player_id: Identity, currency: &str, amount: u64) -> Result<(), EconomyError> {
        let available = self.balance(player_id, currency);
        if available < amount {
            return Err(EconomyError::InsufficientFunds {
                currency: currency.to_string(),
                needed: amount,
                available,
            });
        }
        if let Some(mut wallet) = self.wallet(player_id, currency) {
            wallet.balance -= amount;
            wallet.total_spent += amount;
            wallet.last_transaction = self.ctx.timestamp;
            self.ctx.db.player_wallet().id().update(wallet);
        }
        log::info!("[Economy] Withdrew {} {} from {:?}", amount, currency, player_id);
        Ok(())
    }
}

/// Adds `amount` to a wallet, creating it on first deposit.
pub fn deposit(ctx: &ReducerContext, player_id: Identity, currency: &str, amount: u64) {
    let table = ctx.db.player_wallet();
    match table.iter().find(|w| w.player_id == player_id && w.currency == currency) {
        Some(mut wallet) => {
            wallet.balance += amount;
            wallet.total_earned += amount;
            wallet.last_transaction = ctx.timestamp;
            table.id().update(wallet);
        }
        None => {
            table.insert(PlayerWallet {
                id: 0,
                player_id,
                currency: currency.to_string(),
                balance: amount,
                total_earned: amount,
                total_spent: 0,
                last_transaction: ctx.timestamp,
            });
        }
    }
}

/// Host bridge / admin: credit a player's wallet.
#[spacetimedb::reducer]
pub fn deposit_currency(ctx: &ReducerContext, player_id: Identity, currency: String, amount: u64) -> Result<(), String> {
    require_permission(ctx, PERM_ADMIN)?;
    if amount == 0 {
        return Err("Amount must be greater than zero".to_string());
    }
    let currency = resolve_currency(&currency, &current_settings(ctx).currencies);
    deposit(ctx, player_id, &currency, amount);
    log::info!("[Economy] Deposited {} {} to {:?}", amount, currency, player_id);
    Ok(())
}
