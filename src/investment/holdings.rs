//! Token holdings per (user, offering)
//!
//! Holdings and their balance-change history live behind one `RwLock`, so
//! a dividend snapshot sees a single consistent cut across all holders.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::{Money, OfferingId, TokenAmount, UserId};
use crate::money::weighted_average_price;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHolding {
    pub user_id: UserId,
    pub offering_id: OfferingId,
    pub balance: TokenAmount,
    pub total_invested_amount: Money,
    pub average_purchase_price: Money,
    /// Dividends received (net of withholding)
    pub realized_returns: Money,
    /// Mark-to-market gain over cost. Tokens trade only at the offering
    /// price, so this stays zero until a secondary price source exists.
    pub unrealized_returns: Money,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct BalanceChange {
    offering_id: OfferingId,
    user_id: UserId,
    at: DateTime<Utc>,
    delta: i128,
}

#[derive(Debug, Default)]
struct HoldingBook {
    holdings: HashMap<(OfferingId, UserId), TokenHolding>,
    /// Point-in-time source for snapshots. One entry per confirmed purchase
    /// or refund; purchases are capped by the offering's supply, so an
    /// offering contributes at most `2 × total_supply` entries.
    history: Vec<BalanceChange>,
}

#[derive(Debug, Default)]
pub struct HoldingStore {
    book: RwLock<HoldingBook>,
}

impl HoldingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HoldingBook> {
        self.book.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HoldingBook> {
        self.book.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Add purchased tokens. Returns true if this is the user's first
    /// holding in the offering.
    pub fn apply_purchase(
        &self,
        user: &UserId,
        offering: OfferingId,
        tokens: TokenAmount,
        cost: Money,
        at: DateTime<Utc>,
    ) -> bool {
        let mut book = self.write();
        let key = (offering, user.clone());
        let first = !book.holdings.contains_key(&key);

        let holding = book.holdings.entry(key).or_insert_with(|| TokenHolding {
            user_id: user.clone(),
            offering_id: offering,
            balance: 0,
            total_invested_amount: Decimal::ZERO,
            average_purchase_price: Decimal::ZERO,
            realized_returns: Decimal::ZERO,
            unrealized_returns: Decimal::ZERO,
            updated_at: at,
        });
        holding.balance += tokens;
        holding.total_invested_amount += cost;
        holding.average_purchase_price =
            weighted_average_price(holding.total_invested_amount, holding.balance);
        holding.updated_at = at;

        book.history.push(BalanceChange {
            offering_id: offering,
            user_id: user.clone(),
            at,
            delta: tokens as i128,
        });
        first
    }

    /// Reverse a purchase (administrative refund)
    pub fn apply_refund(
        &self,
        user: &UserId,
        offering: OfferingId,
        tokens: TokenAmount,
        cost: Money,
        at: DateTime<Utc>,
    ) {
        let mut book = self.write();
        let Some(holding) = book.holdings.get_mut(&(offering, user.clone())) else {
            return;
        };
        let removed = tokens.min(holding.balance);
        holding.balance -= removed;
        holding.total_invested_amount = (holding.total_invested_amount - cost).max(Decimal::ZERO);
        holding.average_purchase_price =
            weighted_average_price(holding.total_invested_amount, holding.balance);
        holding.updated_at = at;

        book.history.push(BalanceChange {
            offering_id: offering,
            user_id: user.clone(),
            at,
            delta: -(removed as i128),
        });
    }

    /// Credit a received dividend to realized returns
    pub fn record_dividend(&self, user: &UserId, offering: OfferingId, net: Money) {
        let mut book = self.write();
        if let Some(holding) = book.holdings.get_mut(&(offering, user.clone())) {
            holding.realized_returns += net;
        }
    }

    pub fn get(&self, user: &UserId, offering: OfferingId) -> Option<TokenHolding> {
        self.read().holdings.get(&(offering, user.clone())).cloned()
    }

    pub fn for_user(&self, user: &UserId) -> Vec<TokenHolding> {
        let mut holdings: Vec<TokenHolding> = self
            .read()
            .holdings
            .values()
            .filter(|h| &h.user_id == user)
            .cloned()
            .collect();
        holdings.sort_by_key(|h| h.offering_id);
        holdings
    }

    /// Holders with a positive balance as of `as_of`, sorted by user.
    ///
    /// Taken under one read lock, so concurrent purchases are either fully
    /// in or fully out of the snapshot.
    pub fn snapshot(&self, offering: OfferingId, as_of: DateTime<Utc>) -> Vec<(UserId, TokenAmount)> {
        let book = self.read();
        let mut balances: HashMap<&UserId, i128> = HashMap::new();
        for change in book
            .history
            .iter()
            .filter(|c| c.offering_id == offering && c.at <= as_of)
        {
            *balances.entry(&change.user_id).or_default() += change.delta;
        }

        let mut holders: Vec<(UserId, TokenAmount)> = balances
            .into_iter()
            .filter(|(_, balance)| *balance > 0)
            .map(|(user, balance)| (user.clone(), balance as TokenAmount))
            .collect();
        holders.sort_by(|a, b| a.0.cmp(&b.0));
        holders
    }
}
