//! Credit ledger - the single source of truth for balances.
//!
//! Records every balance change as an immutable [`LedgerEvent`] with
//! balance-before/after, forming a complete audit log per account.
//!
//! # Event Types
//! - **Grant**: initial account funding
//! - **Hold**: stake locked for a match (balance decreases)
//! - **Release**: hold returned (balance increases)
//! - **Deduct**: lost stake recorded (balance unchanged, totals move)
//! - **Reward**: system-issued victory payout (balance increases)
//! - **Deposit** / **Withdraw**: direct external balance mutations
//!
//! # Hold / Deduct / Release triad
//! A hold moves balance out immediately; settlement later closes it with a
//! release (stake returned) or a deduct (loss recorded against totals only,
//! the balance already moved at hold time). This keeps the balance math
//! monotonic with no negative-balance window.
//!
//! # Transactions
//! Each mutation is a per-account serializable transaction: the DashMap
//! entry lock serializes concurrent writers on one account, and every commit
//! appends one event plus the updated account snapshot. Events carry a
//! per-account sequence number, so `balance_after(n) = balance_after(n-1) +
//! signed_delta(n)` holds in sequence order even when wall-clock timestamps
//! tie.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::core_types::{EventId, MatchId, SeqNum, UserId};
use crate::error::{DuelError, DuelResult};

// ============================================================
// EVENTS
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LedgerEventType {
    Grant,
    Hold,
    Release,
    Deduct,
    Reward,
    Deposit,
    Withdraw,
}

impl LedgerEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grant => "GRANT",
            Self::Hold => "HOLD",
            Self::Release => "RELEASE",
            Self::Deduct => "DEDUCT",
            Self::Reward => "REWARD",
            Self::Deposit => "DEPOSIT",
            Self::Withdraw => "WITHDRAW",
        }
    }
}

/// Immutable audit record of one balance change.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEvent {
    pub event_id: EventId,
    /// Per-account sequence number; the authoritative total order.
    pub seq: SeqNum,
    pub event_type: LedgerEventType,
    /// Positive magnitude of the operation.
    pub amount: u64,
    pub balance_before: u64,
    pub balance_after: u64,
    pub match_id: Option<MatchId>,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<String>,
}

impl LedgerEvent {
    /// Balance movement this event caused (zero for DEDUCT).
    #[inline]
    pub fn signed_delta(&self) -> i64 {
        self.balance_after as i64 - self.balance_before as i64
    }
}

// ============================================================
// ACCOUNT
// ============================================================

/// Per-user credit account snapshot.
///
/// Invariant: `balance + sum(open_holds) = total_granted + total_earned -
/// total_spent`, where open holds are the stakes of un-settled matches.
#[derive(Debug, Clone, Serialize)]
pub struct CreditAccount {
    pub user_id: UserId,
    pub balance: u64,
    pub total_granted: u64,
    pub total_spent: u64,
    pub total_earned: u64,
    /// Bumped by every committed mutation.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_transaction_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct AccountRecord {
    account: CreditAccount,
    history: Vec<LedgerEvent>,
    next_seq: SeqNum,
}

impl AccountRecord {
    fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            account: CreditAccount {
                user_id,
                balance: 0,
                total_granted: 0,
                total_spent: 0,
                total_earned: 0,
                version: 0,
                created_at: now,
                updated_at: now,
                last_transaction_at: None,
            },
            history: Vec::new(),
            next_seq: 0,
        }
    }

    /// Append one event reflecting the already-applied balance movement.
    fn commit(
        &mut self,
        event_type: LedgerEventType,
        amount: u64,
        balance_before: u64,
        match_id: Option<MatchId>,
        metadata: Option<String>,
    ) {
        let now = Utc::now();
        let event = LedgerEvent {
            event_id: Uuid::new_v4().to_string(),
            seq: self.next_seq,
            event_type,
            amount,
            balance_before,
            balance_after: self.account.balance,
            match_id,
            timestamp: now,
            metadata,
        };
        self.next_seq += 1;
        self.history.push(event);
        self.account.version += 1;
        self.account.updated_at = now;
        self.account.last_transaction_at = Some(now);
    }
}

// ============================================================
// LEDGER
// ============================================================

/// In-process credit ledger keyed by user id.
///
/// Accounts are created lazily on first credit-bearing interaction with an
/// initial grant; they are never destroyed.
#[derive(Debug)]
pub struct CreditLedger {
    accounts: DashMap<UserId, AccountRecord>,
    initial_grant: u64,
}

impl CreditLedger {
    pub fn new(initial_grant: u64) -> Self {
        Self {
            accounts: DashMap::new(),
            initial_grant,
        }
    }

    /// Get the account, creating it with the initial grant if absent.
    /// Idempotent.
    pub fn get_or_init(&self, user_id: &str) -> CreditAccount {
        let mut entry = self
            .accounts
            .entry(user_id.to_string())
            .or_insert_with(|| AccountRecord::new(user_id.to_string(), Utc::now()));
        if entry.history.is_empty() && self.initial_grant > 0 {
            let before = entry.account.balance;
            entry.account.balance += self.initial_grant;
            entry.account.total_granted += self.initial_grant;
            entry.commit(
                LedgerEventType::Grant,
                self.initial_grant,
                before,
                None,
                Some("initial grant".to_string()),
            );
            tracing::info!(user_id, amount = self.initial_grant, "credit account created");
        }
        entry.account.clone()
    }

    /// Read the account snapshot without creating it.
    pub fn account(&self, user_id: &str) -> DuelResult<CreditAccount> {
        self.accounts
            .get(user_id)
            .map(|rec| rec.account.clone())
            .ok_or_else(|| DuelError::AccountMissing(user_id.to_string()))
    }

    /// Lock stake for a match. Fails when the balance cannot cover it.
    pub fn hold(&self, user_id: &str, amount: u64, match_id: &str) -> DuelResult<CreditAccount> {
        self.mutate(user_id, |rec| {
            require_positive(amount)?;
            let before = rec.account.balance;
            if before < amount {
                return Err(DuelError::InsufficientFunds {
                    required: amount,
                    available: before,
                });
            }
            rec.account.balance = before - amount;
            rec.commit(
                LedgerEventType::Hold,
                amount,
                before,
                Some(match_id.to_string()),
                None,
            );
            Ok(())
        })
    }

    /// Return held stake. Always safe for a caller that owns a matching
    /// hold accounting record; there is no balance precondition.
    pub fn release(&self, user_id: &str, amount: u64, match_id: &str) -> DuelResult<CreditAccount> {
        self.mutate(user_id, |rec| {
            require_positive(amount)?;
            let before = rec.account.balance;
            rec.account.balance = before + amount;
            rec.commit(
                LedgerEventType::Release,
                amount,
                before,
                Some(match_id.to_string()),
                None,
            );
            Ok(())
        })
    }

    /// Record a lost stake. The balance already moved at hold time; only the
    /// spend totals advance here.
    pub fn deduct(
        &self,
        user_id: &str,
        amount: u64,
        match_id: &str,
        reason: &str,
    ) -> DuelResult<CreditAccount> {
        self.mutate(user_id, |rec| {
            require_positive(amount)?;
            let before = rec.account.balance;
            rec.account.total_spent += amount;
            rec.commit(
                LedgerEventType::Deduct,
                amount,
                before,
                Some(match_id.to_string()),
                Some(reason.to_string()),
            );
            Ok(())
        })
    }

    /// System-issued payout beyond what the winner held themselves.
    pub fn reward(&self, user_id: &str, amount: u64, match_id: &str) -> DuelResult<CreditAccount> {
        self.mutate(user_id, |rec| {
            require_positive(amount)?;
            let before = rec.account.balance;
            rec.account.balance = before + amount;
            rec.account.total_earned += amount;
            rec.commit(
                LedgerEventType::Reward,
                amount,
                before,
                Some(match_id.to_string()),
                None,
            );
            Ok(())
        })
    }

    /// Direct external top-up.
    pub fn deposit(&self, user_id: &str, amount: u64) -> DuelResult<CreditAccount> {
        self.mutate(user_id, |rec| {
            require_positive(amount)?;
            let before = rec.account.balance;
            rec.account.balance = before + amount;
            rec.account.total_granted += amount;
            rec.commit(LedgerEventType::Deposit, amount, before, None, None);
            Ok(())
        })
    }

    /// Direct external withdrawal; requires sufficient balance.
    pub fn withdraw(&self, user_id: &str, amount: u64) -> DuelResult<CreditAccount> {
        self.mutate(user_id, |rec| {
            require_positive(amount)?;
            let before = rec.account.balance;
            if before < amount {
                return Err(DuelError::InsufficientFunds {
                    required: amount,
                    available: before,
                });
            }
            rec.account.balance = before - amount;
            rec.account.total_spent += amount;
            rec.commit(LedgerEventType::Withdraw, amount, before, None, None);
            Ok(())
        })
    }

    /// Event history, newest first.
    pub fn history(&self, user_id: &str, limit: usize) -> DuelResult<Vec<LedgerEvent>> {
        let rec = self
            .accounts
            .get(user_id)
            .ok_or_else(|| DuelError::AccountMissing(user_id.to_string()))?;
        Ok(rec.history.iter().rev().take(limit).cloned().collect())
    }

    /// Run a mutation inside the per-account transaction. The entry lock
    /// serializes concurrent attempts on the same account; the closure sees
    /// the latest committed state.
    fn mutate(
        &self,
        user_id: &str,
        f: impl FnOnce(&mut AccountRecord) -> DuelResult<()>,
    ) -> DuelResult<CreditAccount> {
        // Lazily create on first credit-bearing interaction.
        self.get_or_init(user_id);
        let mut entry = self
            .accounts
            .get_mut(user_id)
            .ok_or_else(|| DuelError::AccountMissing(user_id.to_string()))?;
        f(&mut entry)?;
        Ok(entry.account.clone())
    }
}

#[inline]
fn require_positive(amount: u64) -> DuelResult<()> {
    if amount == 0 {
        return Err(DuelError::invalid("amount must be positive"));
    }
    Ok(())
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> CreditLedger {
        CreditLedger::new(100)
    }

    /// `balance = total_granted + total_earned - total_spent - open_holds`
    fn check_invariant(account: &CreditAccount, open_holds: u64) {
        assert_eq!(
            account.balance + open_holds,
            account.total_granted + account.total_earned - account.total_spent,
            "account equation violated for {}",
            account.user_id
        );
    }

    #[test]
    fn test_get_or_init_grants_once() {
        let ledger = ledger();
        let first = ledger.get_or_init("u1");
        assert_eq!(first.balance, 100);
        assert_eq!(first.total_granted, 100);

        let second = ledger.get_or_init("u1");
        assert_eq!(second.balance, 100);
        let history = ledger.history("u1", 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event_type, LedgerEventType::Grant);
    }

    #[test]
    fn test_hold_moves_balance_out() {
        let ledger = ledger();
        ledger.get_or_init("u1");
        let account = ledger.hold("u1", 25, "m1").unwrap();
        assert_eq!(account.balance, 75);
        check_invariant(&account, 25);

        let history = ledger.history("u1", 10).unwrap();
        assert_eq!(history[0].event_type, LedgerEventType::Hold);
        assert_eq!(history[0].balance_before, 100);
        assert_eq!(history[0].balance_after, 75);
        assert_eq!(history[0].match_id.as_deref(), Some("m1"));
    }

    #[test]
    fn test_hold_insufficient_funds() {
        let ledger = ledger();
        ledger.get_or_init("u1");
        let err = ledger.hold("u1", 101, "m1").unwrap_err();
        assert!(matches!(
            err,
            DuelError::InsufficientFunds {
                required: 101,
                available: 100
            }
        ));
        // Nothing committed
        assert_eq!(ledger.account("u1").unwrap().balance, 100);
        assert_eq!(ledger.history("u1", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_release_closes_hold() {
        let ledger = ledger();
        ledger.hold("u1", 25, "m1").unwrap();
        let account = ledger.release("u1", 25, "m1").unwrap();
        assert_eq!(account.balance, 100);
        check_invariant(&account, 0);
    }

    #[test]
    fn test_deduct_only_moves_totals() {
        let ledger = ledger();
        ledger.hold("u1", 10, "m1").unwrap();
        let account = ledger.deduct("u1", 10, "m1", "match lost").unwrap();
        assert_eq!(account.balance, 90);
        assert_eq!(account.total_spent, 10);
        check_invariant(&account, 0);

        let history = ledger.history("u1", 1).unwrap();
        assert_eq!(history[0].event_type, LedgerEventType::Deduct);
        assert_eq!(history[0].signed_delta(), 0);
        assert_eq!(history[0].metadata.as_deref(), Some("match lost"));
    }

    #[test]
    fn test_reward_is_earned_income() {
        let ledger = ledger();
        ledger.get_or_init("u1");
        let account = ledger.reward("u1", 20, "m1").unwrap();
        assert_eq!(account.balance, 120);
        assert_eq!(account.total_earned, 20);
        check_invariant(&account, 0);
    }

    #[test]
    fn test_deposit_withdraw() {
        let ledger = ledger();
        let account = ledger.deposit("u1", 50).unwrap();
        assert_eq!(account.balance, 150);

        let account = ledger.withdraw("u1", 30).unwrap();
        assert_eq!(account.balance, 120);
        check_invariant(&account, 0);

        assert!(matches!(
            ledger.withdraw("u1", 500).unwrap_err(),
            DuelError::InsufficientFunds { .. }
        ));
    }

    #[test]
    fn test_zero_amount_rejected() {
        let ledger = ledger();
        assert!(ledger.hold("u1", 0, "m1").is_err());
        assert!(ledger.deposit("u1", 0).is_err());
    }

    #[test]
    fn test_history_descending_and_chained() {
        let ledger = ledger();
        ledger.hold("u1", 10, "m1").unwrap();
        ledger.release("u1", 10, "m1").unwrap();
        ledger.deposit("u1", 5).unwrap();

        let history = ledger.history("u1", 10).unwrap();
        assert_eq!(history.len(), 4);
        // Newest first
        assert_eq!(history[0].event_type, LedgerEventType::Deposit);
        // seq strictly decreasing
        for pair in history.windows(2) {
            assert!(pair[0].seq > pair[1].seq);
        }
        // balance_after chains in sequence order
        let mut asc = history.clone();
        asc.sort_by_key(|e| e.seq);
        for pair in asc.windows(2) {
            assert_eq!(
                pair[1].balance_before as i64 + pair[1].signed_delta(),
                pair[1].balance_after as i64
            );
            assert_eq!(pair[0].balance_after, pair[1].balance_before);
        }

        let limited = ledger.history("u1", 2).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn test_account_missing() {
        let ledger = ledger();
        assert!(matches!(
            ledger.account("ghost").unwrap_err(),
            DuelError::AccountMissing(_)
        ));
        assert!(matches!(
            ledger.history("ghost", 5).unwrap_err(),
            DuelError::AccountMissing(_)
        ));
    }

    #[test]
    fn test_concurrent_holds_serialize() {
        use std::sync::Arc;

        let ledger = Arc::new(CreditLedger::new(100));
        ledger.get_or_init("u1");

        let mut handles = Vec::new();
        for i in 0..10 {
            let ledger = Arc::clone(&ledger);
            handles.push(std::thread::spawn(move || {
                ledger.hold("u1", 15, &format!("m{i}"))
            }));
        }
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let ok_count = results.iter().filter(|r| r.is_ok()).count();

        // 100 / 15 = 6 holds can succeed; the rest must fail cleanly.
        assert_eq!(ok_count, 6);
        let account = ledger.account("u1").unwrap();
        assert_eq!(account.balance, 10);
        check_invariant(&account, 90);
    }
}
