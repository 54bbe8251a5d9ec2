// XP ledger: every change to an ambassador's XP goes through `post_xp`,
// which appends an `xp_transaction` row and updates the live balance in the
// same reducer transaction. The running sum of `amount` always equals `xp`.

use serde_json::{json, Value};
use spacetimedb::{reducer, ReducerContext, SpacetimeType, Table};

use crate::error::GameError;
use crate::{ambassador, require_worker, short_id, xp_transaction, XpTransaction};

/// Why an ambassador's XP changed
#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq)]
pub enum XpTxType {
    TaskCompletion,
    Referral,
    Streak,
    SpinWheel,
    MysteryBox,
    Quiz,
    BattleParticipation,
    BattleVote,
    Survey,
    Bonus,
    Redemption,
    RedemptionRefund,
    Correction,
}

impl XpTxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            XpTxType::TaskCompletion => "task_completion",
            XpTxType::Referral => "referral",
            XpTxType::Streak => "streak",
            XpTxType::SpinWheel => "spin_wheel",
            XpTxType::MysteryBox => "mystery_box",
            XpTxType::Quiz => "quiz",
            XpTxType::BattleParticipation => "battle_participation",
            XpTxType::BattleVote => "battle_vote",
            XpTxType::Survey => "survey",
            XpTxType::Bonus => "bonus",
            XpTxType::Redemption => "redemption",
            XpTxType::RedemptionRefund => "redemption_refund",
            XpTxType::Correction => "correction",
        }
    }

    /// Transaction types that mark a day as engaged for streaks
    pub fn counts_as_engagement(&self) -> bool {
        matches!(
            self,
            XpTxType::TaskCompletion
                | XpTxType::Referral
                | XpTxType::SpinWheel
                | XpTxType::MysteryBox
                | XpTxType::Quiz
        )
    }

    /// Types that services outside this module may post directly.
    /// Everything else has a dedicated reducer.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            XpTxType::Quiz
                | XpTxType::BattleParticipation
                | XpTxType::BattleVote
                | XpTxType::Survey
                | XpTxType::Streak
                | XpTxType::Bonus
        )
    }
}

/// What to do when a debit exceeds the balance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitPolicy {
    /// Reject the change (purchases, entry fees)
    RequireFunds,
    /// Floor the balance at zero and record only what was taken (penalties)
    Clamp,
}

/// Outcome of applying an amount to a balance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerDelta {
    pub requested: i64,
    pub applied: i64,
    pub balance_after: i64,
}

impl LedgerDelta {
    /// A clamped debit against an empty balance moves nothing
    pub fn is_noop(&self) -> bool {
        self.applied == 0
    }
}

/// Work out the new balance without touching storage
pub fn plan_delta(balance: i64, amount: i64, policy: DebitPolicy) -> Result<LedgerDelta, GameError> {
    if amount == 0 {
        return Err(GameError::ZeroAmount);
    }

    let target = balance.checked_add(amount).ok_or(GameError::Overflow)?;
    if target >= 0 {
        return Ok(LedgerDelta {
            requested: amount,
            applied: amount,
            balance_after: target,
        });
    }

    match policy {
        DebitPolicy::RequireFunds => Err(GameError::InsufficientXp {
            balance,
            required: amount.saturating_neg(),
        }),
        DebitPolicy::Clamp => Ok(LedgerDelta {
            requested: amount,
            applied: -balance,
            balance_after: 0,
        }),
    }
}

/// One ledger row as seen by the auditor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerLine {
    pub id: u64,
    pub amount: i64,
    pub balance_after: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub transactions: usize,
    pub total: i64,
}

/// Replay ledger lines (oldest first) and check each recorded
/// `balance_after`, then the final sum against the live balance.
pub fn reconcile(user_id: &str, lines: &[LedgerLine], live_balance: i64) -> Result<ReconcileReport, GameError> {
    let mut running = 0i64;
    for line in lines {
        running = running.checked_add(line.amount).ok_or(GameError::Overflow)?;
        if line.balance_after != running {
            return Err(GameError::LedgerMismatch {
                user_id: user_id.to_string(),
                transaction_id: line.id,
                expected: running,
                recorded: line.balance_after,
            });
        }
    }

    if running != live_balance {
        return Err(GameError::LedgerMismatch {
            user_id: user_id.to_string(),
            transaction_id: lines.last().map(|l| l.id).unwrap_or(0),
            expected: running,
            recorded: live_balance,
        });
    }

    Ok(ReconcileReport {
        transactions: lines.len(),
        total: running,
    })
}

/// A requested XP change
#[derive(Debug, Clone)]
pub struct XpPosting {
    pub user_id: String,
    pub tx_type: XpTxType,
    pub amount: i64,
    pub policy: DebitPolicy,
    pub source_type: Option<String>,
    pub source_id: Option<u64>,
    pub description: String,
    pub metadata: Option<Value>,
    pub expected_version: Option<u64>,
}

impl XpPosting {
    pub fn credit(user_id: &str, tx_type: XpTxType, amount: i64, description: impl Into<String>) -> Self {
        Self {
            user_id: user_id.to_string(),
            tx_type,
            amount,
            policy: DebitPolicy::RequireFunds,
            source_type: None,
            source_id: None,
            description: description.into(),
            metadata: None,
            expected_version: None,
        }
    }

    /// `cost` is the positive amount to take away
    pub fn debit(user_id: &str, tx_type: XpTxType, cost: i64, description: impl Into<String>) -> Self {
        Self::credit(user_id, tx_type, cost.saturating_neg(), description)
    }

    pub fn from_source(mut self, source_type: &str, source_id: u64) -> Self {
        self.source_type = Some(source_type.to_string());
        self.source_id = Some(source_id);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn expecting_version(mut self, version: Option<u64>) -> Self {
        self.expected_version = version;
        self
    }

    pub fn clamped(mut self) -> Self {
        self.policy = DebitPolicy::Clamp;
        self
    }
}

/// Apply an XP change atomically with its ledger row.
///
/// Re-reads the ambassador inside the current transaction, so the balance
/// check and the write cannot interleave with another reducer. Returns
/// None when a clamped debit had nothing to take; no row is written and
/// the version is left alone.
pub fn post_xp(ctx: &ReducerContext, posting: XpPosting) -> Result<Option<XpTransaction>, GameError> {
    let mut ambassador = ctx.db.ambassador()
        .id()
        .find(&posting.user_id)
        .ok_or_else(|| GameError::not_found("ambassador", &posting.user_id))?;

    if let Some(expected) = posting.expected_version {
        if expected != ambassador.xp_version {
            return Err(GameError::StaleBalance {
                expected,
                actual: ambassador.xp_version,
            });
        }
    }

    let delta = plan_delta(ambassador.xp, posting.amount, posting.policy)?;
    if delta.is_noop() {
        log::info!("[XP] user={} type={} requested={} applied=0 skipped=true",
            short_id(&posting.user_id), posting.tx_type.as_str(), delta.requested);
        return Ok(None);
    }

    let transaction = ctx.db.xp_transaction().insert(XpTransaction {
        id: 0, // auto_inc
        user_id: posting.user_id.clone(),
        tx_type: posting.tx_type,
        amount: delta.applied,
        balance_after: delta.balance_after,
        source_type: posting.source_type.clone(),
        source_id: posting.source_id,
        description: posting.description.clone(),
        metadata: posting.metadata.as_ref().map(|m| m.to_string()),
        created_at: ctx.timestamp,
    });

    ambassador.xp = delta.balance_after;
    ambassador.xp_version = ambassador.xp_version.saturating_add(1);
    ambassador.level_id = crate::levels::refresh_level_progress(ctx, &ambassador.id, ambassador.xp);
    let version = ambassador.xp_version;
    ctx.db.ambassador().id().update(ambassador);

    if posting.tx_type.counts_as_engagement() {
        crate::streak::refresh_streak_for(ctx, &posting.user_id);
    }

    if delta.applied != delta.requested {
        log::warn!("[XP] user={} type={} requested={} applied={} balance_after=0 clamped=true",
            short_id(&posting.user_id), posting.tx_type.as_str(), delta.requested, delta.applied);
    }
    log::info!("[XP] user={} tx={} type={} amount={} balance_after={} version={} source={}:{}",
        short_id(&posting.user_id), transaction.id, posting.tx_type.as_str(), delta.applied,
        delta.balance_after, version,
        posting.source_type.as_deref().unwrap_or("none"),
        posting.source_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()));

    Ok(Some(transaction))
}

// ==================== REDUCERS ====================

/// Grant bonus XP to an ambassador (workers only)
#[reducer]
pub fn award_xp(
    ctx: &ReducerContext,
    user_id: String,
    amount: i64,
    reason: String,
    expected_version: Option<u64>,
) -> Result<(), String> {
    require_worker(ctx)?;
    if amount <= 0 {
        return Err(GameError::NegativeAmount(amount).into());
    }

    post_xp(ctx, XpPosting::credit(&user_id, XpTxType::Bonus, amount, reason)
        .with_metadata(json!({ "awarded_by": ctx.sender.to_hex().to_string() }))
        .expecting_version(expected_version))?;
    Ok(())
}

/// Take XP away from an ambassador, never below zero (workers only)
#[reducer]
pub fn penalize_xp(
    ctx: &ReducerContext,
    user_id: String,
    amount: i64,
    reason: String,
    expected_version: Option<u64>,
) -> Result<(), String> {
    require_worker(ctx)?;
    if amount <= 0 {
        return Err(GameError::NegativeAmount(amount).into());
    }

    post_xp(ctx, XpPosting::debit(&user_id, XpTxType::Correction, amount, reason)
        .clamped()
        .with_metadata(json!({
            "penalized_by": ctx.sender.to_hex().to_string(),
            "requested": amount,
        }))
        .expecting_version(expected_version))?;
    Ok(())
}

/// Route XP earned or spent in an outside service (trivia, battles,
/// surveys) through the ledger (workers only). Debits require funds.
#[reducer]
pub fn record_external_xp(
    ctx: &ReducerContext,
    user_id: String,
    tx_type: XpTxType,
    amount: i64,
    source_type: String,
    source_id: u64,
    description: String,
) -> Result<(), String> {
    require_worker(ctx)?;
    if !tx_type.is_external() {
        return Err(GameError::InvalidInput(format!(
            "{} has a dedicated reducer",
            tx_type.as_str()
        )).into());
    }

    post_xp(ctx, XpPosting::credit(&user_id, tx_type, amount, description)
        .from_source(&source_type, source_id))?;
    Ok(())
}

/// Replay an ambassador's ledger and compare it with the live balance
/// (workers only). Fails with the first mismatching transaction.
#[reducer]
pub fn audit_ledger(ctx: &ReducerContext, user_id: String) -> Result<(), String> {
    require_worker(ctx)?;

    let ambassador = ctx.db.ambassador()
        .id()
        .find(&user_id)
        .ok_or_else(|| GameError::not_found("ambassador", &user_id))?;

    let mut lines: Vec<LedgerLine> = ctx.db.xp_transaction()
        .user_id()
        .filter(&user_id)
        .map(|tx| LedgerLine {
            id: tx.id,
            amount: tx.amount,
            balance_after: tx.balance_after,
        })
        .collect();
    lines.sort_by_key(|line| line.id);

    match reconcile(&user_id, &lines, ambassador.xp) {
        Ok(report) => {
            log::info!("[AUDIT] user={} transactions={} total={} consistent=true",
                short_id(&user_id), report.transactions, report.total);
            Ok(())
        }
        Err(e) => {
            log::error!("[AUDIT] user={} consistent=false error=\"{}\"", short_id(&user_id), e);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_and_debit() {
        let delta = plan_delta(100, 50, DebitPolicy::RequireFunds).unwrap();
        assert_eq!(delta, LedgerDelta { requested: 50, applied: 50, balance_after: 150 });

        let delta = plan_delta(100, -100, DebitPolicy::RequireFunds).unwrap();
        assert_eq!(delta.balance_after, 0);
    }

    #[test]
    fn test_require_funds_rejects_overdraft() {
        assert_eq!(
            plan_delta(40, -100, DebitPolicy::RequireFunds),
            Err(GameError::InsufficientXp { balance: 40, required: 100 })
        );
    }

    #[test]
    fn test_clamp_records_applied_amount() {
        let delta = plan_delta(40, -100, DebitPolicy::Clamp).unwrap();
        assert_eq!(delta, LedgerDelta { requested: -100, applied: -40, balance_after: 0 });

        assert!(!delta.is_noop());

        // Penalizing an empty balance applies nothing
        let delta = plan_delta(0, -10, DebitPolicy::Clamp).unwrap();
        assert_eq!(delta.applied, 0);
        assert_eq!(delta.balance_after, 0);
        assert!(delta.is_noop());
    }

    #[test]
    fn test_empty_penalty_leaves_no_line() {
        let (lines, balance) = apply_all(&[
            (-10, DebitPolicy::Clamp),
            (30, DebitPolicy::RequireFunds),
            (-50, DebitPolicy::Clamp),
            (-5, DebitPolicy::Clamp),
        ]);
        assert_eq!(balance, 0);
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.amount != 0));
        assert_eq!(lines[1].amount, -30);
    }

    #[test]
    fn test_zero_and_overflow() {
        assert_eq!(plan_delta(10, 0, DebitPolicy::RequireFunds), Err(GameError::ZeroAmount));
        assert_eq!(plan_delta(i64::MAX, 1, DebitPolicy::RequireFunds), Err(GameError::Overflow));
    }

    #[test]
    fn test_posting_builders() {
        let posting = XpPosting::debit("amb-1", XpTxType::Redemption, 250, "Reward redemption: Hoodie")
            .from_source("reward", 9)
            .expecting_version(Some(3));
        assert_eq!(posting.amount, -250);
        assert_eq!(posting.policy, DebitPolicy::RequireFunds);
        assert_eq!(posting.source_type.as_deref(), Some("reward"));
        assert_eq!(posting.source_id, Some(9));
        assert_eq!(posting.expected_version, Some(3));

        let penalty = XpPosting::debit("amb-1", XpTxType::Correction, 10, "spam").clamped();
        assert_eq!(penalty.policy, DebitPolicy::Clamp);
    }

    fn apply_all(amounts: &[(i64, DebitPolicy)]) -> (Vec<LedgerLine>, i64) {
        let mut balance = 0;
        let mut lines = Vec::new();
        for (i, (amount, policy)) in amounts.iter().enumerate() {
            if let Ok(delta) = plan_delta(balance, *amount, *policy) {
                if delta.is_noop() {
                    continue;
                }
                balance = delta.balance_after;
                lines.push(LedgerLine { id: i as u64 + 1, amount: delta.applied, balance_after: balance });
            }
        }
        (lines, balance)
    }

    #[test]
    fn test_running_sum_matches_balance() {
        let (lines, balance) = apply_all(&[
            (100, DebitPolicy::RequireFunds),
            (500, DebitPolicy::RequireFunds),
            (-250, DebitPolicy::RequireFunds),
            (-1000, DebitPolicy::RequireFunds), // rejected
            (-1000, DebitPolicy::Clamp),
            (10, DebitPolicy::RequireFunds),
        ]);
        assert_eq!(balance, 10);
        assert_eq!(lines.iter().map(|l| l.amount).sum::<i64>(), balance);

        let report = reconcile("amb-1", &lines, balance).unwrap();
        assert_eq!(report, ReconcileReport { transactions: 5, total: 10 });
    }

    #[test]
    fn test_reconcile_detects_tampering() {
        let (mut lines, balance) = apply_all(&[
            (100, DebitPolicy::RequireFunds),
            (20, DebitPolicy::RequireFunds),
            (-30, DebitPolicy::RequireFunds),
        ]);
        lines[1].balance_after = 125;
        match reconcile("amb-1", &lines, balance) {
            Err(GameError::LedgerMismatch { transaction_id, expected, recorded, .. }) => {
                assert_eq!(transaction_id, 2);
                assert_eq!(expected, 120);
                assert_eq!(recorded, 125);
            }
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_reconcile_detects_balance_drift() {
        let (lines, balance) = apply_all(&[(100, DebitPolicy::RequireFunds)]);
        assert!(reconcile("amb-1", &lines, balance + 100).is_err());
        assert!(reconcile("amb-1", &[], 0).is_ok());
    }

    #[test]
    fn test_engagement_types() {
        assert!(XpTxType::TaskCompletion.counts_as_engagement());
        assert!(XpTxType::Quiz.counts_as_engagement());
        assert!(!XpTxType::Bonus.counts_as_engagement());
        assert!(!XpTxType::Redemption.counts_as_engagement());
        assert!(XpTxType::Survey.is_external());
        assert!(!XpTxType::Redemption.is_external());
        assert_eq!(XpTxType::RedemptionRefund.as_str(), "redemption_refund");
    }
}
