// Spin wheels: configuration, probability checks at construction, and the
// spin itself (availability, weighted draw, stock, payout) in one reducer.

use spacetimedb::{rand::Rng, reducer, table, ReducerContext, SpacetimeType, Table, Timestamp};

use crate::error::GameError;
use crate::ledger::{post_xp, XpPosting, XpTxType};
use crate::levels::current_rank;
use crate::selector::{has_stock, next_quantity, select_reward_item, validate_probabilities, WheelBalance, Weighted};
use crate::streak::refresh_streak_for;
use crate::config::load_config;
use crate::engagement::calendar_day;
use crate::{get_ambassador, grant_badge, micros, require_worker, short_id, today};

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WheelType {
    Daily,
    Weekly,
    Special,
}

/// What a wheel slice or box prize pays out
#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardKind {
    Xp,
    Coins,
    Badge,
    Physical,
    Discount,
}

impl RewardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardKind::Xp => "xp",
            RewardKind::Coins => "coins",
            RewardKind::Badge => "badge",
            RewardKind::Physical => "physical",
            RewardKind::Discount => "discount",
        }
    }
}

#[table(name = spin_wheel, public)]
#[derive(Clone, Debug)]
pub struct SpinWheel {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    pub name: String,

    pub description: Option<String>,

    pub wheel_type: WheelType,

    pub is_active: bool,

    /// Spins allowed per ambassador per calendar day
    pub spins_per_user: u32,

    pub starts_at: Option<Timestamp>,

    pub ends_at: Option<Timestamp>,

    /// Lowest level rank allowed to spin
    pub min_level: u32,

    pub created_at: Timestamp,
}

impl SpinWheel {
    /// Active and inside its optional date window
    pub fn is_open(&self, now: Timestamp) -> bool {
        self.is_active
            && self.starts_at.map_or(true, |start| start <= now)
            && self.ends_at.map_or(true, |end| now <= end)
    }
}

/// One slice of a wheel
#[table(name = spin_wheel_item, public)]
#[derive(Clone, Debug, PartialEq)]
pub struct SpinWheelItem {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub wheel_id: u64,

    pub kind: RewardKind,

    /// XP amount, coin amount, badge id, or discount percent depending on kind
    pub value: i64,

    pub label: String,

    /// Chance of landing on this slice, in [0, 1]
    pub probability: f64,

    /// Stock limit; None or 0 means unlimited
    pub max_quantity: Option<u32>,

    pub current_quantity: Option<u32>,

    pub is_active: bool,

    pub sort_order: u32,
}

impl Weighted for SpinWheelItem {
    fn probability(&self) -> f64 {
        self.probability
    }
}

/// A completed spin, with a snapshot of the item it landed on
#[table(name = user_spin, public)]
#[derive(Clone, Debug)]
pub struct UserSpin {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub user_id: String,

    pub wheel_id: u64,

    pub item_id: u64,

    pub kind: RewardKind,

    pub value: i64,

    pub label: String,

    /// Spins left on this wheel for the rest of the day
    pub remaining_spins: u32,

    pub spun_at: Timestamp,
}

/// Items a spin can land on, in wheel order: active and still in stock.
/// An exhausted item's probability is not redistributed, so its share of
/// the draw falls through to the first candidate.
pub fn spin_candidates(mut items: Vec<SpinWheelItem>) -> Vec<SpinWheelItem> {
    items.retain(|item| item.is_active && has_stock(item.max_quantity, item.current_quantity));
    items.sort_by_key(|item| (item.sort_order, item.id));
    items
}

fn active_items(ctx: &ReducerContext, wheel_id: u64) -> Vec<SpinWheelItem> {
    ctx.db.spin_wheel_item()
        .wheel_id()
        .filter(&wheel_id)
        .filter(|item| item.is_active)
        .collect()
}

fn log_balance(wheel_id: u64, balance: WheelBalance) {
    if let WheelBalance::Skewed { missing } = balance {
        log::warn!("[SPIN] wheel={} probabilities short by {:.4}, remainder lands on the first item",
            wheel_id, missing);
    }
}

// ==================== REDUCERS ====================

/// Create a spin wheel (workers only). Items are added separately.
#[reducer]
pub fn create_spin_wheel(
    ctx: &ReducerContext,
    name: String,
    description: Option<String>,
    wheel_type: WheelType,
    spins_per_user: u32,
    starts_at: Option<Timestamp>,
    ends_at: Option<Timestamp>,
    min_level: u32,
) -> Result<(), String> {
    require_worker(ctx)?;

    if name.trim().is_empty() {
        return Err(GameError::InvalidInput("wheel name must not be empty".to_string()).into());
    }
    if spins_per_user == 0 {
        return Err(GameError::InvalidInput("spins_per_user must be positive".to_string()).into());
    }
    if let (Some(start), Some(end)) = (starts_at, ends_at) {
        if end < start {
            return Err(GameError::InvalidInput("ends_at is before starts_at".to_string()).into());
        }
    }

    let wheel = ctx.db.spin_wheel().insert(SpinWheel {
        id: 0, // auto_inc
        name: name.trim().to_string(),
        description,
        wheel_type,
        is_active: true,
        spins_per_user,
        starts_at,
        ends_at,
        min_level,
        created_at: ctx.timestamp,
    });

    log::info!("[SPIN] wheel created id={} name=\"{}\" spins_per_user={} min_level={}",
        wheel.id, wheel.name, spins_per_user, min_level);
    Ok(())
}

/// Turn a wheel on or off (workers only)
#[reducer]
pub fn set_wheel_active(ctx: &ReducerContext, wheel_id: u64, is_active: bool) -> Result<(), String> {
    require_worker(ctx)?;

    let mut wheel = ctx.db.spin_wheel()
        .id()
        .find(&wheel_id)
        .ok_or_else(|| GameError::not_found("spin wheel", wheel_id))?;
    wheel.is_active = is_active;
    ctx.db.spin_wheel().id().update(wheel);

    log::info!("[SPIN] wheel={} active={}", wheel_id, is_active);
    Ok(())
}

/// Add a slice to a wheel (workers only). Rejected if the wheel's active
/// probabilities would exceed 1.
#[reducer]
pub fn add_wheel_item(
    ctx: &ReducerContext,
    wheel_id: u64,
    kind: RewardKind,
    value: i64,
    label: String,
    probability: f64,
    max_quantity: Option<u32>,
    sort_order: u32,
) -> Result<(), String> {
    require_worker(ctx)?;

    if ctx.db.spin_wheel().id().find(&wheel_id).is_none() {
        return Err(GameError::not_found("spin wheel", wheel_id).into());
    }
    if kind == RewardKind::Xp && value <= 0 {
        return Err(GameError::NegativeAmount(value).into());
    }

    let existing = active_items(ctx, wheel_id);
    let balance = validate_probabilities(
        existing.iter().map(|item| item.probability).chain(std::iter::once(probability)),
    )?;

    let item = ctx.db.spin_wheel_item().insert(SpinWheelItem {
        id: 0, // auto_inc
        wheel_id,
        kind,
        value,
        label: label.trim().to_string(),
        probability,
        max_quantity,
        current_quantity: max_quantity.filter(|max| *max > 0).map(|_| 0),
        is_active: true,
        sort_order,
    });

    log_balance(wheel_id, balance);
    log::info!("[SPIN] item added wheel={} item={} kind={} value={} p={:.4}",
        wheel_id, item.id, kind.as_str(), value, probability);
    Ok(())
}

/// Change a slice's probability (workers only)
#[reducer]
pub fn set_item_probability(ctx: &ReducerContext, item_id: u64, probability: f64) -> Result<(), String> {
    require_worker(ctx)?;

    let mut item = ctx.db.spin_wheel_item()
        .id()
        .find(&item_id)
        .ok_or_else(|| GameError::not_found("spin wheel item", item_id))?;

    let others = active_items(ctx, item.wheel_id).into_iter().filter(|other| other.id != item_id);
    let balance = validate_probabilities(
        others.map(|other| other.probability).chain(std::iter::once(probability)),
    )?;

    let previous = item.probability;
    item.probability = probability;
    let wheel_id = item.wheel_id;
    ctx.db.spin_wheel_item().id().update(item);

    log_balance(wheel_id, balance);
    log::info!("[SPIN] item={} wheel={} p {:.4} -> {:.4}", item_id, wheel_id, previous, probability);
    Ok(())
}

/// Spin a wheel. Checks availability, draws among items still in stock,
/// records the spin and pays out, all in one transaction.
#[reducer]
pub fn spin(ctx: &ReducerContext, wheel_id: u64) -> Result<(), String> {
    let user_id = get_ambassador(ctx)?.id;

    let wheel = ctx.db.spin_wheel()
        .id()
        .find(&wheel_id)
        .ok_or_else(|| GameError::not_found("spin wheel", wheel_id))?;
    if !wheel.is_open(ctx.timestamp) {
        return Err(GameError::InvalidState(format!("spin wheel {} is not open", wheel_id)).into());
    }

    let day = today(ctx);
    let offset = load_config(ctx).day_offset_minutes;
    let spins_today = ctx.db.user_spin()
        .user_id()
        .filter(&user_id)
        .filter(|spin| spin.wheel_id == wheel_id && calendar_day(micros(spin.spun_at), offset) == day)
        .count() as u32;
    if spins_today >= wheel.spins_per_user {
        log::warn!("[SPIN] limit user={} wheel={} used={}", short_id(&user_id), wheel_id, spins_today);
        return Err(GameError::NoSpinsRemaining { used: spins_today, allowed: wheel.spins_per_user }.into());
    }

    let rank = current_rank(ctx, &user_id);
    if rank < wheel.min_level {
        return Err(GameError::LevelTooLow { required: wheel.min_level, current: rank }.into());
    }

    let candidates = spin_candidates(active_items(ctx, wheel_id));
    let r: f64 = ctx.rng().gen();
    let Some(selected) = select_reward_item(&candidates, r).cloned() else {
        return Err(GameError::OutOfStock(format!("every item on wheel {}", wheel_id)).into());
    };

    if let Some(quantity) = next_quantity(selected.max_quantity, selected.current_quantity) {
        if selected.current_quantity != Some(quantity) {
            let mut item = selected.clone();
            item.current_quantity = Some(quantity);
            ctx.db.spin_wheel_item().id().update(item);
        }
    }

    let remaining_spins = wheel.spins_per_user - spins_today - 1;
    let spin = ctx.db.user_spin().insert(UserSpin {
        id: 0, // auto_inc
        user_id: user_id.clone(),
        wheel_id,
        item_id: selected.id,
        kind: selected.kind,
        value: selected.value,
        label: selected.label.clone(),
        remaining_spins,
        spun_at: ctx.timestamp,
    });

    match selected.kind {
        RewardKind::Xp => {
            post_xp(ctx, XpPosting::credit(&user_id, XpTxType::SpinWheel, selected.value,
                format!("Spin wheel reward: {}", selected.label))
                .from_source("spin_wheel", spin.id))?;
        }
        RewardKind::Badge => {
            grant_badge(ctx, &user_id, selected.value, "spin", spin.id);
        }
        RewardKind::Physical => {
            crate::rewards::grant_prize_reward(ctx, &user_id, &selected.label, "spin", spin.id);
        }
        // Recorded on the spin row only
        RewardKind::Coins | RewardKind::Discount => {}
    }
    let streak = refresh_streak_for(ctx, &user_id);

    log::info!("[SPIN] user={} wheel={} spin={} r={:.4} item={} kind={} value={} remaining={} streak={}",
        short_id(&user_id), wheel_id, spin.id, r, selected.id, selected.kind.as_str(),
        selected.value, remaining_spins, streak.current_streak);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: u64, p: f64, sort_order: u32, max: Option<u32>, current: Option<u32>) -> SpinWheelItem {
        SpinWheelItem {
            id,
            wheel_id: 1,
            kind: RewardKind::Xp,
            value: 100,
            label: format!("item {}", id),
            probability: p,
            max_quantity: max,
            current_quantity: current,
            is_active: true,
            sort_order,
        }
    }

    #[test]
    fn test_candidates_follow_sort_order() {
        let items = vec![item(1, 0.5, 2, None, None), item(2, 0.5, 1, None, None)];
        let candidates = spin_candidates(items);
        assert_eq!(candidates.iter().map(|i| i.id).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(select_reward_item(&candidates, 0.1).map(|i| i.id), Some(2));
    }

    #[test]
    fn test_exhausted_items_are_never_drawn() {
        let items = vec![
            item(1, 0.5, 1, Some(3), Some(3)),
            item(2, 0.5, 2, None, None),
        ];
        let candidates = spin_candidates(items);
        assert_eq!(candidates.len(), 1);
        // Every draw lands on the remaining slice
        for r in [0.0, 0.25, 0.49, 0.5, 0.99] {
            assert_eq!(select_reward_item(&candidates, r).map(|i| i.id), Some(2));
        }
    }

    #[test]
    fn test_exhausted_share_falls_to_first_candidate() {
        let items = vec![
            item(1, 0.2, 1, None, None),
            item(2, 0.5, 2, Some(1), Some(1)),
            item(3, 0.3, 3, None, None),
        ];
        let candidates = spin_candidates(items);
        assert_eq!(candidates.iter().map(|i| i.id).collect::<Vec<_>>(), vec![1, 3]);

        assert_eq!(select_reward_item(&candidates, 0.1).map(|i| i.id), Some(1));
        assert_eq!(select_reward_item(&candidates, 0.3).map(|i| i.id), Some(3));
        // The sold-out 0.5 slice now lands on item 1 (0.2 + 0.5)
        assert_eq!(select_reward_item(&candidates, 0.6).map(|i| i.id), Some(1));
        assert_eq!(select_reward_item(&candidates, 0.95).map(|i| i.id), Some(1));
    }

    #[test]
    fn test_inactive_items_skipped() {
        let mut hidden = item(1, 0.5, 0, None, None);
        hidden.is_active = false;
        let candidates = spin_candidates(vec![hidden, item(2, 0.5, 1, None, None)]);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, 2);
    }

    #[test]
    fn test_fully_exhausted_wheel_has_no_candidates() {
        let candidates = spin_candidates(vec![item(1, 1.0, 0, Some(1), Some(1))]);
        assert!(select_reward_item(&candidates, 0.3).is_none());
    }

    #[test]
    fn test_wheel_window() {
        let now = Timestamp::from_micros_since_unix_epoch(1_000_000);
        let mut wheel = SpinWheel {
            id: 1,
            name: "Daily".to_string(),
            description: None,
            wheel_type: WheelType::Daily,
            is_active: true,
            spins_per_user: 1,
            starts_at: None,
            ends_at: None,
            min_level: 0,
            created_at: now,
        };
        assert!(wheel.is_open(now));

        wheel.starts_at = Some(Timestamp::from_micros_since_unix_epoch(2_000_000));
        assert!(!wheel.is_open(now));

        wheel.starts_at = Some(Timestamp::from_micros_since_unix_epoch(0));
        wheel.ends_at = Some(Timestamp::from_micros_since_unix_epoch(500_000));
        assert!(!wheel.is_open(now));

        wheel.ends_at = None;
        wheel.is_active = false;
        assert!(!wheel.is_open(now));
    }
}
