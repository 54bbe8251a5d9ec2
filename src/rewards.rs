// Ways to spend and collect XP outside the wheel: the reward store,
// mystery boxes, and secret codes.

use serde_json::{json, Map, Value};
use spacetimedb::{rand::Rng, reducer, table, ReducerContext, SpacetimeType, Table, Timestamp};

use crate::error::GameError;
use crate::ledger::{post_xp, XpPosting, XpTxType};
use crate::wheel::RewardKind;
use crate::{
    current_user_id, first_unused_code, format_redemption_code, generate_code, get_ambassador, grant_badge,
    require_worker, short_id,
};

/// Fields a physical reward's shipping address must carry
pub const SHIPPING_FIELDS: [&str; 7] = [
    "full_name",
    "address_line1",
    "city",
    "state",
    "country",
    "postal_code",
    "phone",
];

/// Redemption codes are 12 characters shown as XXXX-XXXX-XXXX
const REDEMPTION_CODE_LEN: usize = 12;
const REDEMPTION_CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

const SECRET_CODE_LEN: usize = 8;
const MAX_SECRET_CODE_LEN: usize = 50;

// ==================== TYPES ====================

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardType {
    Physical,
    Digital,
    Badge,
    XpBoost,
    ProfileSkin,
    Certificate,
    GiftCard,
}

impl RewardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardType::Physical => "physical",
            RewardType::Digital => "digital",
            RewardType::Badge => "badge",
            RewardType::XpBoost => "xp_boost",
            RewardType::ProfileSkin => "profile_skin",
            RewardType::Certificate => "certificate",
            RewardType::GiftCard => "gift_card",
        }
    }

    /// Digital goods are delivered as a redemption code
    pub fn issues_code(&self) -> bool {
        matches!(self, RewardType::Digital | RewardType::GiftCard)
    }
}

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedemptionStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Expired,
}

impl RedemptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedemptionStatus::Pending => "pending",
            RedemptionStatus::Processing => "processing",
            RedemptionStatus::Shipped => "shipped",
            RedemptionStatus::Delivered => "delivered",
            RedemptionStatus::Cancelled => "cancelled",
            RedemptionStatus::Expired => "expired",
        }
    }

    fn fulfilment_step(&self) -> Option<u8> {
        match self {
            RedemptionStatus::Pending => Some(0),
            RedemptionStatus::Processing => Some(1),
            RedemptionStatus::Shipped => Some(2),
            RedemptionStatus::Delivered => Some(3),
            RedemptionStatus::Cancelled | RedemptionStatus::Expired => None,
        }
    }

    /// Still cancellable by the ambassador, with a refund
    pub fn is_open(&self) -> bool {
        matches!(self, RedemptionStatus::Pending | RedemptionStatus::Processing)
    }

    /// Operator transitions: forward along fulfilment, or expire an open one.
    /// Cancellation goes through `cancel_redemption`.
    pub fn can_advance_to(&self, next: RedemptionStatus) -> bool {
        match (self.fulfilment_step(), next.fulfilment_step()) {
            (Some(from), Some(to)) => to > from,
            (Some(_), None) => next == RedemptionStatus::Expired && self.is_open(),
            _ => false,
        }
    }
}

/// One prize inside a mystery box
#[derive(SpacetimeType, Debug, Clone, PartialEq)]
pub struct BoxPrize {
    pub kind: RewardKind,
    pub value: i64,
    pub label: String,
}

// ==================== TABLES ====================

/// Item in the reward store
#[table(name = reward, public)]
#[derive(Clone, Debug)]
pub struct Reward {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    pub name: String,

    pub description: Option<String>,

    pub reward_type: RewardType,

    pub xp_cost: i64,

    /// Stock; None or 0 means unlimited
    pub quantity_available: Option<u32>,

    pub quantity_sold: u32,

    pub is_active: bool,

    pub created_at: Timestamp,
}

/// A claimed reward: a store redemption or a physical prize
#[table(name = user_reward, public)]
#[derive(Clone, Debug)]
pub struct UserReward {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub user_id: String,

    /// Store item, None for prizes won on a wheel or in a box
    pub reward_id: Option<u64>,

    /// "store", "spin" or "mystery_box"
    pub source_type: String,

    pub source_id: Option<u64>,

    pub label: String,

    pub status: RedemptionStatus,

    pub xp_paid: i64,

    pub redemption_code: Option<String>,

    /// Validated JSON object
    pub shipping_address: Option<String>,

    pub tracking_number: Option<String>,

    pub claimed_at: Timestamp,

    pub delivered_at: Option<Timestamp>,
}

#[table(name = mystery_box, public)]
#[derive(Clone, Debug)]
pub struct MysteryBox {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    pub name: String,

    pub description: Option<String>,

    pub cost_xp: i64,

    /// Drawn uniformly
    pub contents: Vec<BoxPrize>,

    pub is_active: bool,

    pub created_at: Timestamp,
}

#[table(name = mystery_box_opening, public)]
#[derive(Clone, Debug)]
pub struct MysteryBoxOpening {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub user_id: String,

    pub box_id: u64,

    pub prize: BoxPrize,

    pub cost_xp: i64,

    pub opened_at: Timestamp,
}

/// Bonus code handed out at events or on social channels
/// PRIVATE: codes must not be enumerable by clients
#[table(name = secret_code)]
#[derive(Clone, Debug)]
pub struct SecretCode {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    /// Stored uppercase
    #[unique]
    pub code: String,

    pub description: Option<String>,

    pub xp_reward: i64,

    pub badge_id: Option<i64>,

    /// 0 means unlimited
    pub max_redemptions: u32,

    pub current_redemptions: u32,

    pub valid_from: Timestamp,

    pub valid_until: Timestamp,

    pub is_active: bool,

    pub created_at: Timestamp,
}

impl SecretCode {
    /// Whether another ambassador may redeem this code at `now`
    pub fn check_available(&self, now: Timestamp) -> Result<(), GameError> {
        if !self.is_active || now < self.valid_from || now > self.valid_until {
            return Err(GameError::InvalidState("invalid or expired code".to_string()));
        }
        if self.max_redemptions > 0 && self.current_redemptions >= self.max_redemptions {
            return Err(GameError::OutOfStock("code redemptions".to_string()));
        }
        Ok(())
    }
}

#[table(name = secret_code_redemption, public)]
pub struct SecretCodeRedemption {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub code_id: u64,

    #[index(btree)]
    pub user_id: String,

    pub xp_awarded: i64,

    pub redeemed_at: Timestamp,
}

// ==================== HELPERS ====================

/// Parse and check a shipping address. Every field in `SHIPPING_FIELDS`
/// must be present as a non-empty string. Returns the compact JSON to store.
pub fn validate_shipping_address(raw: Option<&str>) -> Result<String, GameError> {
    let raw = raw
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| GameError::InvalidInput("shipping address is required".to_string()))?;

    let value: Value = serde_json::from_str(raw)
        .map_err(|e| GameError::InvalidInput(format!("invalid shipping address format: {}", e)))?;
    let address: &Map<String, Value> = value
        .as_object()
        .ok_or_else(|| GameError::InvalidInput("shipping address must be an object".to_string()))?;

    for field in SHIPPING_FIELDS {
        let present = address
            .get(field)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.trim().is_empty());
        if !present {
            return Err(GameError::InvalidInput(format!("missing required field: {}", field)));
        }
    }

    Ok(value.to_string())
}

/// Store stock check. Unlimited when `available` is None or 0.
pub fn reward_in_stock(available: Option<u32>, sold: u32) -> bool {
    match available {
        Some(limit) if limit > 0 => sold < limit,
        _ => true,
    }
}

/// `XXXX-XXXX-XXXX` over A-Z and 0-9
pub fn is_redemption_code(code: &str) -> bool {
    let groups: Vec<&str> = code.split('-').collect();
    groups.len() == 3
        && groups.iter().all(|g| {
            g.len() == 4 && g.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        })
}

fn new_redemption_code(ctx: &ReducerContext) -> String {
    format_redemption_code(&generate_code(ctx, REDEMPTION_CODE_CHARS, REDEMPTION_CODE_LEN))
}

/// Pending fulfilment row for a physical prize won on a wheel or in a box
pub(crate) fn grant_prize_reward(
    ctx: &ReducerContext,
    user_id: &str,
    label: &str,
    source_type: &str,
    source_id: u64,
) -> UserReward {
    let claim = ctx.db.user_reward().insert(UserReward {
        id: 0, // auto_inc
        user_id: user_id.to_string(),
        reward_id: None,
        source_type: source_type.to_string(),
        source_id: Some(source_id),
        label: label.to_string(),
        status: RedemptionStatus::Pending,
        xp_paid: 0,
        redemption_code: None,
        shipping_address: None,
        tracking_number: None,
        claimed_at: ctx.timestamp,
        delivered_at: None,
    });
    log::info!("[REWARD] prize claim={} user={} label=\"{}\" source={}:{}",
        claim.id, short_id(user_id), label, source_type, source_id);
    claim
}

fn find_redemption(ctx: &ReducerContext, redemption_id: u64) -> Result<UserReward, GameError> {
    ctx.db.user_reward()
        .id()
        .find(&redemption_id)
        .ok_or_else(|| GameError::not_found("redemption", redemption_id))
}

// ==================== REWARD STORE ====================

/// Add an item to the reward store (workers only)
#[reducer]
pub fn create_reward(
    ctx: &ReducerContext,
    name: String,
    description: Option<String>,
    reward_type: RewardType,
    xp_cost: i64,
    quantity_available: Option<u32>,
) -> Result<(), String> {
    require_worker(ctx)?;

    if name.trim().is_empty() {
        return Err(GameError::InvalidInput("reward name must not be empty".to_string()).into());
    }
    if xp_cost < 0 {
        return Err(GameError::NegativeAmount(xp_cost).into());
    }

    let reward = ctx.db.reward().insert(Reward {
        id: 0, // auto_inc
        name: name.trim().to_string(),
        description,
        reward_type,
        xp_cost,
        quantity_available,
        quantity_sold: 0,
        is_active: true,
        created_at: ctx.timestamp,
    });

    log::info!("[REWARD] created id={} name=\"{}\" type={} xp_cost={} stock={:?}",
        reward.id, reward.name, reward_type.as_str(), xp_cost, quantity_available);
    Ok(())
}

/// List or delist a store item (workers only)
#[reducer]
pub fn set_reward_active(ctx: &ReducerContext, reward_id: u64, is_active: bool) -> Result<(), String> {
    require_worker(ctx)?;

    let mut reward = ctx.db.reward()
        .id()
        .find(&reward_id)
        .ok_or_else(|| GameError::not_found("reward", reward_id))?;
    reward.is_active = is_active;
    ctx.db.reward().id().update(reward);

    log::info!("[REWARD] id={} active={}", reward_id, is_active);
    Ok(())
}

/// Spend XP on a store item. Physical items need `shipping_address`
/// (a JSON object); digital items and gift cards get a redemption code.
#[reducer]
pub fn redeem_reward(ctx: &ReducerContext, reward_id: u64, shipping_address: Option<String>) -> Result<(), String> {
    let user_id = get_ambassador(ctx)?.id;

    let mut reward = ctx.db.reward()
        .id()
        .find(&reward_id)
        .ok_or_else(|| GameError::not_found("reward", reward_id))?;
    if !reward.is_active {
        return Err(GameError::InvalidState(format!("reward {} is not available", reward_id)).into());
    }
    if !reward_in_stock(reward.quantity_available, reward.quantity_sold) {
        log::warn!("[REWARD] out of stock reward={} user={}", reward_id, short_id(&user_id));
        return Err(GameError::OutOfStock(reward.name.clone()).into());
    }

    // Single-unit rewards can only be claimed once per ambassador
    if reward.quantity_available == Some(1) {
        let claimed = ctx.db.user_reward()
            .user_id()
            .filter(&user_id)
            .any(|r| r.reward_id == Some(reward_id) && r.status != RedemptionStatus::Cancelled);
        if claimed {
            return Err(GameError::AlreadyRedeemed(reward.name.clone()).into());
        }
    }

    let shipping_address = if reward.reward_type == RewardType::Physical {
        Some(validate_shipping_address(shipping_address.as_deref())?)
    } else {
        None
    };
    let redemption_code = reward.reward_type.issues_code().then(|| new_redemption_code(ctx));

    let redemption = ctx.db.user_reward().insert(UserReward {
        id: 0, // auto_inc
        user_id: user_id.clone(),
        reward_id: Some(reward_id),
        source_type: "store".to_string(),
        source_id: Some(reward_id),
        label: reward.name.clone(),
        status: RedemptionStatus::Pending,
        xp_paid: reward.xp_cost,
        redemption_code,
        shipping_address,
        tracking_number: None,
        claimed_at: ctx.timestamp,
        delivered_at: None,
    });

    if reward.xp_cost > 0 {
        post_xp(ctx, XpPosting::debit(&user_id, XpTxType::Redemption, reward.xp_cost,
            format!("Reward redemption: {}", reward.name))
            .from_source("reward", redemption.id)
            .with_metadata(json!({
                "reward_id": reward_id,
                "reward_name": reward.name,
                "redemption_id": redemption.id,
            })))?;
    }

    reward.quantity_sold = reward.quantity_sold.saturating_add(1);
    let sold = reward.quantity_sold;
    ctx.db.reward().id().update(reward);

    log::info!("[REWARD] redeemed redemption={} reward={} user={} xp_paid={} sold={} code={}",
        redemption.id, reward_id, short_id(&user_id), redemption.xp_paid, sold,
        redemption.redemption_code.is_some());
    Ok(())
}

/// Cancel an open redemption and refund the XP paid for it
#[reducer]
pub fn cancel_redemption(ctx: &ReducerContext, redemption_id: u64) -> Result<(), String> {
    let user_id = current_user_id(ctx)?;

    let mut redemption = find_redemption(ctx, redemption_id)?;
    if redemption.user_id != user_id {
        return Err(GameError::Unauthorized("redemption belongs to another ambassador").into());
    }
    if !redemption.status.is_open() {
        return Err(GameError::InvalidState(format!(
            "cannot cancel a {} redemption", redemption.status.as_str()
        )).into());
    }

    if redemption.xp_paid > 0 {
        post_xp(ctx, XpPosting::credit(&user_id, XpTxType::RedemptionRefund, redemption.xp_paid,
            format!("Refund: {}", redemption.label))
            .from_source("reward", redemption.id))?;
    }

    if let Some(reward_id) = redemption.reward_id {
        if let Some(mut reward) = ctx.db.reward().id().find(&reward_id) {
            reward.quantity_sold = reward.quantity_sold.saturating_sub(1);
            ctx.db.reward().id().update(reward);
        }
    }

    redemption.status = RedemptionStatus::Cancelled;
    let refunded = redemption.xp_paid;
    ctx.db.user_reward().id().update(redemption);

    log::info!("[REWARD] cancelled redemption={} user={} refunded={}", redemption_id, short_id(&user_id), refunded);
    Ok(())
}

/// Move a redemption along fulfilment (workers only)
#[reducer]
pub fn set_redemption_status(
    ctx: &ReducerContext,
    redemption_id: u64,
    status: RedemptionStatus,
    tracking_number: Option<String>,
) -> Result<(), String> {
    require_worker(ctx)?;

    let mut redemption = find_redemption(ctx, redemption_id)?;
    let previous = redemption.status;
    if !previous.can_advance_to(status) {
        return Err(GameError::InvalidState(format!(
            "cannot move redemption from {} to {}", previous.as_str(), status.as_str()
        )).into());
    }

    redemption.status = status;
    if tracking_number.is_some() {
        redemption.tracking_number = tracking_number;
    }
    if status == RedemptionStatus::Delivered {
        redemption.delivered_at = Some(ctx.timestamp);
    }
    ctx.db.user_reward().id().update(redemption);

    log::info!("[REWARD] redemption={} status {} -> {}", redemption_id, previous.as_str(), status.as_str());
    Ok(())
}

// ==================== MYSTERY BOXES ====================

/// Create a mystery box (workers only)
#[reducer]
pub fn create_mystery_box(
    ctx: &ReducerContext,
    name: String,
    description: Option<String>,
    cost_xp: i64,
    contents: Vec<BoxPrize>,
) -> Result<(), String> {
    require_worker(ctx)?;

    if cost_xp <= 0 {
        return Err(GameError::NegativeAmount(cost_xp).into());
    }
    if contents.is_empty() {
        return Err(GameError::InvalidInput("mystery box must contain at least one prize".to_string()).into());
    }
    if let Some(bad) = contents.iter().find(|p| p.kind == RewardKind::Xp && p.value <= 0) {
        return Err(GameError::InvalidInput(format!("XP prize \"{}\" must be positive", bad.label)).into());
    }

    let mystery_box = ctx.db.mystery_box().insert(MysteryBox {
        id: 0, // auto_inc
        name: name.trim().to_string(),
        description,
        cost_xp,
        contents,
        is_active: true,
        created_at: ctx.timestamp,
    });

    log::info!("[REWARD] mystery box created id={} cost_xp={} prizes={}",
        mystery_box.id, cost_xp, mystery_box.contents.len());
    Ok(())
}

/// Pay for and open a mystery box. Every prize is equally likely.
#[reducer]
pub fn open_mystery_box(ctx: &ReducerContext, box_id: u64) -> Result<(), String> {
    let user_id = get_ambassador(ctx)?.id;

    let mystery_box = ctx.db.mystery_box()
        .id()
        .find(&box_id)
        .ok_or_else(|| GameError::not_found("mystery box", box_id))?;
    if !mystery_box.is_active {
        return Err(GameError::InvalidState(format!("mystery box {} is not available", box_id)).into());
    }
    if mystery_box.contents.is_empty() {
        return Err(GameError::InvalidState(format!("mystery box {} is empty", box_id)).into());
    }

    post_xp(ctx, XpPosting::debit(&user_id, XpTxType::MysteryBox, mystery_box.cost_xp, "Mystery box purchase")
        .from_source("mystery_box", box_id))?;

    let pick = ctx.rng().gen_range(0..mystery_box.contents.len());
    let prize = mystery_box.contents[pick].clone();

    let opening = ctx.db.mystery_box_opening().insert(MysteryBoxOpening {
        id: 0, // auto_inc
        user_id: user_id.clone(),
        box_id,
        prize: prize.clone(),
        cost_xp: mystery_box.cost_xp,
        opened_at: ctx.timestamp,
    });

    match prize.kind {
        RewardKind::Xp => {
            post_xp(ctx, XpPosting::credit(&user_id, XpTxType::MysteryBox, prize.value,
                format!("Mystery box reward: {}", prize.label))
                .from_source("mystery_box_opening", opening.id))?;
        }
        RewardKind::Badge => {
            grant_badge(ctx, &user_id, prize.value, "mystery_box", opening.id);
        }
        RewardKind::Physical => {
            grant_prize_reward(ctx, &user_id, &prize.label, "mystery_box", opening.id);
        }
        RewardKind::Coins | RewardKind::Discount => {}
    }

    log::info!("[REWARD] box opened user={} box={} opening={} cost={} prize={} value={}",
        short_id(&user_id), box_id, opening.id, mystery_box.cost_xp, prize.kind.as_str(), prize.value);
    Ok(())
}

// ==================== SECRET CODES ====================

/// Create a secret code (workers only). A code is generated when none is given.
#[reducer]
pub fn create_secret_code(
    ctx: &ReducerContext,
    code: Option<String>,
    description: Option<String>,
    xp_reward: i64,
    badge_id: Option<i64>,
    max_redemptions: u32,
    valid_from: Timestamp,
    valid_until: Timestamp,
) -> Result<(), String> {
    require_worker(ctx)?;

    if xp_reward < 0 {
        return Err(GameError::NegativeAmount(xp_reward).into());
    }
    if xp_reward == 0 && badge_id.is_none() {
        return Err(GameError::InvalidInput("code must grant XP or a badge".to_string()).into());
    }
    if valid_until < valid_from {
        return Err(GameError::InvalidInput("valid_until is before valid_from".to_string()).into());
    }

    let code = match code {
        Some(code) => code.trim().to_uppercase(),
        None => first_unused_code(
            || generate_code(ctx, REDEMPTION_CODE_CHARS, SECRET_CODE_LEN),
            |code| ctx.db.secret_code().code().find(&code.to_string()).is_some(),
        )
        .ok_or_else(|| GameError::InvalidState("could not generate a unique secret code".to_string()))?,
    };
    if code.is_empty() || code.len() > MAX_SECRET_CODE_LEN {
        return Err(GameError::InvalidInput(format!("code must be 1-{} characters", MAX_SECRET_CODE_LEN)).into());
    }
    if ctx.db.secret_code().code().find(&code).is_some() {
        return Err(GameError::InvalidInput("code already exists".to_string()).into());
    }

    let secret = ctx.db.secret_code().insert(SecretCode {
        id: 0, // auto_inc
        code,
        description,
        xp_reward,
        badge_id,
        max_redemptions,
        current_redemptions: 0,
        valid_from,
        valid_until,
        is_active: true,
        created_at: ctx.timestamp,
    });

    log::info!("[REWARD] secret code created id={} xp={} badge={:?} max={}",
        secret.id, xp_reward, badge_id, max_redemptions);
    Ok(())
}

/// Redeem a secret code, once per ambassador
#[reducer]
pub fn redeem_secret_code(ctx: &ReducerContext, code: String) -> Result<(), String> {
    let user_id = get_ambassador(ctx)?.id;

    let code = code.trim().to_uppercase();
    let mut secret = ctx.db.secret_code()
        .code()
        .find(&code)
        .ok_or_else(|| GameError::InvalidState("invalid or expired code".to_string()))?;
    if let Err(e) = secret.check_available(ctx.timestamp) {
        log::warn!("[REWARD] code rejected user={} code_id={} reason=\"{}\"", short_id(&user_id), secret.id, e);
        return Err(e.into());
    }

    let already = ctx.db.secret_code_redemption()
        .code_id()
        .filter(&secret.id)
        .any(|r| r.user_id == user_id);
    if already {
        return Err(GameError::AlreadyRedeemed("code".to_string()).into());
    }

    let redemption = ctx.db.secret_code_redemption().insert(SecretCodeRedemption {
        id: 0, // auto_inc
        code_id: secret.id,
        user_id: user_id.clone(),
        xp_awarded: secret.xp_reward,
        redeemed_at: ctx.timestamp,
    });

    secret.current_redemptions = secret.current_redemptions.saturating_add(1);
    let code_id = secret.id;
    let xp_reward = secret.xp_reward;
    let badge_id = secret.badge_id;
    let description = match &secret.description {
        Some(d) => format!("Secret code redemption: {}", d),
        None => "Secret code redemption".to_string(),
    };
    ctx.db.secret_code().id().update(secret);

    if xp_reward > 0 {
        post_xp(ctx, XpPosting::credit(&user_id, XpTxType::Bonus, xp_reward, description)
            .from_source("secret_code", code_id))?;
    }
    if let Some(badge_id) = badge_id {
        grant_badge(ctx, &user_id, badge_id, "secret_code", redemption.id);
    }

    log::info!("[REWARD] code redeemed user={} code_id={} xp={} badge={:?}",
        short_id(&user_id), code_id, xp_reward, badge_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_address() -> Value {
        json!({
            "full_name": "Asha Rao",
            "address_line1": "12 MG Road",
            "city": "Pune",
            "state": "MH",
            "country": "IN",
            "postal_code": "411001",
            "phone": "+91 90000 00000",
        })
    }

    #[test]
    fn test_shipping_address_accepts_complete_object() {
        let raw = full_address().to_string();
        let stored = validate_shipping_address(Some(&raw)).unwrap();
        let parsed: Value = serde_json::from_str(&stored).unwrap();
        assert_eq!(parsed["city"], "Pune");
    }

    #[test]
    fn test_shipping_address_reports_first_missing_field() {
        let mut address = full_address();
        address.as_object_mut().unwrap().remove("city");
        address.as_object_mut().unwrap().remove("phone");
        let err = validate_shipping_address(Some(&address.to_string())).unwrap_err();
        assert_eq!(err, GameError::InvalidInput("missing required field: city".to_string()));
    }

    #[test]
    fn test_shipping_address_rejects_blank_and_malformed() {
        assert!(validate_shipping_address(None).is_err());
        assert!(validate_shipping_address(Some("  ")).is_err());
        assert!(validate_shipping_address(Some("not json")).is_err());
        assert!(validate_shipping_address(Some("[1, 2]")).is_err());

        let mut address = full_address();
        address["state"] = json!("");
        assert!(validate_shipping_address(Some(&address.to_string())).is_err());
    }

    #[test]
    fn test_reward_stock() {
        assert!(reward_in_stock(None, 1000));
        assert!(reward_in_stock(Some(0), 1000));
        assert!(reward_in_stock(Some(5), 4));
        assert!(!reward_in_stock(Some(5), 5));
    }

    #[test]
    fn test_redemption_code_shape() {
        assert!(is_redemption_code(&format_redemption_code("AB12CD34EF56")));
        assert!(!is_redemption_code("AB12-CD34"));
        assert!(!is_redemption_code("ab12-cd34-ef56"));
        assert!(!is_redemption_code("AB12-CD34-EF5!"));
    }

    #[test]
    fn test_redemption_transitions() {
        use RedemptionStatus::*;
        assert!(Pending.can_advance_to(Processing));
        assert!(Pending.can_advance_to(Shipped));
        assert!(Shipped.can_advance_to(Delivered));
        assert!(Processing.can_advance_to(Expired));
        assert!(!Shipped.can_advance_to(Pending));
        assert!(!Shipped.can_advance_to(Expired));
        assert!(!Pending.can_advance_to(Cancelled));
        assert!(!Cancelled.can_advance_to(Processing));
        assert!(!Delivered.can_advance_to(Delivered));

        assert!(Processing.is_open());
        assert!(!Shipped.is_open());
    }

    #[test]
    fn test_reward_types() {
        assert!(RewardType::GiftCard.issues_code());
        assert!(RewardType::Digital.issues_code());
        assert!(!RewardType::Physical.issues_code());
    }

    #[test]
    fn test_secret_code_availability() {
        let at = |micros| Timestamp::from_micros_since_unix_epoch(micros);
        let mut code = SecretCode {
            id: 1,
            code: "CAMPUS24".to_string(),
            description: None,
            xp_reward: 50,
            badge_id: None,
            max_redemptions: 2,
            current_redemptions: 0,
            valid_from: at(1_000),
            valid_until: at(2_000),
            is_active: true,
            created_at: at(0),
        };
        assert!(code.check_available(at(1_500)).is_ok());
        assert!(code.check_available(at(500)).is_err());
        assert!(code.check_available(at(2_001)).is_err());

        code.current_redemptions = 2;
        assert!(matches!(code.check_available(at(1_500)), Err(GameError::OutOfStock(_))));

        code.max_redemptions = 0;
        assert!(code.check_available(at(1_500)).is_ok());

        code.is_active = false;
        assert!(code.check_available(at(1_500)).is_err());
    }
}
