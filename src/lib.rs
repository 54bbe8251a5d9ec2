use spacetimedb::{
    ReducerContext, Identity, Table, Timestamp,
    table, reducer, view, SpacetimeType, rand::Rng,
    client_visibility_filter, Filter,
};
use chrono::NaiveDate;

pub mod error;
pub mod engagement;
pub mod selector;
pub mod config;
pub mod ledger;
pub mod levels;
pub mod streak;
pub mod tasks;
pub mod wheel;
pub mod rewards;
pub mod leaderboard;

use error::GameError;
use ledger::{post_xp, XpPosting, XpTxType};

// ==================== CONSTANTS ====================

/// Length of an ambassador's shareable referral code
const REFERRAL_CODE_LEN: usize = 8;

/// Referral codes avoid confusable characters (no I, O, 0, 1)
const REFERRAL_CODE_CHARS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Attempts at generating a code that is not already taken
const CODE_GENERATION_ATTEMPTS: usize = 16;

/// Longest display name accepted on connect
const MAX_NAME_LEN: usize = 64;

// ==================== TABLES ====================

/// Session links ephemeral connection to stable ambassador
/// PRIVATE: written only by the gateway through `create_session`
#[table(name = session)]
pub struct Session {
    #[primary_key]
    pub connection_id: Identity,

    /// Stable ambassador id, verified by the gateway
    #[index(btree)]
    pub user_id: String,

    pub connected_at: Timestamp,
}

/// Identities allowed to call admin reducers (gateway, ops tooling)
#[table(name = authorized_worker)]
pub struct AuthorizedWorker {
    #[primary_key]
    pub identity: Identity,
}

/// Ambassador profile and live XP balance
/// PRIVATE: clients read their own row through the my_ambassador view
#[table(name = ambassador)]
#[derive(Clone, Debug)]
pub struct Ambassador {
    #[primary_key]
    pub id: String,

    pub name: String,

    /// Shareable code other ambassadors sign up with
    #[unique]
    pub referral_code: String,

    /// Ambassador who referred this one, if any
    pub referred_by: Option<String>,

    /// Live XP balance. Always equals the sum of this ambassador's ledger amounts.
    pub xp: i64,

    /// Bumped on every balance change, for compare-and-swap callers
    pub xp_version: u64,

    /// Highest level whose threshold the balance reaches
    pub level_id: Option<u64>,

    pub created_at: Timestamp,

    pub last_seen: Timestamp,
}

/// Append-only XP ledger
#[table(name = xp_transaction, public)]
#[derive(Clone, Debug)]
pub struct XpTransaction {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub user_id: String,

    pub tx_type: XpTxType,

    /// Signed: credits positive, debits negative
    pub amount: i64,

    pub balance_after: i64,

    /// What produced the change ("submission", "spin", "reward", ...)
    pub source_type: Option<String>,

    pub source_id: Option<u64>,

    pub description: String,

    /// Free-form JSON
    pub metadata: Option<String>,

    pub created_at: Timestamp,
}

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferralStatus {
    /// Referred ambassador signed up
    Joined,
    /// Referred ambassador completed their first task
    CompletedTask,
}

/// Who brought whom in
#[table(name = referral, public)]
#[derive(Clone, Debug)]
pub struct Referral {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub referrer_id: String,

    #[unique]
    pub referred_id: String,

    pub status: ReferralStatus,

    pub xp_awarded: i64,

    pub created_at: Timestamp,
}

/// Badges granted by spins, mystery boxes and secret codes
#[table(name = user_badge, public)]
pub struct UserBadge {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub user_id: String,

    /// Badge identifier (the reward value that granted it)
    pub badge_id: i64,

    /// "spin", "mystery_box" or "secret_code"
    pub source_type: String,

    pub source_id: u64,

    pub awarded_at: Timestamp,
}

// ==================== VIEWS ====================

/// The caller's own ambassador profile
#[view(name = my_ambassador, public)]
fn my_ambassador(ctx: &spacetimedb::ViewContext) -> Option<Ambassador> {
    let session = ctx.db.session().connection_id().find(ctx.sender)?;
    ctx.db.ambassador().id().find(&session.user_id)
}

// ==================== ROW LEVEL SECURITY ====================

/// Ambassadors only see their own ledger rows
#[client_visibility_filter]
const XP_TRANSACTION_VISIBILITY: Filter = Filter::Sql(
    "SELECT t.* FROM xp_transaction t
     JOIN session s ON s.user_id = t.user_id
     WHERE s.connection_id = :sender"
);

// ==================== HELPERS ====================

/// First 8 characters of an id, for log lines
pub(crate) fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

pub(crate) fn is_worker(ctx: &ReducerContext) -> bool {
    ctx.db.authorized_worker().identity().find(&ctx.sender).is_some()
}

/// Reject callers that are not authorized workers
pub(crate) fn require_worker(ctx: &ReducerContext) -> Result<(), GameError> {
    if is_worker(ctx) {
        Ok(())
    } else {
        log::warn!("[AUTH] rejected sender={}", ctx.sender);
        Err(GameError::Unauthorized("only authorized workers may call this reducer"))
    }
}

/// Ambassador id bound to the caller's connection
pub(crate) fn current_user_id(ctx: &ReducerContext) -> Result<String, GameError> {
    ctx.db.session()
        .connection_id()
        .find(&ctx.sender)
        .map(|session| session.user_id)
        .ok_or(GameError::NoSession)
}

/// Ambassador for the caller's session
pub(crate) fn get_ambassador(ctx: &ReducerContext) -> Result<Ambassador, GameError> {
    let user_id = current_user_id(ctx)?;
    ctx.db.ambassador()
        .id()
        .find(&user_id)
        .ok_or_else(|| GameError::not_found("ambassador", user_id))
}

pub(crate) fn micros(ts: Timestamp) -> i64 {
    ts.to_micros_since_unix_epoch()
}

/// Calendar day of `ts` under the configured day offset
pub(crate) fn calendar_day_of(ctx: &ReducerContext, ts: Timestamp) -> NaiveDate {
    let offset = config::load_config(ctx).day_offset_minutes;
    engagement::calendar_day(micros(ts), offset)
}

/// Today's calendar day under the configured day offset
pub(crate) fn today(ctx: &ReducerContext) -> NaiveDate {
    calendar_day_of(ctx, ctx.timestamp)
}

/// Random code of `len` characters drawn from `alphabet`
pub(crate) fn generate_code(ctx: &ReducerContext, alphabet: &[u8], len: usize) -> String {
    let mut rng = ctx.rng();
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

/// Group a code into dash-separated blocks of four: `ABCD-EFGH-IJKL`
pub fn format_redemption_code(raw: &str) -> String {
    raw.chars()
        .collect::<Vec<_>>()
        .chunks(4)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}

pub(crate) fn grant_badge(ctx: &ReducerContext, user_id: &str, badge_id: i64, source_type: &str, source_id: u64) {
    ctx.db.user_badge().insert(UserBadge {
        id: 0, // auto_inc
        user_id: user_id.to_string(),
        badge_id,
        source_type: source_type.to_string(),
        source_id,
        awarded_at: ctx.timestamp,
    });
    log::info!("[BADGE] user={} badge={} source={}:{}", short_id(user_id), badge_id, source_type, source_id);
}

/// Draw up to `CODE_GENERATION_ATTEMPTS` codes and keep the first one not taken
pub(crate) fn first_unused_code(
    mut generate: impl FnMut() -> String,
    is_taken: impl Fn(&str) -> bool,
) -> Option<String> {
    (0..CODE_GENERATION_ATTEMPTS)
        .map(|_| generate())
        .find(|code| !is_taken(code))
}

fn unique_referral_code(ctx: &ReducerContext) -> Result<String, GameError> {
    first_unused_code(
        || generate_code(ctx, REFERRAL_CODE_CHARS, REFERRAL_CODE_LEN),
        |code| ctx.db.ambassador().referral_code().find(&code.to_string()).is_some(),
    )
    .ok_or_else(|| GameError::InvalidState("could not generate a unique referral code".to_string()))
}

fn clean_name(name: &str) -> Result<String, GameError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(GameError::InvalidInput("name must not be empty".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(GameError::InvalidInput(format!("name longer than {} characters", MAX_NAME_LEN)));
    }
    Ok(name.to_string())
}

// ==================== REDUCERS ====================

/// Set up config, the owner's worker row and the leaderboard schedule
#[reducer(init)]
pub fn init(ctx: &ReducerContext) {
    // In init, ctx.sender is the module owner identity
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        ctx.db.authorized_worker().insert(AuthorizedWorker {
            identity: ctx.sender,
        });
    }

    config::ensure_config(ctx);
    let refresh_secs = config::load_config(ctx).leaderboard_refresh_secs;
    leaderboard::ensure_refresh_schedule(ctx, refresh_secs);

    log::info!("Ambassador module initialized refresh_secs={}", refresh_secs);
}

/// Authorize another gateway or admin identity (workers only)
#[reducer]
pub fn add_authorized_worker(ctx: &ReducerContext, identity: String) -> Result<(), String> {
    require_worker(ctx)?;

    let identity = Identity::from_hex(&identity)
        .map_err(|_| GameError::InvalidInput("invalid identity hex string".to_string()))?;
    if ctx.db.authorized_worker().identity().find(&identity).is_none() {
        ctx.db.authorized_worker().insert(AuthorizedWorker { identity });
        log::info!("[AUTH] worker added identity={}", identity);
    }
    Ok(())
}

/// Bind a client connection to a verified ambassador id.
/// Called by the gateway after it has authenticated the client.
#[reducer]
pub fn create_session(ctx: &ReducerContext, client_identity: String, user_id: String) -> Result<(), String> {
    require_worker(ctx)?;

    let identity = Identity::from_hex(&client_identity)
        .map_err(|_| GameError::InvalidInput("invalid identity hex string".to_string()))?;

    // Same ambassador reconnecting, or the same connection being rebound
    let stale: Vec<_> = ctx.db.session()
        .iter()
        .filter(|s| s.user_id == user_id || s.connection_id == identity)
        .map(|s| s.connection_id)
        .collect();
    for connection_id in stale {
        ctx.db.session().connection_id().delete(&connection_id);
    }

    ctx.db.session().insert(Session {
        connection_id: identity,
        user_id: user_id.clone(),
        connected_at: ctx.timestamp,
    });

    log::info!("[SESSION] created user={} ws={}", short_id(&user_id), short_id(&client_identity));
    Ok(())
}

/// Ambassador connects. First connect creates the profile, posts the
/// starting XP and credits the referrer when a valid code is given.
#[reducer]
pub fn connect(ctx: &ReducerContext, name: String, referral_code: Option<String>) -> Result<(), String> {
    let user_id = current_user_id(ctx)?;
    let name = clean_name(&name)?;

    if let Some(mut existing) = ctx.db.ambassador().id().find(&user_id) {
        existing.name = name;
        existing.last_seen = ctx.timestamp;
        let xp = existing.xp;
        ctx.db.ambassador().id().update(existing);
        streak::refresh_streak_for(ctx, &user_id);

        log::info!("[CONNECT] returning user={} xp={}", short_id(&user_id), xp);
        return Ok(());
    }

    let config = config::load_config(ctx);

    // Unknown or self-referencing codes are ignored rather than failing signup
    let referrer = referral_code
        .map(|code| code.trim().to_uppercase())
        .filter(|code| !code.is_empty())
        .and_then(|code| ctx.db.ambassador().referral_code().find(&code))
        .filter(|referrer| referrer.id != user_id);

    let ambassador = ctx.db.ambassador().insert(Ambassador {
        id: user_id.clone(),
        name: name.clone(),
        referral_code: unique_referral_code(ctx)?,
        referred_by: referrer.as_ref().map(|r| r.id.clone()),
        xp: 0,
        xp_version: 0,
        level_id: None,
        created_at: ctx.timestamp,
        last_seen: ctx.timestamp,
    });
    levels::refresh_level_progress(ctx, &ambassador.id, 0);

    if config.starting_xp > 0 {
        post_xp(ctx, XpPosting::credit(&user_id, XpTxType::Bonus, config.starting_xp, "Welcome bonus"))?;
    }

    if let Some(referrer) = referrer {
        let referral = ctx.db.referral().insert(Referral {
            id: 0, // auto_inc
            referrer_id: referrer.id.clone(),
            referred_id: user_id.clone(),
            status: ReferralStatus::Joined,
            xp_awarded: config.referral_xp,
            created_at: ctx.timestamp,
        });

        if config.referral_xp > 0 {
            post_xp(ctx, XpPosting::credit(&referrer.id, XpTxType::Referral, config.referral_xp, "Referral bonus")
                .from_source("referral", referral.id))?;
        }
        log::info!("[REFERRAL] referrer={} referred={} xp={}",
            short_id(&referrer.id), short_id(&user_id), config.referral_xp);
    }

    streak::refresh_streak_for(ctx, &user_id);

    log::info!("[CONNECT] new user={} name=\"{}\" starting_xp={} referral_code={}",
        short_id(&user_id), name, config.starting_xp, ambassador.referral_code);
    Ok(())
}

/// Clean up session when an ambassador disconnects
#[reducer(client_disconnected)]
pub fn on_disconnect(ctx: &ReducerContext) {
    if let Some(session) = ctx.db.session().connection_id().find(&ctx.sender) {
        let session_secs = ctx.timestamp.duration_since(session.connected_at)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if let Some(mut ambassador) = ctx.db.ambassador().id().find(&session.user_id) {
            ambassador.last_seen = ctx.timestamp;
            ctx.db.ambassador().id().update(ambassador);
        }
        log::info!("[DISCONNECT] user={} session_min={:.1}",
            short_id(&session.user_id), session_secs as f32 / 60.0);
        ctx.db.session().connection_id().delete(&ctx.sender);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id(""), "");
    }

    #[test]
    fn test_format_redemption_code() {
        assert_eq!(format_redemption_code("ABCD1234WXYZ"), "ABCD-1234-WXYZ");
        assert_eq!(format_redemption_code("ABCDEF"), "ABCD-EF");
        assert_eq!(format_redemption_code(""), "");
    }

    #[test]
    fn test_first_unused_code_skips_taken() {
        let mut drawn = vec!["AAAA", "BBBB", "CCCC"].into_iter();
        let code = first_unused_code(
            || drawn.next().unwrap_or("ZZZZ").to_string(),
            |code| code == "AAAA" || code == "BBBB",
        );
        assert_eq!(code.as_deref(), Some("CCCC"));
    }

    #[test]
    fn test_first_unused_code_gives_up() {
        let mut calls = 0;
        let code = first_unused_code(
            || {
                calls += 1;
                "SAME".to_string()
            },
            |_| true,
        );
        assert_eq!(code, None);
        assert_eq!(calls, CODE_GENERATION_ATTEMPTS);
    }

    #[test]
    fn test_clean_name() {
        assert_eq!(clean_name("  Priya  "), Ok("Priya".to_string()));
        assert!(clean_name("   ").is_err());
        assert!(clean_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }
}
