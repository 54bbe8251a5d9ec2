// Runtime tunables: compile-time defaults persisted in a singleton row so
// operators can adjust them without republishing the module.

use spacetimedb::{reducer, table, ReducerContext, Table};

use crate::error::GameError;
use crate::require_worker;

/// XP granted to a brand new ambassador
pub const DEFAULT_STARTING_XP: i64 = 100;

/// XP granted to the referrer when a referred ambassador joins
pub const DEFAULT_REFERRAL_XP: i64 = 500;

/// XP recorded on an explicit activity log (informational only)
pub const DEFAULT_STREAK_LOG_XP: i64 = 10;

/// Calendar days start at UTC midnight unless configured otherwise
pub const DEFAULT_DAY_OFFSET_MINUTES: i32 = 0;

/// Rows kept in the leaderboard
pub const DEFAULT_LEADERBOARD_SIZE: u32 = 100;

/// Scheduled leaderboard refresh interval
pub const DEFAULT_LEADERBOARD_REFRESH_SECS: u64 = 60;

const CONFIG_ROW_ID: u32 = 0;

/// Largest offset a real timezone uses (UTC+14:00)
const MAX_DAY_OFFSET_MINUTES: i32 = 14 * 60;

/// Singleton gamification settings
#[table(name = gamification_config, public)]
#[derive(Clone, Debug, PartialEq)]
pub struct GamificationConfig {
    #[primary_key]
    pub id: u32,

    pub starting_xp: i64,

    pub referral_xp: i64,

    pub streak_log_xp: i64,

    /// Minutes east of UTC at which a calendar day begins
    pub day_offset_minutes: i32,

    pub leaderboard_size: u32,

    pub leaderboard_refresh_secs: u64,
}

impl Default for GamificationConfig {
    fn default() -> Self {
        Self {
            id: CONFIG_ROW_ID,
            starting_xp: DEFAULT_STARTING_XP,
            referral_xp: DEFAULT_REFERRAL_XP,
            streak_log_xp: DEFAULT_STREAK_LOG_XP,
            day_offset_minutes: DEFAULT_DAY_OFFSET_MINUTES,
            leaderboard_size: DEFAULT_LEADERBOARD_SIZE,
            leaderboard_refresh_secs: DEFAULT_LEADERBOARD_REFRESH_SECS,
        }
    }
}

impl GamificationConfig {
    pub fn validate(&self) -> Result<(), GameError> {
        if self.starting_xp < 0 || self.referral_xp < 0 || self.streak_log_xp < 0 {
            return Err(GameError::InvalidInput("XP settings must not be negative".to_string()));
        }
        if self.day_offset_minutes.abs() > MAX_DAY_OFFSET_MINUTES {
            return Err(GameError::InvalidInput(format!(
                "day_offset_minutes {} outside ±{}",
                self.day_offset_minutes, MAX_DAY_OFFSET_MINUTES
            )));
        }
        if self.leaderboard_size == 0 {
            return Err(GameError::InvalidInput("leaderboard_size must be positive".to_string()));
        }
        if self.leaderboard_refresh_secs == 0 {
            return Err(GameError::InvalidInput("leaderboard_refresh_secs must be positive".to_string()));
        }
        Ok(())
    }
}

/// Current settings, falling back to defaults before `init` has run
pub fn load_config(ctx: &ReducerContext) -> GamificationConfig {
    ctx.db
        .gamification_config()
        .id()
        .find(&CONFIG_ROW_ID)
        .unwrap_or_default()
}

/// Write the default row if none exists (called from `init`)
pub fn ensure_config(ctx: &ReducerContext) {
    if ctx.db.gamification_config().id().find(&CONFIG_ROW_ID).is_none() {
        ctx.db.gamification_config().insert(GamificationConfig::default());
        log::info!("[CONFIG] defaults written");
    }
}

/// Replace the gamification settings (workers only)
#[reducer]
pub fn set_config(
    ctx: &ReducerContext,
    starting_xp: i64,
    referral_xp: i64,
    streak_log_xp: i64,
    day_offset_minutes: i32,
    leaderboard_size: u32,
    leaderboard_refresh_secs: u64,
) -> Result<(), String> {
    require_worker(ctx)?;

    let config = GamificationConfig {
        id: CONFIG_ROW_ID,
        starting_xp,
        referral_xp,
        streak_log_xp,
        day_offset_minutes,
        leaderboard_size,
        leaderboard_refresh_secs,
    };
    config.validate()?;

    let refresh_changed = load_config(ctx).leaderboard_refresh_secs != leaderboard_refresh_secs;

    if ctx.db.gamification_config().id().find(&CONFIG_ROW_ID).is_some() {
        ctx.db.gamification_config().id().update(config.clone());
    } else {
        ctx.db.gamification_config().insert(config.clone());
    }

    if refresh_changed {
        crate::leaderboard::reschedule_refresh(ctx, leaderboard_refresh_secs);
    }

    log::info!(
        "[CONFIG] updated starting_xp={} referral_xp={} streak_log_xp={} day_offset_min={} leaderboard_size={} refresh_secs={}",
        config.starting_xp, config.referral_xp, config.streak_log_xp,
        config.day_offset_minutes, config.leaderboard_size, config.leaderboard_refresh_secs
    );
    Ok(())
}
