// XP leaderboard, rebuilt on a schedule and on demand.

use std::time::Duration;

use spacetimedb::{reducer, table, ReducerContext, ScheduleAt, Table};

use crate::config::load_config;
use crate::{ambassador, require_worker};
use crate::levels::{level, level_progress};
use crate::streak::streak_summary;

#[table(name = leaderboard_entry, public)]
pub struct LeaderboardEntry {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    /// 1-based; tied XP shares a position and the next one skips ahead
    pub position: u32,

    pub user_id: String,

    /// Denormalized for display
    pub name: String,

    pub xp: i64,

    pub level_rank: u32,

    pub current_streak: u32,
}

/// Drives the periodic `refresh_leaderboard`
#[table(name = leaderboard_schedule, scheduled(refresh_leaderboard))]
pub struct LeaderboardSchedule {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    pub scheduled_at: ScheduleAt,
}

/// Input to the ranking
#[derive(Debug, Clone, PartialEq)]
pub struct Standing {
    pub user_id: String,
    pub name: String,
    pub xp: i64,
}

/// Sort by XP (highest first, id breaks ties for a stable order) and
/// assign tie-aware positions: 100, 100, 90 ranks as 1, 1, 3.
pub fn rank_by_xp(mut standings: Vec<Standing>) -> Vec<(u32, Standing)> {
    standings.sort_by(|a, b| b.xp.cmp(&a.xp).then_with(|| a.user_id.cmp(&b.user_id)));

    let mut ranked = Vec::with_capacity(standings.len());
    let mut position = 1u32;
    let mut prev_xp = None;
    for (i, standing) in standings.into_iter().enumerate() {
        if prev_xp.is_some_and(|xp| xp != standing.xp) {
            position = (i + 1) as u32;
        }
        prev_xp = Some(standing.xp);
        ranked.push((position, standing));
    }
    ranked
}

fn rebuild(ctx: &ReducerContext) -> usize {
    let ids: Vec<u64> = ctx.db.leaderboard_entry().iter().map(|e| e.id).collect();
    for id in ids {
        ctx.db.leaderboard_entry().id().delete(&id);
    }

    let size = load_config(ctx).leaderboard_size as usize;
    let levels: Vec<_> = ctx.db.level().iter().collect();
    let standings = ctx.db.ambassador()
        .iter()
        .map(|a| Standing { user_id: a.id, name: a.name, xp: a.xp })
        .collect();

    let ranked = rank_by_xp(standings);
    let total = ranked.len();
    for (position, standing) in ranked.into_iter().take(size) {
        let level_rank = level_progress(&levels, standing.xp).rank();
        let current_streak = ctx.db.streak_summary()
            .user_id()
            .find(&standing.user_id)
            .map(|s| s.current_streak)
            .unwrap_or(0);
        ctx.db.leaderboard_entry().insert(LeaderboardEntry {
            id: 0, // auto_inc
            position,
            user_id: standing.user_id,
            name: standing.name,
            xp: standing.xp,
            level_rank,
            current_streak,
        });
    }
    total
}

/// Insert the refresh schedule if none exists (init and hot reload)
pub fn ensure_refresh_schedule(ctx: &ReducerContext, interval_secs: u64) {
    if ctx.db.leaderboard_schedule().iter().count() == 0 {
        ctx.db.leaderboard_schedule().insert(LeaderboardSchedule {
            id: 0, // auto_inc
            scheduled_at: ScheduleAt::Interval(Duration::from_secs(interval_secs).into()),
        });
    }
}

/// Replace the refresh schedule with a new interval
pub fn reschedule_refresh(ctx: &ReducerContext, interval_secs: u64) {
    let ids: Vec<u64> = ctx.db.leaderboard_schedule().iter().map(|s| s.id).collect();
    for id in ids {
        ctx.db.leaderboard_schedule().id().delete(&id);
    }
    ensure_refresh_schedule(ctx, interval_secs);
    log::info!("[LEADERBOARD] refresh interval set to {}s", interval_secs);
}

/// Periodic rebuild. Only the scheduler may call this.
#[reducer]
pub fn refresh_leaderboard(ctx: &ReducerContext, _schedule: LeaderboardSchedule) {
    if ctx.sender != ctx.identity() {
        log::warn!("Client {} attempted to call refresh_leaderboard", ctx.sender);
        return;
    }
    let total = rebuild(ctx);
    log::debug!("[LEADERBOARD] scheduled refresh ambassadors={}", total);
}

/// Rebuild now (workers only)
#[reducer]
pub fn rebuild_leaderboard(ctx: &ReducerContext) -> Result<(), String> {
    require_worker(ctx)?;
    let total = rebuild(ctx);
    log::info!("[LEADERBOARD] rebuilt on demand ambassadors={}", total);
    Ok(())
}
