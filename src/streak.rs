// Database side of the engagement aggregator: reads the five engagement
// sources for a user and materialises their streak summary.

use spacetimedb::{reducer, table, ReducerContext, Table, Timestamp};

use crate::config::load_config;
use crate::engagement::{
    collect_engagement_dates, compute_streak, EngagementKind, EngagementStamp, EngagementStore,
};
use crate::error::GameError;
use crate::tasks::{submission, task_assignment, AssignmentStatus};
use crate::wheel::user_spin;
use crate::{current_user_id, get_ambassador, micros, short_id, today, xp_transaction};

/// Longest activity type label accepted by `log_activity`
const MAX_ACTIVITY_TYPE_LEN: usize = 32;

/// Explicit activity log, one per ambassador, activity type and day
#[table(name = streak_log, public)]
#[derive(Clone, Debug)]
pub struct StreakLog {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub user_id: String,

    pub activity_type: String,

    pub activity_date: Timestamp,

    /// Calendar day (YYYY-MM-DD) under the configured offset
    pub activity_day: String,

    /// XP recorded against the log. Informational, never credited.
    pub earned_xp: i64,
}

/// Materialised streak statistics, rewritten whenever engagement changes
#[table(name = streak_summary, public)]
#[derive(Clone, Debug, PartialEq)]
pub struct StreakSummaryRow {
    #[primary_key]
    pub user_id: String,

    pub current_streak: u32,

    pub longest_streak: u32,

    pub total_days: u32,

    /// YYYY-MM-DD, None without any engagement
    pub last_activity: Option<String>,

    /// Every engaged day, most recent first
    pub calendar_dates: Vec<String>,

    pub updated_at: Timestamp,
}

impl EngagementStore for ReducerContext {
    fn engagement_stamps(&self, user_id: &str) -> Vec<EngagementStamp> {
        let user_id = user_id.to_string();
        let mut stamps = Vec::new();

        stamps.extend(self.db.submission()
            .user_id()
            .filter(&user_id)
            .map(|s| EngagementStamp { kind: EngagementKind::Submission, at_micros: micros(s.submitted_at) }));

        stamps.extend(self.db.xp_transaction()
            .user_id()
            .filter(&user_id)
            .filter(|tx| tx.tx_type.counts_as_engagement())
            .map(|tx| EngagementStamp { kind: EngagementKind::XpTransaction, at_micros: micros(tx.created_at) }));

        stamps.extend(self.db.task_assignment()
            .assignee_id()
            .filter(&user_id)
            .filter(|a| matches!(a.status, AssignmentStatus::Accepted | AssignmentStatus::Completed))
            .map(|a| EngagementStamp { kind: EngagementKind::TaskAssignment, at_micros: micros(a.assigned_at) }));

        stamps.extend(self.db.user_spin()
            .user_id()
            .filter(&user_id)
            .map(|s| EngagementStamp { kind: EngagementKind::Spin, at_micros: micros(s.spun_at) }));

        stamps.extend(self.db.streak_log()
            .user_id()
            .filter(&user_id)
            .map(|l| EngagementStamp { kind: EngagementKind::StreakLog, at_micros: micros(l.activity_date) }));

        stamps
    }
}

/// Recompute and store the streak summary for one ambassador
pub fn refresh_streak_for(ctx: &ReducerContext, user_id: &str) -> StreakSummaryRow {
    let offset = load_config(ctx).day_offset_minutes;
    let dates = collect_engagement_dates(ctx, user_id, offset);
    let summary = compute_streak(&dates, today(ctx));

    let row = StreakSummaryRow {
        user_id: user_id.to_string(),
        current_streak: summary.current_streak,
        longest_streak: summary.longest_streak,
        total_days: summary.total_days,
        last_activity: summary.last_activity.map(|d| d.to_string()),
        calendar_dates: dates.to_calendar_strings(),
        updated_at: ctx.timestamp,
    };

    if ctx.db.streak_summary().user_id().find(&row.user_id).is_some() {
        ctx.db.streak_summary().user_id().update(row.clone());
    } else {
        ctx.db.streak_summary().insert(row.clone());
    }

    log::debug!("[STREAK] user={} current={} longest={} total_days={}",
        short_id(user_id), row.current_streak, row.longest_streak, row.total_days);
    row
}

// ==================== REDUCERS ====================

/// Recompute the caller's streak summary
#[reducer]
pub fn refresh_streak(ctx: &ReducerContext) -> Result<(), String> {
    let user_id = current_user_id(ctx)?;
    let row = refresh_streak_for(ctx, &user_id);
    log::info!("[STREAK] refreshed user={} current={} longest={} total_days={} last={}",
        short_id(&user_id), row.current_streak, row.longest_streak, row.total_days,
        row.last_activity.as_deref().unwrap_or("none"));
    Ok(())
}

/// Record an explicit activity for today. A second log of the same
/// activity type on the same day is a no-op.
#[reducer]
pub fn log_activity(ctx: &ReducerContext, activity_type: String) -> Result<(), String> {
    let user_id = get_ambassador(ctx)?.id;
    let activity_type = activity_type.trim().to_lowercase();
    if activity_type.is_empty() || activity_type.len() > MAX_ACTIVITY_TYPE_LEN {
        return Err(GameError::InvalidInput(format!(
            "activity_type must be 1-{} characters", MAX_ACTIVITY_TYPE_LEN
        )).into());
    }

    let day = today(ctx).to_string();
    let already_logged = ctx.db.streak_log()
        .user_id()
        .filter(&user_id)
        .any(|l| l.activity_type == activity_type && l.activity_day == day);
    if already_logged {
        log::debug!("[STREAK] duplicate log user={} type={} day={}", short_id(&user_id), activity_type, day);
        return Ok(());
    }

    let earned_xp = load_config(ctx).streak_log_xp;
    ctx.db.streak_log().insert(StreakLog {
        id: 0, // auto_inc
        user_id: user_id.clone(),
        activity_type: activity_type.clone(),
        activity_date: ctx.timestamp,
        activity_day: day.clone(),
        earned_xp,
    });

    let row = refresh_streak_for(ctx, &user_id);
    log::info!("[STREAK] logged user={} type={} day={} earned_xp={} current={}",
        short_id(&user_id), activity_type, day, earned_xp, row.current_streak);
    Ok(())
}
