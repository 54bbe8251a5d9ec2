// Levels are XP thresholds ordered by rank. An ambassador's level is the
// highest-ranked one whose threshold their balance reaches.

use spacetimedb::{reducer, table, ReducerContext, Table, Timestamp};

use crate::error::GameError;
use crate::{ambassador, require_worker};

/// Rank used for gating when no level has been reached yet
pub const BASE_RANK: u32 = 1;

#[table(name = level, public)]
#[derive(Clone, Debug, PartialEq)]
pub struct Level {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[unique]
    pub name: String,

    #[unique]
    pub rank_order: u32,

    /// XP needed to reach this level
    pub min_xp: i64,

    pub description: Option<String>,
}

/// Where an ambassador stands relative to the level ladder
#[table(name = level_progress, public)]
#[derive(Clone, Debug, PartialEq)]
pub struct LevelProgress {
    #[primary_key]
    pub user_id: String,

    pub current_level_id: Option<u64>,

    pub current_rank: u32,

    pub next_level_id: Option<u64>,

    /// Progress from the current threshold to the next, 0-100
    pub percentage: u32,

    pub current_xp: i64,

    /// XP still needed for the next level (0 at the top)
    pub xp_to_next: i64,

    pub updated_at: Timestamp,
}

/// Computed progress, before it is stamped into a row
#[derive(Debug, Clone, PartialEq)]
pub struct Progress<'a> {
    pub current: Option<&'a Level>,
    pub next: Option<&'a Level>,
    pub percentage: u32,
    pub xp_to_next: i64,
}

impl Progress<'_> {
    pub fn rank(&self) -> u32 {
        self.current.map(|l| l.rank_order).unwrap_or(BASE_RANK)
    }
}

fn by_rank(levels: &[Level]) -> Vec<&Level> {
    let mut sorted: Vec<&Level> = levels.iter().collect();
    sorted.sort_by_key(|l| l.rank_order);
    sorted
}

/// Highest-ranked level with `min_xp <= xp`
pub fn resolve_level(levels: &[Level], xp: i64) -> Option<&Level> {
    by_rank(levels)
        .into_iter()
        .filter(|l| l.min_xp <= xp)
        .last()
}

pub fn level_progress(levels: &[Level], xp: i64) -> Progress<'_> {
    let sorted = by_rank(levels);
    let current = sorted.iter().copied().filter(|l| l.min_xp <= xp).last();
    let next = match current {
        Some(cur) => sorted.iter().copied().find(|l| l.rank_order > cur.rank_order),
        None => sorted.first().copied(),
    };

    let floor = current.map(|l| l.min_xp).unwrap_or(0);
    let (percentage, xp_to_next) = match next {
        Some(next) => {
            // i128 so large balances cannot overflow the multiply
            let span = next.min_xp as i128 - floor as i128;
            let pct = if span > 0 {
                ((xp as i128 - floor as i128).max(0) * 100 / span).clamp(0, 100) as u32
            } else {
                0
            };
            (pct, next.min_xp.saturating_sub(xp).max(0))
        }
        None => (0, 0),
    };

    Progress { current, next, percentage, xp_to_next }
}

/// Rewrite the ambassador's progress row for a new balance.
/// Returns the level id the balance resolves to.
pub fn refresh_level_progress(ctx: &ReducerContext, user_id: &str, xp: i64) -> Option<u64> {
    let levels: Vec<Level> = ctx.db.level().iter().collect();
    let progress = level_progress(&levels, xp);

    let row = LevelProgress {
        user_id: user_id.to_string(),
        current_level_id: progress.current.map(|l| l.id),
        current_rank: progress.rank(),
        next_level_id: progress.next.map(|l| l.id),
        percentage: progress.percentage,
        current_xp: xp,
        xp_to_next: progress.xp_to_next,
        updated_at: ctx.timestamp,
    };

    let previous = ctx.db.level_progress().user_id().find(&row.user_id);
    let level_id = row.current_level_id;
    match previous {
        Some(prev) => {
            if prev.current_level_id != level_id {
                log::info!("[LEVEL] user={} rank {} -> {}",
                    crate::short_id(user_id), prev.current_rank, row.current_rank);
            }
            ctx.db.level_progress().user_id().update(row);
        }
        None => {
            ctx.db.level_progress().insert(row);
        }
    }
    level_id
}

/// Rank the ambassador currently holds, for level-gated features
pub fn current_rank(ctx: &ReducerContext, user_id: &str) -> u32 {
    ctx.db.level_progress()
        .user_id()
        .find(&user_id.to_string())
        .map(|p| p.current_rank)
        .unwrap_or(BASE_RANK)
}

/// Add a level to the ladder (workers only)
#[reducer]
pub fn create_level(
    ctx: &ReducerContext,
    name: String,
    rank_order: u32,
    min_xp: i64,
    description: Option<String>,
) -> Result<(), String> {
    require_worker(ctx)?;

    if name.trim().is_empty() {
        return Err(GameError::InvalidInput("level name must not be empty".to_string()).into());
    }
    if min_xp < 0 {
        return Err(GameError::InvalidInput("min_xp must not be negative".to_string()).into());
    }
    if ctx.db.level().rank_order().find(&rank_order).is_some() {
        return Err(GameError::InvalidInput(format!("rank {} already exists", rank_order)).into());
    }

    // Thresholds must rise with rank
    for other in ctx.db.level().iter() {
        let out_of_order = (other.rank_order < rank_order && other.min_xp >= min_xp)
            || (other.rank_order > rank_order && other.min_xp <= min_xp);
        if out_of_order {
            return Err(GameError::InvalidInput(format!(
                "min_xp {} conflicts with level {} (rank {}, min_xp {})",
                min_xp, other.name, other.rank_order, other.min_xp
            )).into());
        }
    }

    let level = ctx.db.level().insert(Level {
        id: 0, // auto_inc
        name: name.trim().to_string(),
        rank_order,
        min_xp,
        description,
    });

    // Existing balances may now land on a different level
    let ambassadors: Vec<_> = ctx.db.ambassador().iter().collect();
    for mut ambassador in ambassadors {
        let level_id = refresh_level_progress(ctx, &ambassador.id, ambassador.xp);
        if ambassador.level_id != level_id {
            ambassador.level_id = level_id;
            ctx.db.ambassador().id().update(ambassador);
        }
    }

    log::info!("[LEVEL] created id={} name=\"{}\" rank={} min_xp={}", level.id, level.name, rank_order, min_xp);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(id: u64, rank_order: u32, min_xp: i64) -> Level {
        Level {
            id,
            name: format!("L{}", rank_order),
            rank_order,
            min_xp,
            description: None,
        }
    }

    fn ladder() -> Vec<Level> {
        // Deliberately out of order
        vec![level(3, 3, 1500), level(1, 1, 0), level(2, 2, 500), level(4, 4, 5000)]
    }

    #[test]
    fn test_resolve_level() {
        let levels = ladder();
        assert_eq!(resolve_level(&levels, 0).map(|l| l.id), Some(1));
        assert_eq!(resolve_level(&levels, 499).map(|l| l.id), Some(1));
        assert_eq!(resolve_level(&levels, 500).map(|l| l.id), Some(2));
        assert_eq!(resolve_level(&levels, 99_999).map(|l| l.id), Some(4));
        assert_eq!(resolve_level(&[], 100), None);
    }

    #[test]
    fn test_progress_midway() {
        let levels = ladder();
        let progress = level_progress(&levels, 1000);
        assert_eq!(progress.current.map(|l| l.id), Some(2));
        assert_eq!(progress.next.map(|l| l.id), Some(3));
        assert_eq!(progress.percentage, 50);
        assert_eq!(progress.xp_to_next, 500);
        assert_eq!(progress.rank(), 2);
    }

    #[test]
    fn test_progress_at_top() {
        let levels = ladder();
        let progress = level_progress(&levels, 6000);
        assert_eq!(progress.current.map(|l| l.id), Some(4));
        assert!(progress.next.is_none());
        assert_eq!(progress.percentage, 0);
        assert_eq!(progress.xp_to_next, 0);
    }

    #[test]
    fn test_progress_below_first_threshold() {
        let levels = vec![level(1, 1, 100), level(2, 2, 300)];
        let progress = level_progress(&levels, 50);
        assert!(progress.current.is_none());
        assert_eq!(progress.rank(), BASE_RANK);
        assert_eq!(progress.next.map(|l| l.id), Some(1));
        assert_eq!(progress.percentage, 50);
        assert_eq!(progress.xp_to_next, 50);
    }

    #[test]
    fn test_progress_near_xp_limit() {
        let levels = vec![level(1, 1, 0), level(2, 2, i64::MAX)];
        let progress = level_progress(&levels, i64::MAX / 50);
        assert_eq!(progress.current.map(|l| l.id), Some(1));
        assert_eq!(progress.percentage, 1);
        assert_eq!(progress.xp_to_next, i64::MAX - i64::MAX / 50);

        let progress = level_progress(&levels, i64::MAX - 1);
        assert_eq!(progress.percentage, 99);

        let progress = level_progress(&levels, i64::MAX);
        assert_eq!(progress.rank(), 2);
        assert_eq!(progress.percentage, 0);
    }
}
