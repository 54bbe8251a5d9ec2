// Task assignments and proof submissions. Accepted assignments and every
// submission count as engagement; approved submissions pay out XP.

use spacetimedb::{reducer, table, Identity, ReducerContext, SpacetimeType, Table, Timestamp};

use crate::error::GameError;
use crate::ledger::{post_xp, XpPosting, XpTxType};
use crate::streak::refresh_streak_for;
use crate::{ambassador, current_user_id, referral, require_worker, short_id, ReferralStatus};

const MAX_PROOF_URL_LEN: usize = 2048;

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentStatus {
    Assigned,
    Accepted,
    Declined,
    Completed,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Assigned => "assigned",
            AssignmentStatus::Accepted => "accepted",
            AssignmentStatus::Declined => "declined",
            AssignmentStatus::Completed => "completed",
        }
    }

    /// Assignee responses only apply to fresh assignments
    pub fn can_respond(&self) -> bool {
        *self == AssignmentStatus::Assigned
    }
}

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    Pending,
    Approved,
    Rejected,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Approved => "approved",
            SubmissionStatus::Rejected => "rejected",
        }
    }

    /// A pending or approved submission blocks another one for the same assignment
    pub fn blocks_resubmission(&self) -> bool {
        matches!(self, SubmissionStatus::Pending | SubmissionStatus::Approved)
    }
}

/// A task handed to one ambassador
#[table(name = task_assignment, public)]
#[derive(Clone, Debug)]
pub struct TaskAssignment {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    /// Task in the campaign service
    pub task_id: u64,

    #[index(btree)]
    pub assignee_id: String,

    pub status: AssignmentStatus,

    /// XP paid when a submission for this assignment is approved
    pub xp_reward: i64,

    /// Submissions after this are refused
    pub deadline: Option<Timestamp>,

    pub assigned_at: Timestamp,
}

/// Proof of work for an accepted assignment
#[table(name = submission, public)]
#[derive(Clone, Debug)]
pub struct Submission {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub assignment_id: u64,

    #[index(btree)]
    pub user_id: String,

    pub proof_type: String,

    pub proof_url: String,

    pub proof_text: Option<String>,

    pub status: SubmissionStatus,

    /// 1 for the first submission, +1 for every resubmission after a rejection
    pub attempt: u32,

    pub submitted_at: Timestamp,

    pub reviewed_at: Option<Timestamp>,

    pub reviewed_by: Option<Identity>,

    pub review_comments: Option<String>,

    pub xp_awarded: i64,
}

/// Assignment owned by the caller
fn own_assignment(ctx: &ReducerContext, assignment_id: u64) -> Result<(String, TaskAssignment), GameError> {
    let user_id = current_user_id(ctx)?;
    let assignment = ctx.db.task_assignment()
        .id()
        .find(&assignment_id)
        .ok_or_else(|| GameError::not_found("assignment", assignment_id))?;
    if assignment.assignee_id != user_id {
        return Err(GameError::Unauthorized("assignment belongs to another ambassador"));
    }
    Ok((user_id, assignment))
}

// ==================== REDUCERS ====================

/// Hand a task to an ambassador (workers only)
#[reducer]
pub fn assign_task(
    ctx: &ReducerContext,
    assignee_id: String,
    task_id: u64,
    xp_reward: i64,
    deadline: Option<Timestamp>,
) -> Result<(), String> {
    require_worker(ctx)?;

    if xp_reward < 0 {
        return Err(GameError::NegativeAmount(xp_reward).into());
    }
    if ctx.db.ambassador().id().find(&assignee_id).is_none() {
        return Err(GameError::not_found("ambassador", &assignee_id).into());
    }
    let duplicate = ctx.db.task_assignment()
        .assignee_id()
        .filter(&assignee_id)
        .any(|a| a.task_id == task_id && a.status != AssignmentStatus::Declined);
    if duplicate {
        return Err(GameError::InvalidState(format!("task {} already assigned", task_id)).into());
    }

    let assignment = ctx.db.task_assignment().insert(TaskAssignment {
        id: 0, // auto_inc
        task_id,
        assignee_id: assignee_id.clone(),
        status: AssignmentStatus::Assigned,
        xp_reward,
        deadline,
        assigned_at: ctx.timestamp,
    });

    log::info!("[TASK] assigned id={} task={} user={} xp_reward={}",
        assignment.id, task_id, short_id(&assignee_id), xp_reward);
    Ok(())
}

/// Accept an assignment
#[reducer]
pub fn accept_task(ctx: &ReducerContext, assignment_id: u64) -> Result<(), String> {
    let (user_id, mut assignment) = own_assignment(ctx, assignment_id)?;
    if !assignment.status.can_respond() {
        return Err(GameError::InvalidState(format!(
            "assignment is {}", assignment.status.as_str()
        )).into());
    }

    assignment.status = AssignmentStatus::Accepted;
    ctx.db.task_assignment().id().update(assignment);
    let streak = refresh_streak_for(ctx, &user_id);

    log::info!("[TASK] accepted id={} user={} streak={}", assignment_id, short_id(&user_id), streak.current_streak);
    Ok(())
}

/// Decline an assignment
#[reducer]
pub fn decline_task(ctx: &ReducerContext, assignment_id: u64) -> Result<(), String> {
    let (user_id, mut assignment) = own_assignment(ctx, assignment_id)?;
    if !assignment.status.can_respond() {
        return Err(GameError::InvalidState(format!(
            "assignment is {}", assignment.status.as_str()
        )).into());
    }

    assignment.status = AssignmentStatus::Declined;
    ctx.db.task_assignment().id().update(assignment);

    log::info!("[TASK] declined id={} user={}", assignment_id, short_id(&user_id));
    Ok(())
}

/// Submit proof for an accepted assignment
#[reducer]
pub fn submit_task(
    ctx: &ReducerContext,
    assignment_id: u64,
    proof_type: String,
    proof_url: String,
    proof_text: Option<String>,
) -> Result<(), String> {
    let (user_id, assignment) = own_assignment(ctx, assignment_id)?;

    if assignment.status != AssignmentStatus::Accepted {
        return Err(GameError::InvalidState(format!(
            "assignment is {}, accept it first", assignment.status.as_str()
        )).into());
    }
    if let Some(deadline) = assignment.deadline {
        if ctx.timestamp > deadline {
            return Err(GameError::InvalidState("submission deadline has passed".to_string()).into());
        }
    }
    let proof_type = proof_type.trim().to_lowercase();
    if proof_type.is_empty() {
        return Err(GameError::InvalidInput("proof_type must not be empty".to_string()).into());
    }
    if proof_url.trim().is_empty() || proof_url.len() > MAX_PROOF_URL_LEN {
        return Err(GameError::InvalidInput("proof_url is missing or too long".to_string()).into());
    }

    let previous: Vec<Submission> = ctx.db.submission()
        .assignment_id()
        .filter(&assignment_id)
        .collect();
    if let Some(blocking) = previous.iter().find(|s| s.status.blocks_resubmission()) {
        return Err(GameError::InvalidState(format!(
            "submission {} is already {}", blocking.id, blocking.status.as_str()
        )).into());
    }

    let submission = ctx.db.submission().insert(Submission {
        id: 0, // auto_inc
        assignment_id,
        user_id: user_id.clone(),
        proof_type,
        proof_url: proof_url.trim().to_string(),
        proof_text,
        status: SubmissionStatus::Pending,
        attempt: previous.len() as u32 + 1,
        submitted_at: ctx.timestamp,
        reviewed_at: None,
        reviewed_by: None,
        review_comments: None,
        xp_awarded: 0,
    });
    let streak = refresh_streak_for(ctx, &user_id);

    log::info!("[TASK] submitted id={} assignment={} user={} attempt={} streak={}",
        submission.id, assignment_id, short_id(&user_id), submission.attempt, streak.current_streak);
    Ok(())
}

/// Approve or reject a pending submission (workers only).
/// Approval completes the assignment and pays its XP reward; rejection
/// leaves the assignment accepted so the ambassador can resubmit.
#[reducer]
pub fn review_submission(
    ctx: &ReducerContext,
    submission_id: u64,
    approve: bool,
    comments: Option<String>,
) -> Result<(), String> {
    require_worker(ctx)?;

    let mut submission = ctx.db.submission()
        .id()
        .find(&submission_id)
        .ok_or_else(|| GameError::not_found("submission", submission_id))?;
    if submission.status != SubmissionStatus::Pending {
        return Err(GameError::InvalidState(format!(
            "submission is {}", submission.status.as_str()
        )).into());
    }
    let mut assignment = ctx.db.task_assignment()
        .id()
        .find(&submission.assignment_id)
        .ok_or_else(|| GameError::not_found("assignment", submission.assignment_id))?;

    submission.reviewed_at = Some(ctx.timestamp);
    submission.reviewed_by = Some(ctx.sender);
    submission.review_comments = comments;

    if !approve {
        submission.status = SubmissionStatus::Rejected;
        ctx.db.submission().id().update(submission);
        log::info!("[TASK] rejected submission={} user={}", submission_id, short_id(&assignment.assignee_id));
        return Ok(());
    }

    submission.status = SubmissionStatus::Approved;
    submission.xp_awarded = assignment.xp_reward;
    let user_id = submission.user_id.clone();
    ctx.db.submission().id().update(submission);

    assignment.status = AssignmentStatus::Completed;
    let xp_reward = assignment.xp_reward;
    let task_id = assignment.task_id;
    ctx.db.task_assignment().id().update(assignment);

    if xp_reward > 0 {
        post_xp(ctx, XpPosting::credit(&user_id, XpTxType::TaskCompletion, xp_reward,
            format!("Task {} completed", task_id))
            .from_source("submission", submission_id))?;
    } else {
        refresh_streak_for(ctx, &user_id);
    }

    // First completed task converts the referral
    if let Some(mut referral) = ctx.db.referral().referred_id().find(&user_id) {
        if referral.status == ReferralStatus::Joined {
            referral.status = ReferralStatus::CompletedTask;
            ctx.db.referral().id().update(referral);
        }
    }

    log::info!("[TASK] approved submission={} task={} user={} xp={}",
        submission_id, task_id, short_id(&user_id), xp_reward);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_responses() {
        assert!(AssignmentStatus::Assigned.can_respond());
        assert!(!AssignmentStatus::Accepted.can_respond());
        assert!(!AssignmentStatus::Completed.can_respond());
        assert!(!AssignmentStatus::Declined.can_respond());
    }

    #[test]
    fn test_resubmission_rules() {
        assert!(SubmissionStatus::Pending.blocks_resubmission());
        assert!(SubmissionStatus::Approved.blocks_resubmission());
        assert!(!SubmissionStatus::Rejected.blocks_resubmission());
    }
}
