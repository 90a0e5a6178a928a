use crate::model::{CampaignCommand, CampaignEvent};
use research_types::{CampaignPlan, CampaignStatus, PhaseResult};

/// Pure `(state, event) -> (next_state, commands)` transition for a
/// campaign's phase machine. The executor performs every command; this
/// function never touches the Queue, the clock, or the filesystem.
pub struct CampaignReducer;

impl CampaignReducer {
    pub fn reduce(state: &CampaignPlan, event: CampaignEvent) -> (CampaignPlan, Vec<CampaignCommand>) {
        let mut next = state.clone();
        let mut commands = Vec::new();

        match event {
            CampaignEvent::PhaseJobSubmitted { .. } => {
                if next.status == CampaignStatus::Planned {
                    next.status = CampaignStatus::Running;
                }
            }

            CampaignEvent::PhaseCompleted { phase_index, job_id, artifact_id } => {
                next.phase_results.push(PhaseResult { phase_index, artifact_id, job_id });
                let phase_requires_review =
                    next.phases.get(phase_index).map(|p| p.review_required).unwrap_or(false);

                if phase_requires_review {
                    next.status = CampaignStatus::AwaitingReview;
                    next.paused_reason = Some(format!("phase {phase_index} awaiting review"));
                } else if next.status == CampaignStatus::Paused {
                    // An operator paused the campaign while this phase's job
                    // was still in flight. Record the completed phase and
                    // advance the index, but stay Paused: do not resubmit
                    // the next phase until an explicit ResumeRequested.
                    advance_index_while_paused(&mut next, phase_index, &mut commands);
                } else {
                    advance_past(&mut next, phase_index, &mut commands);
                }
            }

            CampaignEvent::PhaseFailed { phase_index, reason } => {
                next.status = CampaignStatus::Failed;
                next.failure_reason = Some(format!("phase {phase_index} failed: {reason}"));
                commands.push(CampaignCommand::CampaignFinished);
            }

            CampaignEvent::ReviewApproved { phase_index } => {
                if next.status == CampaignStatus::AwaitingReview && next.current_phase_index == phase_index
                {
                    next.paused_reason = None;
                    advance_past(&mut next, phase_index, &mut commands);
                }
            }

            CampaignEvent::ReviewRejected { phase_index, reason } => {
                if next.status == CampaignStatus::AwaitingReview && next.current_phase_index == phase_index
                {
                    next.status = CampaignStatus::Failed;
                    next.failure_reason = Some(format!("phase {phase_index} review rejected: {reason}"));
                    commands.push(CampaignCommand::CampaignFinished);
                }
            }

            CampaignEvent::PauseRequested { reason } => {
                if !matches!(next.status, CampaignStatus::Completed | CampaignStatus::Failed) {
                    next.status = CampaignStatus::Paused;
                    next.paused_reason = Some(reason);
                }
            }

            CampaignEvent::ResumeRequested => {
                if next.status == CampaignStatus::Paused {
                    next.status = CampaignStatus::Running;
                    next.paused_reason = None;
                    commands.push(CampaignCommand::SubmitNextPhase { phase_index: next.current_phase_index });
                }
            }
        }

        (next, commands)
    }
}

/// Moves `current_phase_index` past the phase that just finished, completing
/// the campaign if that was the last one.
fn advance_past(plan: &mut CampaignPlan, phase_index: usize, commands: &mut Vec<CampaignCommand>) {
    plan.current_phase_index = phase_index + 1;
    if plan.current_phase_index >= plan.phases.len() {
        plan.status = CampaignStatus::Completed;
        commands.push(CampaignCommand::CampaignFinished);
    } else {
        plan.status = CampaignStatus::Running;
        commands.push(CampaignCommand::SubmitNextPhase { phase_index: plan.current_phase_index });
    }
}

/// Same bookkeeping as `advance_past`, but for a campaign that was paused
/// mid-phase: the index still advances (the phase did complete) and a final
/// phase still finishes the campaign outright, but an intermediate phase
/// leaves the campaign Paused rather than resubmitting the next one.
fn advance_index_while_paused(plan: &mut CampaignPlan, phase_index: usize, commands: &mut Vec<CampaignCommand>) {
    plan.current_phase_index = phase_index + 1;
    if plan.current_phase_index >= plan.phases.len() {
        plan.status = CampaignStatus::Completed;
        commands.push(CampaignCommand::CampaignFinished);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_types::PhaseSpec;
    use uuid::Uuid;

    fn two_phase_plan() -> CampaignPlan {
        CampaignPlan::new(
            "market sizing".to_string(),
            vec![
                PhaseSpec {
                    title: "Discovery".to_string(),
                    prompt_template: "Survey the landscape for {scenario}".to_string(),
                    depends_on_context_from_prior_phases: false,
                    review_required: false,
                },
                PhaseSpec {
                    title: "Synthesis".to_string(),
                    prompt_template: "Synthesize findings for {scenario}".to_string(),
                    depends_on_context_from_prior_phases: true,
                    review_required: true,
                },
            ],
        )
    }

    #[test]
    fn completing_a_non_review_phase_advances_and_submits_the_next_one() {
        let plan = two_phase_plan();
        let (next, commands) = CampaignReducer::reduce(
            &plan,
            CampaignEvent::PhaseCompleted { phase_index: 0, job_id: Uuid::new_v4(), artifact_id: Uuid::new_v4() },
        );
        assert_eq!(next.current_phase_index, 1);
        assert_eq!(next.status, CampaignStatus::Running);
        assert!(commands
            .iter()
            .any(|c| matches!(c, CampaignCommand::SubmitNextPhase { phase_index: 1 })));
    }

    #[test]
    fn completing_a_review_phase_pauses_for_review_instead_of_advancing() {
        let mut plan = two_phase_plan();
        plan.current_phase_index = 1;
        let (next, commands) = CampaignReducer::reduce(
            &plan,
            CampaignEvent::PhaseCompleted { phase_index: 1, job_id: Uuid::new_v4(), artifact_id: Uuid::new_v4() },
        );
        assert_eq!(next.status, CampaignStatus::AwaitingReview);
        assert_eq!(next.current_phase_index, 1);
        assert!(commands.is_empty());
    }

    #[test]
    fn approving_the_last_phases_review_completes_the_campaign() {
        let mut plan = two_phase_plan();
        plan.current_phase_index = 1;
        plan.status = CampaignStatus::AwaitingReview;
        let (next, commands) = CampaignReducer::reduce(&plan, CampaignEvent::ReviewApproved { phase_index: 1 });
        assert_eq!(next.status, CampaignStatus::Completed);
        assert!(commands.contains(&CampaignCommand::CampaignFinished));
    }

    #[test]
    fn a_phase_completing_while_paused_advances_the_index_but_stays_paused() {
        let mut plan = two_phase_plan();
        plan.status = CampaignStatus::Paused;
        plan.paused_reason = Some("operator requested".into());
        plan.current_phase_index = 0;

        let (next, commands) = CampaignReducer::reduce(
            &plan,
            CampaignEvent::PhaseCompleted { phase_index: 0, job_id: Uuid::new_v4(), artifact_id: Uuid::new_v4() },
        );
        assert_eq!(next.status, CampaignStatus::Paused);
        assert_eq!(next.current_phase_index, 1);
        assert!(commands.is_empty());

        let (resumed, commands) = CampaignReducer::reduce(&next, CampaignEvent::ResumeRequested);
        assert_eq!(resumed.status, CampaignStatus::Running);
        assert!(commands
            .iter()
            .any(|c| matches!(c, CampaignCommand::SubmitNextPhase { phase_index: 1 })));
    }

    #[test]
    fn pause_then_resume_resubmits_the_current_phase() {
        let mut plan = two_phase_plan();
        plan.status = CampaignStatus::Running;
        plan.current_phase_index = 0;
        let (paused, _) = CampaignReducer::reduce(&plan, CampaignEvent::PauseRequested { reason: "operator requested".into() });
        assert_eq!(paused.status, CampaignStatus::Paused);

        let (resumed, commands) = CampaignReducer::reduce(&paused, CampaignEvent::ResumeRequested);
        assert_eq!(resumed.status, CampaignStatus::Running);
        assert!(commands
            .iter()
            .any(|c| matches!(c, CampaignCommand::SubmitNextPhase { phase_index: 0 })));
    }
}
