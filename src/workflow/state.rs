//! Assessment lifecycle states and the static transition table.
//!
//! Every transition is validated against the table; anything else is a
//! programmer error surfaced as [`StateError`](crate::error::StateError).

use serde::{Deserialize, Serialize};

/// Lifecycle state of an assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentState {
    Draft,
    Preprocessing,
    Stage1Running,
    Stage1Complete,
    Stage2Running,
    Stage2Complete,
    Stage3Running,
    Stage3Complete,
    SynthesisReviewPending,
    SynthesisReviewInProgress,
    SynthesisApproved,
    SynthesisRevisionRequested,
    SynthesisRejected,
    ExtractingData,
    GeneratingReport,
    ReportReviewPending,
    ReportReviewInProgress,
    ReportApproved,
    ReportEditRequested,
    ReportRegenerationRequested,
    ReportRejected,
    UpdatingKnowledge,
    Completed,
    Failed,
    Cancelled,
}

impl AssessmentState {
    /// Legal successor states.
    pub fn successors(&self) -> &'static [AssessmentState] {
        use AssessmentState::*;
        match self {
            Draft => &[Preprocessing, Cancelled],
            Preprocessing => &[Stage1Running, SynthesisReviewPending, Failed, Cancelled],
            Stage1Running => &[Stage1Complete, Failed, Cancelled],
            Stage1Complete => &[Stage2Running, Stage3Running, Failed, Cancelled],
            Stage2Running => &[Stage2Complete, Failed, Cancelled],
            Stage2Complete => &[Stage3Running, Failed, Cancelled],
            Stage3Running => &[Stage3Complete, Failed, Cancelled],
            Stage3Complete => &[SynthesisReviewPending, Failed, Cancelled],
            SynthesisReviewPending => &[SynthesisReviewInProgress, Cancelled],
            SynthesisReviewInProgress => &[
                SynthesisApproved,
                SynthesisRevisionRequested,
                SynthesisRejected,
                Cancelled,
            ],
            SynthesisApproved => &[ExtractingData, Failed, Cancelled],
            SynthesisRevisionRequested => &[Stage3Running, Failed, Cancelled],
            SynthesisRejected => &[],
            ExtractingData => &[GeneratingReport, Failed, Cancelled],
            GeneratingReport => &[ReportReviewPending, Failed, Cancelled],
            ReportReviewPending => &[ReportReviewInProgress, Cancelled],
            ReportReviewInProgress => &[
                ReportApproved,
                ReportEditRequested,
                ReportRegenerationRequested,
                ReportRejected,
                Cancelled,
            ],
            ReportApproved => &[UpdatingKnowledge, Failed, Cancelled],
            ReportEditRequested => &[ReportReviewPending, GeneratingReport, Failed, Cancelled],
            ReportRegenerationRequested => &[GeneratingReport, Failed, Cancelled],
            ReportRejected => &[],
            UpdatingKnowledge => &[Completed, Failed, Cancelled],
            Completed => &[],
            Failed => &[],
            Cancelled => &[],
        }
    }

    /// Whether `next` is a legal successor.
    pub fn can_transition_to(&self, next: AssessmentState) -> bool {
        self.successors().contains(&next)
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        self.successors().is_empty()
    }

    /// States where the workflow is parked waiting for a human decision.
    pub fn is_review_wait(&self) -> bool {
        matches!(
            self,
            AssessmentState::SynthesisReviewPending | AssessmentState::ReportReviewPending
        )
    }
}

impl std::fmt::Display for AssessmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AssessmentState::Draft => "draft",
            AssessmentState::Preprocessing => "preprocessing",
            AssessmentState::Stage1Running => "stage1_running",
            AssessmentState::Stage1Complete => "stage1_complete",
            AssessmentState::Stage2Running => "stage2_running",
            AssessmentState::Stage2Complete => "stage2_complete",
            AssessmentState::Stage3Running => "stage3_running",
            AssessmentState::Stage3Complete => "stage3_complete",
            AssessmentState::SynthesisReviewPending => "synthesis_review_pending",
            AssessmentState::SynthesisReviewInProgress => "synthesis_review_in_progress",
            AssessmentState::SynthesisApproved => "synthesis_approved",
            AssessmentState::SynthesisRevisionRequested => "synthesis_revision_requested",
            AssessmentState::SynthesisRejected => "synthesis_rejected",
            AssessmentState::ExtractingData => "extracting_data",
            AssessmentState::GeneratingReport => "generating_report",
            AssessmentState::ReportReviewPending => "report_review_pending",
            AssessmentState::ReportReviewInProgress => "report_review_in_progress",
            AssessmentState::ReportApproved => "report_approved",
            AssessmentState::ReportEditRequested => "report_edit_requested",
            AssessmentState::ReportRegenerationRequested => "report_regeneration_requested",
            AssessmentState::ReportRejected => "report_rejected",
            AssessmentState::UpdatingKnowledge => "updating_knowledge",
            AssessmentState::Completed => "completed",
            AssessmentState::Failed => "failed",
            AssessmentState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for AssessmentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use AssessmentState::*;
        match s {
            "draft" => Ok(Draft),
            "preprocessing" => Ok(Preprocessing),
            "stage1_running" => Ok(Stage1Running),
            "stage1_complete" => Ok(Stage1Complete),
            "stage2_running" => Ok(Stage2Running),
            "stage2_complete" => Ok(Stage2Complete),
            "stage3_running" => Ok(Stage3Running),
            "stage3_complete" => Ok(Stage3Complete),
            "synthesis_review_pending" => Ok(SynthesisReviewPending),
            "synthesis_review_in_progress" => Ok(SynthesisReviewInProgress),
            "synthesis_approved" => Ok(SynthesisApproved),
            "synthesis_revision_requested" => Ok(SynthesisRevisionRequested),
            "synthesis_rejected" => Ok(SynthesisRejected),
            "extracting_data" => Ok(ExtractingData),
            "generating_report" => Ok(GeneratingReport),
            "report_review_pending" => Ok(ReportReviewPending),
            "report_review_in_progress" => Ok(ReportReviewInProgress),
            "report_approved" => Ok(ReportApproved),
            "report_edit_requested" => Ok(ReportEditRequested),
            "report_regeneration_requested" => Ok(ReportRegenerationRequested),
            "report_rejected" => Ok(ReportRejected),
            "updating_knowledge" => Ok(UpdatingKnowledge),
            "completed" => Ok(Completed),
            "failed" => Ok(Failed),
            "cancelled" => Ok(Cancelled),
            _ => Err(format!("Unknown assessment state: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const ALL: [AssessmentState; 25] = [
        AssessmentState::Draft,
        AssessmentState::Preprocessing,
        AssessmentState::Stage1Running,
        AssessmentState::Stage1Complete,
        AssessmentState::Stage2Running,
        AssessmentState::Stage2Complete,
        AssessmentState::Stage3Running,
        AssessmentState::Stage3Complete,
        AssessmentState::SynthesisReviewPending,
        AssessmentState::SynthesisReviewInProgress,
        AssessmentState::SynthesisApproved,
        AssessmentState::SynthesisRevisionRequested,
        AssessmentState::SynthesisRejected,
        AssessmentState::ExtractingData,
        AssessmentState::GeneratingReport,
        AssessmentState::ReportReviewPending,
        AssessmentState::ReportReviewInProgress,
        AssessmentState::ReportApproved,
        AssessmentState::ReportEditRequested,
        AssessmentState::ReportRegenerationRequested,
        AssessmentState::ReportRejected,
        AssessmentState::UpdatingKnowledge,
        AssessmentState::Completed,
        AssessmentState::Failed,
        AssessmentState::Cancelled,
    ];

    #[test]
    fn test_happy_path_is_legal() {
        use AssessmentState::*;
        let path = [
            Draft,
            Preprocessing,
            Stage1Running,
            Stage1Complete,
            Stage2Running,
            Stage2Complete,
            Stage3Running,
            Stage3Complete,
            SynthesisReviewPending,
            SynthesisReviewInProgress,
            SynthesisApproved,
            ExtractingData,
            GeneratingReport,
            ReportReviewPending,
            ReportReviewInProgress,
            ReportApproved,
            UpdatingKnowledge,
            Completed,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_revision_loops_back_to_stage3() {
        assert!(AssessmentState::SynthesisRevisionRequested
            .can_transition_to(AssessmentState::Stage3Running));
        assert!(AssessmentState::ReportRegenerationRequested
            .can_transition_to(AssessmentState::GeneratingReport));
    }

    #[test]
    fn test_illegal_jumps_rejected() {
        assert!(!AssessmentState::Draft.can_transition_to(AssessmentState::Completed));
        assert!(!AssessmentState::Stage1Running.can_transition_to(AssessmentState::Stage3Running));
        assert!(!AssessmentState::Completed.can_transition_to(AssessmentState::Draft));
    }

    #[test]
    fn test_terminal_states() {
        assert!(AssessmentState::Completed.is_terminal());
        assert!(AssessmentState::Failed.is_terminal());
        assert!(AssessmentState::Cancelled.is_terminal());
        assert!(AssessmentState::SynthesisRejected.is_terminal());
        assert!(AssessmentState::ReportRejected.is_terminal());
        assert!(!AssessmentState::Stage2Running.is_terminal());
    }

    #[test]
    fn test_display_fromstr_roundtrip() {
        for state in ALL {
            let parsed = AssessmentState::from_str(&state.to_string()).unwrap();
            assert_eq!(parsed, state);
        }
        assert!(AssessmentState::from_str("nonsense").is_err());
    }

    #[test]
    fn test_non_terminal_states_can_cancel() {
        for state in ALL {
            if !state.is_terminal() {
                assert!(
                    state.can_transition_to(AssessmentState::Cancelled),
                    "{} should allow cancellation",
                    state
                );
            }
        }
    }
}
