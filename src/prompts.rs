//! Centralized prompt builders for the council stages.
//!
//! Stage 1 assigns each council member a specialist role; stage 2 builds
//! criterion-focused evaluation prompts with a strict FINAL RANKING
//! contract; stage 3 gives the chairman the full deliberation record and
//! the required report structure.

use crate::report::themes;

/// Specialist role a council member plays in stage 1. Assigned by
/// rotating over the council list so every seat has a focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialistRole {
    /// Problem definition and policy analysis.
    ProblemDefinition,
    /// Evidence synthesis and data interpretation.
    EvidenceSynthesis,
    /// Impact determination and risk analysis.
    ImpactAssessment,
}

impl SpecialistRole {
    /// Role for the council seat at `index`.
    pub fn for_seat(index: usize) -> Self {
        match index % 3 {
            0 => SpecialistRole::ProblemDefinition,
            1 => SpecialistRole::EvidenceSynthesis,
            _ => SpecialistRole::ImpactAssessment,
        }
    }

    fn brief(&self) -> &'static str {
        match self {
            SpecialistRole::ProblemDefinition => {
                "You are a Problem Definition and Policy Analysis Specialist. Focus on:\n\
                 - A comprehensive problem definition and background\n\
                 - Policy context and regulatory gaps\n\
                 - Drawing insights from the retrieved assessment documents"
            }
            SpecialistRole::EvidenceSynthesis => {
                "You are an Evidence Synthesis and Data Interpretation Specialist. Focus on:\n\
                 - Synthesizing evidence from the retrieved documents\n\
                 - Proper citation of the retrieved sources\n\
                 - Data-driven impact determinations"
            }
            SpecialistRole::ImpactAssessment => {
                "You are an Impact Assessment and Risk Analysis Specialist. Focus on:\n\
                 - A complete 21-theme impact assessment\n\
                 - Risk identification and mitigation measures\n\
                 - Clear positive/negative/no impact determinations"
            }
        }
    }
}

/// Required section order every synthesis must follow.
pub const REPORT_STRUCTURE: &str = "\
1. Background and Problem Definition (FIRST and most important: define the problem clearly, citing retrieved documents)\n\
2. Executive Summary\n\
3. Proposal Overview\n\
4. 21 Belgian Impact Themes Assessment (one subsection per theme, numbered [1] through [21])\n\
5. Overall Assessment Summary";

/// Stage-1 prompt for one council seat.
pub fn stage1(proposal: &str, context: &str, role: SpecialistRole) -> String {
    format!(
        "Generate a comprehensive Regulatory Impact Assessment for the following proposal:\n\n\
         {proposal}\n\n\
         {role}\n\n\
         Retrieved Context:\n{context}\n\n\
         REQUIRED STRUCTURE (in this order):\n{structure}\n\n\
         21 Impact Themes to Assess:\n{themes}\n\n\
         For each theme, state [POSITIVE IMPACT] / [NEGATIVE IMPACT] / [NO IMPACT] followed by a \
         detailed, evidence-based explanation. Cite retrieved sources using their bracketed ids \
         (e.g. [chunk-eu-0042]) when drawing on their analysis patterns or evidence.",
        proposal = proposal,
        role = role.brief(),
        context = context,
        structure = REPORT_STRUCTURE,
        themes = themes::theme_sheet(),
    )
}

/// Stage-2 evaluation prompt: one criterion, anonymized responses in a
/// fixed presentation order, and a strict ranking contract.
pub fn evaluation(
    proposal: &str,
    criterion_name: &str,
    criterion_description: &str,
    labeled_responses: &[(String, String)],
) -> String {
    let responses_text = labeled_responses
        .iter()
        .map(|(label, text)| format!("{}:\n{}", label, text))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are evaluating regulatory impact assessments for {criterion_name}.\n\n\
         Original Proposal: {proposal}\n\n\
         Here are the responses from different models (anonymized):\n\n\
         {responses}\n\n\
         Your task:\n\
         1. Evaluate each response based on {description}.\n\
         2. For each response, explain what it does well and what it does poorly.\n\
         3. Then, at the very end of your response, provide a final ranking.\n\n\
         IMPORTANT: Your final ranking MUST be formatted EXACTLY as follows:\n\
         - Start with the line \"FINAL RANKING:\" (all caps, with colon)\n\
         - Then list ALL responses from best to worst as a numbered list\n\
         - Each line must be: number, period, space, then ONLY the response label (e.g., \"1. Response A\")\n\
         - Do not add any other text in the ranking section\n\n\
         Example of the correct ranking format:\n\n\
         FINAL RANKING:\n\
         1. Response C\n\
         2. Response A\n\
         3. Response B\n\n\
         Now provide your evaluation and ranking focusing on {criterion_name}:",
        criterion_name = criterion_name,
        proposal = proposal,
        responses = responses_text,
        description = criterion_description,
    )
}

/// Stage-3 chairman prompt: the full deliberation record plus the
/// structured output contract. Reviewer feedback from a revision cycle
/// is appended when present.
pub fn chairman(
    proposal: &str,
    context: &str,
    opinions: &[(String, String)],
    rankings_summary: &str,
    revision_feedback: Option<&str>,
) -> String {
    let stage1_text = opinions
        .iter()
        .map(|(model, text)| format!("Model: {}\nResponse: {}", model, text))
        .collect::<Vec<_>>()
        .join("\n\n");

    let feedback_section = revision_feedback
        .map(|feedback| {
            format!(
                "\n\nREVIEWER FEEDBACK (a human reviewer requested revision; address this directly):\n{}\n",
                feedback
            )
        })
        .unwrap_or_default();

    format!(
        "You are the Chairman of a model council for regulatory impact assessment. Council \
         members have each produced a draft assessment and then ranked each other's drafts \
         under varied evaluation criteria.\n\n\
         Original Proposal: {proposal}\n\n\
         Retrieved Context:\n{context}\n\n\
         STAGE 1 - Individual Responses:\n{stage1}\n\n\
         STAGE 2 - Aggregated Peer Rankings:\n{rankings}{feedback}\n\
         Synthesize all of this into a single, comprehensive assessment.\n\n\
         CRITICAL REQUIREMENTS:\n\
         1. Structure, in this exact order:\n{structure}\n\
         2. Assess ALL 21 themes, each tagged [POSITIVE IMPACT] / [NEGATIVE IMPACT] / [NO IMPACT]\n\
         3. Cite retrieved sources by their bracketed ids (e.g. [chunk-eu-0042]) wherever you \
         rely on their analysis patterns or evidence\n\
         4. Weigh the peer rankings: prefer the approaches the council ranked highly, and \
         combine the strengths of each response\n\n\
         21 Impact Themes:\n{themes}",
        proposal = proposal,
        context = context,
        stage1 = stage1_text,
        rankings = rankings_summary,
        feedback = feedback_section,
        structure = REPORT_STRUCTURE,
        themes = themes::theme_list(),
    )
}

/// Refinement prompt for a synthesis that failed validation.
pub fn refinement(current: &str, issues: &[String], proposal: &str, context: &str) -> String {
    let issues_text = issues
        .iter()
        .map(|issue| format!("- {}", issue))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "The following impact assessment needs refinement. Address every identified issue and \
         return the complete revised assessment.\n\n\
         Current Assessment:\n{current}\n\n\
         Issues to Address:\n{issues}\n\n\
         Original Proposal:\n{proposal}\n\n\
         Retrieved Context:\n{context}\n\n\
         Keep the required structure:\n{structure}\n\
         Assess ALL 21 themes with explicit impact tags and keep citations to retrieved sources.",
        current = current,
        issues = issues_text,
        proposal = proposal,
        context = context,
        structure = REPORT_STRUCTURE,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_rotate_over_seats() {
        assert_eq!(SpecialistRole::for_seat(0), SpecialistRole::ProblemDefinition);
        assert_eq!(SpecialistRole::for_seat(1), SpecialistRole::EvidenceSynthesis);
        assert_eq!(SpecialistRole::for_seat(2), SpecialistRole::ImpactAssessment);
        assert_eq!(SpecialistRole::for_seat(3), SpecialistRole::ProblemDefinition);
    }

    #[test]
    fn test_stage1_includes_all_themes() {
        let prompt = stage1("a proposal", "some context", SpecialistRole::for_seat(0));
        assert!(prompt.contains("[1]"));
        assert!(prompt.contains("[21]"));
        assert!(prompt.contains("Problem Definition"));
    }

    #[test]
    fn test_evaluation_carries_ranking_contract() {
        let responses = vec![
            ("Response A".to_string(), "text a".to_string()),
            ("Response B".to_string(), "text b".to_string()),
        ];
        let prompt = evaluation("a proposal", "accuracy", "factual correctness", &responses);
        assert!(prompt.contains("FINAL RANKING:"));
        assert!(prompt.contains("Response A:\ntext a"));
    }

    #[test]
    fn test_chairman_appends_feedback_when_present() {
        let opinions = vec![("m1".to_string(), "draft".to_string())];
        let without = chairman("p", "ctx", &opinions, "rankings", None);
        assert!(!without.contains("REVIEWER FEEDBACK"));
        let with = chairman("p", "ctx", &opinions, "rankings", Some("expand fundamental rights analysis"));
        assert!(with.contains("REVIEWER FEEDBACK"));
        assert!(with.contains("expand fundamental rights analysis"));
    }
}
