//! Section extraction from chairman output.
//!
//! Parses the synthesis text into the fixed report form: five named
//! sections, 21 theme assessments with impact tags, and source citations
//! resolved against the context bundle. Missing input never crashes the
//! extractor; absent themes are recorded as `unknown` and feed the
//! quality metrics.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::themes::{theme_name, THEME_COUNT};
use crate::retrieval::SourceRef;

/// Impact determination for one theme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactTag {
    /// Positive impact.
    Positive,
    /// Negative impact.
    Negative,
    /// Explicitly no impact.
    #[serde(rename = "none")]
    NoImpact,
    /// The synthesis did not state a determination.
    #[default]
    Unknown,
}

impl std::fmt::Display for ImpactTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImpactTag::Positive => write!(f, "positive"),
            ImpactTag::Negative => write!(f, "negative"),
            ImpactTag::NoImpact => write!(f, "none"),
            ImpactTag::Unknown => write!(f, "unknown"),
        }
    }
}

/// Closed set of report section names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionName {
    BackgroundAndProblemDefinition,
    ExecutiveSummary,
    ProposalOverview,
    ImpactThemes,
    OverallAssessmentSummary,
}

impl SectionName {
    /// Every section, in report order.
    pub const ALL: [SectionName; 5] = [
        SectionName::BackgroundAndProblemDefinition,
        SectionName::ExecutiveSummary,
        SectionName::ProposalOverview,
        SectionName::ImpactThemes,
        SectionName::OverallAssessmentSummary,
    ];

    /// Heading text as it appears in synthesis output.
    pub fn title(&self) -> &'static str {
        match self {
            SectionName::BackgroundAndProblemDefinition => "Background and Problem Definition",
            SectionName::ExecutiveSummary => "Executive Summary",
            SectionName::ProposalOverview => "Proposal Overview",
            SectionName::ImpactThemes => "21 Belgian Impact Themes Assessment",
            SectionName::OverallAssessmentSummary => "Overall Assessment Summary",
        }
    }
}

/// One theme's assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemeAssessment {
    /// Theme number, 1..=21.
    pub number: usize,
    /// Theme name.
    pub name: String,
    /// Impact determination.
    pub impact: ImpactTag,
    /// Explanation text.
    pub explanation: String,
    /// Citations found within this theme's text.
    pub citations: Vec<String>,
}

/// The structured report parsed out of chairman text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredReport {
    /// Section contents over the closed name set (absent sections map to
    /// empty strings).
    pub sections: BTreeMap<SectionName, String>,
    /// Exactly 21 theme entries, ordered by number.
    pub themes: Vec<ThemeAssessment>,
    /// All citations resolved against the context sources.
    pub citations: Vec<String>,
    /// Themes the synthesis omitted.
    pub missing_themes: usize,
}

impl StructuredReport {
    /// Sections with non-empty content.
    pub fn sections_filled(&self) -> usize {
        self.sections.values().filter(|s| !s.is_empty()).count()
    }

    /// Completeness ratio over sections and themes.
    pub fn completeness(&self) -> f64 {
        let section_ratio = self.sections_filled() as f64 / SectionName::ALL.len() as f64;
        let theme_ratio =
            (THEME_COUNT - self.missing_themes) as f64 / THEME_COUNT as f64;
        (section_ratio + theme_ratio) / 2.0
    }
}

static THEME_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d{1,2})\]").expect("static regex"));
static BRACKET_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([A-Za-z][A-Za-z0-9_.\-]{1,63})\]").expect("static regex"));

/// Parse the chairman synthesis into the structured report form.
pub fn extract_report(text: &str, sources: &[SourceRef]) -> StructuredReport {
    let sections = split_sections(text);

    // Themes come from their own section when present, otherwise the
    // whole text is scanned.
    let theme_text = sections
        .get(&SectionName::ImpactThemes)
        .filter(|s| !s.is_empty())
        .map(|s| s.as_str())
        .unwrap_or(text);
    let themes = extract_themes(theme_text, sources);
    let missing_themes = themes
        .iter()
        .filter(|t| t.impact == ImpactTag::Unknown && t.explanation == "missing in synthesis")
        .count();

    let citations = resolve_citations(text, sources);

    StructuredReport {
        sections,
        themes,
        citations,
        missing_themes,
    }
}

/// Locate each closed-set heading and slice the text between headings.
fn split_sections(text: &str) -> BTreeMap<SectionName, String> {
    let mut positions: Vec<(usize, usize, SectionName)> = Vec::new();
    for section in SectionName::ALL {
        let pattern = format!(r"(?i)(?:\d+\.\s*)?{}", regex::escape(section.title()));
        let re = Regex::new(&pattern).expect("section regex");
        if let Some(found) = re.find(text) {
            positions.push((found.start(), found.end(), section));
        }
    }
    positions.sort_by_key(|&(start, _, _)| start);

    let mut sections: BTreeMap<SectionName, String> = SectionName::ALL
        .iter()
        .map(|&s| (s, String::new()))
        .collect();
    for (idx, &(_, body_start, section)) in positions.iter().enumerate() {
        let end = positions
            .get(idx + 1)
            .map(|&(next_start, _, _)| next_start)
            .unwrap_or(text.len());
        sections.insert(section, text[body_start..end].trim().to_string());
    }
    sections
}

/// Split the themes section into 21 entries keyed by `[N]` markers.
fn extract_themes(text: &str, sources: &[SourceRef]) -> Vec<ThemeAssessment> {
    // First marker position per theme number.
    let mut marker_at: BTreeMap<usize, usize> = BTreeMap::new();
    let mut marker_end: BTreeMap<usize, usize> = BTreeMap::new();
    for captures in THEME_MARKER.captures_iter(text) {
        let Ok(number) = captures[1].parse::<usize>() else {
            continue;
        };
        if !(1..=THEME_COUNT).contains(&number) {
            continue;
        }
        let whole = captures.get(0).expect("capture 0");
        marker_at.entry(number).or_insert(whole.start());
        marker_end.entry(number).or_insert(whole.end());
    }

    // A theme's text runs to the next theme marker that appears after it.
    let mut boundaries: Vec<usize> = marker_at.values().copied().collect();
    boundaries.sort_unstable();

    (1..=THEME_COUNT)
        .map(|number| {
            let name = theme_name(number).to_string();
            match marker_at.get(&number) {
                Some(&start) => {
                    let body_start = marker_end[&number];
                    let end = boundaries
                        .iter()
                        .find(|&&b| b > start)
                        .copied()
                        .unwrap_or(text.len());
                    let body = text[body_start..end].trim();
                    ThemeAssessment {
                        number,
                        name,
                        impact: detect_impact(body),
                        explanation: body.to_string(),
                        citations: resolve_citations(body, sources),
                    }
                }
                None => {
                    debug!(theme = number, "Theme missing in synthesis");
                    ThemeAssessment {
                        number,
                        name,
                        impact: ImpactTag::Unknown,
                        explanation: "missing in synthesis".to_string(),
                        citations: Vec::new(),
                    }
                }
            }
        })
        .collect()
}

/// Detect the impact tag from normalized phrases near the start of a
/// theme body.
fn detect_impact(body: &str) -> ImpactTag {
    let head: String = body.chars().take(240).collect::<String>().to_lowercase();
    let positions = [
        (head.find("positive impact"), ImpactTag::Positive),
        (head.find("negative impact"), ImpactTag::Negative),
        (head.find("no impact"), ImpactTag::NoImpact),
    ];
    positions
        .into_iter()
        .filter_map(|(at, tag)| at.map(|at| (at, tag)))
        .min_by_key(|&(at, _)| at)
        .map(|(_, tag)| tag)
        .unwrap_or(ImpactTag::Unknown)
}

/// Bracketed references that point back at a chunk id or document name
/// from the synthesized context. Everything else in brackets (theme
/// markers, impact tags) is ignored.
fn resolve_citations(text: &str, sources: &[SourceRef]) -> Vec<String> {
    let mut citations: Vec<String> = Vec::new();
    for captures in BRACKET_REF.captures_iter(text) {
        let reference = &captures[1];
        let known = sources
            .iter()
            .any(|s| s.chunk_id == reference || s.document_id == reference);
        if known && !citations.iter().any(|c| c == reference) {
            citations.push(reference.to_string());
        }
    }
    citations
}

/// Validate a synthesis before extraction: issues found here drive the
/// bounded chairman refinement loop. An empty list means the synthesis
/// is acceptable.
pub fn validate_synthesis(text: &str) -> Vec<String> {
    let mut issues = Vec::new();

    if text.trim().len() < 1_000 {
        issues.push("synthesis is too short for a complete assessment".to_string());
    }

    let lower = text.to_lowercase();
    if !lower.contains("background") && !lower.contains("problem definition") {
        issues.push("Background and Problem Definition section is missing".to_string());
    }

    let mut themes_found = 0;
    for number in 1..=THEME_COUNT {
        if text.contains(&format!("[{}]", number)) {
            themes_found += 1;
        }
    }
    if themes_found < 15 {
        issues.push(format!(
            "only {}/{} impact themes found",
            themes_found, THEME_COUNT
        ));
    }

    let structure_sections = SectionName::ALL
        .iter()
        .filter(|s| lower.contains(&s.title().to_lowercase()))
        .count();
    if structure_sections < 3 {
        issues.push("required structure sections are missing".to_string());
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources() -> Vec<SourceRef> {
        vec![
            SourceRef {
                chunk_id: "chunk-eu-0042".to_string(),
                document_id: "doc-swd-2022".to_string(),
            },
            SourceRef {
                chunk_id: "chunk-be-0007".to_string(),
                document_id: "doc-ria-2014".to_string(),
            },
        ]
    }

    fn full_synthesis() -> String {
        let mut text = String::from(
            "1. Background and Problem Definition\nThe problem is well documented \
             [chunk-eu-0042] and mirrors earlier assessments.\n\n\
             2. Executive Summary\nA short summary.\n\n\
             3. Proposal Overview\nWhat the proposal does.\n\n\
             4. 21 Belgian Impact Themes Assessment\n",
        );
        for number in 1..=THEME_COUNT {
            let tag = match number % 3 {
                0 => "NO IMPACT",
                1 => "POSITIVE IMPACT",
                _ => "NEGATIVE IMPACT",
            };
            text.push_str(&format!(
                "[{}] Theme heading\n[{}] The measure affects this area [chunk-be-0007].\n\n",
                number, tag
            ));
        }
        text.push_str("5. Overall Assessment Summary\nOn balance the measure helps.\n");
        text
    }

    #[test]
    fn test_extracts_all_sections() {
        let report = extract_report(&full_synthesis(), &sources());
        assert_eq!(report.sections_filled(), 5);
        assert!(report.sections[&SectionName::BackgroundAndProblemDefinition]
            .contains("well documented"));
        assert!(report.sections[&SectionName::OverallAssessmentSummary].contains("On balance"));
    }

    #[test]
    fn test_exactly_21_themes_with_tags() {
        let report = extract_report(&full_synthesis(), &sources());
        assert_eq!(report.themes.len(), THEME_COUNT);
        assert_eq!(report.missing_themes, 0);
        assert_eq!(report.themes[0].number, 1);
        assert_eq!(report.themes[0].impact, ImpactTag::Positive);
        assert_eq!(report.themes[1].impact, ImpactTag::Negative);
        assert_eq!(report.themes[2].impact, ImpactTag::NoImpact);
    }

    #[test]
    fn test_missing_themes_are_unknown() {
        let text = "4. 21 Belgian Impact Themes Assessment\n\
                    [1] POSITIVE IMPACT on poverty reduction.\n\
                    [2] NEGATIVE IMPACT on equal opportunities.\n";
        let report = extract_report(text, &[]);
        assert_eq!(report.themes.len(), THEME_COUNT);
        assert_eq!(report.missing_themes, THEME_COUNT - 2);
        let missing = &report.themes[5];
        assert_eq!(missing.impact, ImpactTag::Unknown);
        assert_eq!(missing.explanation, "missing in synthesis");
    }

    #[test]
    fn test_empty_input_never_crashes() {
        let report = extract_report("", &[]);
        assert_eq!(report.themes.len(), THEME_COUNT);
        assert_eq!(report.missing_themes, THEME_COUNT);
        assert_eq!(report.sections_filled(), 0);
        assert!(report.citations.is_empty());
    }

    #[test]
    fn test_citations_resolve_against_known_sources_only() {
        let report = extract_report(&full_synthesis(), &sources());
        assert!(report.citations.contains(&"chunk-eu-0042".to_string()));
        assert!(report.citations.contains(&"chunk-be-0007".to_string()));
        // Impact tags and theme markers never count as citations.
        assert!(!report.citations.iter().any(|c| c.contains("IMPACT")));
    }

    #[test]
    fn test_impact_detection_prefers_earliest_phrase() {
        assert_eq!(detect_impact("POSITIVE IMPACT expected, though no impact on X"), ImpactTag::Positive);
        assert_eq!(detect_impact("No impact. A positive impact was ruled out."), ImpactTag::NoImpact);
        assert_eq!(detect_impact("unclear wording"), ImpactTag::Unknown);
    }

    #[test]
    fn test_validate_synthesis_flags_gaps() {
        let issues = validate_synthesis("too short");
        assert!(issues.iter().any(|i| i.contains("too short")));
        assert!(issues.iter().any(|i| i.contains("impact themes")));

        let issues = validate_synthesis(&full_synthesis());
        assert!(issues.is_empty(), "unexpected issues: {:?}", issues);
    }

    #[test]
    fn test_completeness_ratio() {
        let report = extract_report(&full_synthesis(), &sources());
        assert!((report.completeness() - 1.0).abs() < 1e-9);

        let empty = extract_report("", &[]);
        assert_eq!(empty.completeness(), 0.0);
    }
}
