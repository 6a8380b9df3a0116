//! Corpus model: retrievable chunks and the closed policy vocabularies.
//!
//! Categories, domains, and analysis patterns are small closed sets encoded
//! as enums so graph construction and traversal stay fully typed. An
//! unknown tag is an ingestion-time error, not a retrieval-time surprise.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// High-level policy category. Closed set of 15; doubles as a chunk tag
/// and a knowledge-graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyCategory {
    Environment,
    Digital,
    Competition,
    Health,
    FundamentalRights,
    Employment,
    EconomicDevelopment,
    Energy,
    Transport,
    Agriculture,
    Education,
    ResearchInnovation,
    PublicAdministration,
    InternationalRelations,
    SocialCohesion,
}

impl PolicyCategory {
    /// Every category, in canonical order.
    pub const ALL: [PolicyCategory; 15] = [
        PolicyCategory::Environment,
        PolicyCategory::Digital,
        PolicyCategory::Competition,
        PolicyCategory::Health,
        PolicyCategory::FundamentalRights,
        PolicyCategory::Employment,
        PolicyCategory::EconomicDevelopment,
        PolicyCategory::Energy,
        PolicyCategory::Transport,
        PolicyCategory::Agriculture,
        PolicyCategory::Education,
        PolicyCategory::ResearchInnovation,
        PolicyCategory::PublicAdministration,
        PolicyCategory::InternationalRelations,
        PolicyCategory::SocialCohesion,
    ];

    /// Human-readable name as it appears in documents.
    pub fn name(&self) -> &'static str {
        match self {
            PolicyCategory::Environment => "Environment",
            PolicyCategory::Digital => "Digital",
            PolicyCategory::Competition => "Competition",
            PolicyCategory::Health => "Health",
            PolicyCategory::FundamentalRights => "Fundamental Rights",
            PolicyCategory::Employment => "Employment",
            PolicyCategory::EconomicDevelopment => "Economic Development",
            PolicyCategory::Energy => "Energy",
            PolicyCategory::Transport => "Transport",
            PolicyCategory::Agriculture => "Agriculture",
            PolicyCategory::Education => "Education",
            PolicyCategory::ResearchInnovation => "Research & Innovation",
            PolicyCategory::PublicAdministration => "Public Administration",
            PolicyCategory::InternationalRelations => "International Relations",
            PolicyCategory::SocialCohesion => "Social Cohesion",
        }
    }

    /// Keywords that signal this category in free text. Matched
    /// case-insensitively as substrings.
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            PolicyCategory::Environment => {
                &["environment", "climate", "biodiversity", "nature", "ecosystem", "green"]
            }
            PolicyCategory::Digital => {
                &["digital", "data", "cyber", "ai", "algorithm", "technology", "online"]
            }
            PolicyCategory::Competition => {
                &["competition", "market", "antitrust", "monopoly", "cartel"]
            }
            PolicyCategory::Health => {
                &["health", "medical", "disease", "patient", "healthcare", "hospital"]
            }
            PolicyCategory::FundamentalRights => {
                &["fundamental rights", "privacy", "discrimination", "freedom", "human rights"]
            }
            PolicyCategory::Employment => {
                &["employment", "labour", "worker", "job", "workplace", "employee"]
            }
            PolicyCategory::EconomicDevelopment => {
                &["economic", "growth", "sme", "enterprise", "investment", "productivity"]
            }
            PolicyCategory::Energy => {
                &["energy", "renewable", "solar", "wind", "power", "electricity"]
            }
            PolicyCategory::Transport => {
                &["transport", "mobility", "vehicle", "traffic", "infrastructure"]
            }
            PolicyCategory::Agriculture => {
                &["agriculture", "farming", "crop", "livestock", "rural"]
            }
            PolicyCategory::Education => {
                &["education", "school", "training", "student", "curriculum"]
            }
            PolicyCategory::ResearchInnovation => {
                &["research", "innovation", "r&d", "science", "patent"]
            }
            PolicyCategory::PublicAdministration => {
                &["administration", "public service", "bureaucracy", "government agency"]
            }
            PolicyCategory::InternationalRelations => {
                &["international", "trade agreement", "diplomatic", "foreign", "development aid"]
            }
            PolicyCategory::SocialCohesion => {
                &["social cohesion", "poverty", "inclusion", "inequality", "welfare"]
            }
        }
    }

    /// Domains this category touches. Drives the `has_domain` graph edges.
    pub fn domains(&self) -> &'static [Domain] {
        use Domain::*;
        match self {
            PolicyCategory::Environment => &[Environmental, Legal, Economic],
            PolicyCategory::Digital => &[Technological, Legal, Economic],
            PolicyCategory::Competition => &[Economic, Legal],
            PolicyCategory::Health => &[Social, Legal, Economic],
            PolicyCategory::FundamentalRights => &[Legal, Social],
            PolicyCategory::Employment => &[Economic, Social, Legal],
            PolicyCategory::EconomicDevelopment => &[Economic, Legal],
            PolicyCategory::Energy => &[Environmental, Economic, Technological],
            PolicyCategory::Transport => &[Economic, Environmental, Technological],
            PolicyCategory::Agriculture => &[Economic, Environmental, Social],
            PolicyCategory::Education => &[Social, Economic],
            PolicyCategory::ResearchInnovation => &[Technological, Economic],
            PolicyCategory::PublicAdministration => &[Administrative, Legal],
            PolicyCategory::InternationalRelations => &[Legal, Economic, Social],
            PolicyCategory::SocialCohesion => &[Social, Legal],
        }
    }

    /// Synonyms that map loose wording onto a category (e.g. "AI" is
    /// Digital, "ecosystem" is Environment). Applied after the keyword
    /// scan; kept separate so the keyword table mirrors document usage.
    pub fn synonyms() -> &'static [(&'static str, PolicyCategory)] {
        &[
            ("ai", PolicyCategory::Digital),
            ("artificial intelligence", PolicyCategory::Digital),
            ("machine learning", PolicyCategory::Digital),
            ("gdpr", PolicyCategory::Digital),
            ("ecosystem", PolicyCategory::Environment),
            ("emissions", PolicyCategory::Environment),
            ("pandemic", PolicyCategory::Health),
            ("gig economy", PolicyCategory::Employment),
            ("startups", PolicyCategory::EconomicDevelopment),
            ("grid", PolicyCategory::Energy),
        ]
    }
}

impl std::fmt::Display for PolicyCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for PolicyCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_lowercase();
        PolicyCategory::ALL
            .iter()
            .find(|c| c.name().to_lowercase() == norm)
            .copied()
            .ok_or_else(|| format!("Unknown policy category: {}", s))
    }
}

/// Analytical domain. Closed set of 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Legal,
    Economic,
    Technological,
    Social,
    Environmental,
    Administrative,
}

impl Domain {
    /// Every domain, in canonical order.
    pub const ALL: [Domain; 6] = [
        Domain::Legal,
        Domain::Economic,
        Domain::Technological,
        Domain::Social,
        Domain::Environmental,
        Domain::Administrative,
    ];

    /// Analysis patterns commonly applied within this domain. Drives the
    /// `uses_pattern` graph edges.
    pub fn patterns(&self) -> &'static [AnalysisPattern] {
        use AnalysisPattern::*;
        match self {
            Domain::Legal => &[RiskBased, ImpactAssessment, Stakeholder, Subsidiarity],
            Domain::Economic => &[CostBenefit, MarketFailure, BaselineComparison],
            Domain::Technological => &[RiskBased, BaselineComparison],
            Domain::Social => &[Stakeholder, ImpactAssessment],
            Domain::Environmental => &[RiskBased, ImpactAssessment, BaselineComparison],
            Domain::Administrative => &[CostBenefit, Subsidiarity],
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Domain::Legal => write!(f, "legal"),
            Domain::Economic => write!(f, "economic"),
            Domain::Technological => write!(f, "technological"),
            Domain::Social => write!(f, "social"),
            Domain::Environmental => write!(f, "environmental"),
            Domain::Administrative => write!(f, "administrative"),
        }
    }
}

impl std::str::FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "legal" => Ok(Domain::Legal),
            "economic" => Ok(Domain::Economic),
            "technological" => Ok(Domain::Technological),
            "social" => Ok(Domain::Social),
            "environmental" => Ok(Domain::Environmental),
            "administrative" => Ok(Domain::Administrative),
            _ => Err(format!("Unknown domain: {}", s)),
        }
    }
}

/// Analytical pattern found in assessment documents. Closed set of 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisPattern {
    CostBenefit,
    RiskBased,
    MarketFailure,
    Stakeholder,
    ImpactAssessment,
    BaselineComparison,
    Subsidiarity,
}

impl AnalysisPattern {
    /// Every pattern, in canonical order.
    pub const ALL: [AnalysisPattern; 7] = [
        AnalysisPattern::CostBenefit,
        AnalysisPattern::RiskBased,
        AnalysisPattern::MarketFailure,
        AnalysisPattern::Stakeholder,
        AnalysisPattern::ImpactAssessment,
        AnalysisPattern::BaselineComparison,
        AnalysisPattern::Subsidiarity,
    ];

    /// Keyword signatures used to infer the pattern from analysis text.
    pub fn signatures(&self) -> &'static [&'static str] {
        match self {
            AnalysisPattern::CostBenefit => &["cost-benefit", "cost benefit", "costs and benefits"],
            AnalysisPattern::RiskBased => &["risk", "hazard", "likelihood", "mitigation"],
            AnalysisPattern::MarketFailure => &["market failure", "externalit", "information asymmetry"],
            AnalysisPattern::Stakeholder => &["stakeholder", "consultation", "affected parties"],
            AnalysisPattern::ImpactAssessment => &["impact assessment", "impact analysis", "impacts on"],
            AnalysisPattern::BaselineComparison => &["baseline", "status quo", "no-action scenario"],
            AnalysisPattern::Subsidiarity => &["subsidiarity", "proportionality", "member state level"],
        }
    }

    /// Infer patterns present in analysis content by keyword signature.
    /// Falls back to `ImpactAssessment` so every analysis chunk links to
    /// at least one pattern.
    pub fn infer(content: &str) -> Vec<AnalysisPattern> {
        let lower = content.to_lowercase();
        let mut found: Vec<AnalysisPattern> = AnalysisPattern::ALL
            .iter()
            .filter(|p| p.signatures().iter().any(|sig| lower.contains(sig)))
            .copied()
            .collect();
        if found.is_empty() {
            found.push(AnalysisPattern::ImpactAssessment);
        }
        found
    }
}

impl std::fmt::Display for AnalysisPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisPattern::CostBenefit => write!(f, "cost-benefit"),
            AnalysisPattern::RiskBased => write!(f, "risk-based"),
            AnalysisPattern::MarketFailure => write!(f, "market-failure"),
            AnalysisPattern::Stakeholder => write!(f, "stakeholder"),
            AnalysisPattern::ImpactAssessment => write!(f, "impact-assessment"),
            AnalysisPattern::BaselineComparison => write!(f, "baseline-comparison"),
            AnalysisPattern::Subsidiarity => write!(f, "subsidiarity"),
        }
    }
}

impl std::str::FromStr for AnalysisPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cost-benefit" => Ok(AnalysisPattern::CostBenefit),
            "risk-based" => Ok(AnalysisPattern::RiskBased),
            "market-failure" => Ok(AnalysisPattern::MarketFailure),
            "stakeholder" => Ok(AnalysisPattern::Stakeholder),
            "impact-assessment" => Ok(AnalysisPattern::ImpactAssessment),
            "baseline-comparison" => Ok(AnalysisPattern::BaselineComparison),
            "subsidiarity" => Ok(AnalysisPattern::Subsidiarity),
            _ => Err(format!("Unknown analysis pattern: {}", s)),
        }
    }
}

/// Kind of retrievable chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// Category framing text.
    Category,
    /// Analytical reasoning.
    #[default]
    Analysis,
    /// Supporting evidence or data. Always tied to a source document.
    Evidence,
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkKind::Category => write!(f, "category"),
            ChunkKind::Analysis => write!(f, "analysis"),
            ChunkKind::Evidence => write!(f, "evidence"),
        }
    }
}

impl std::str::FromStr for ChunkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "category" => Ok(ChunkKind::Category),
            "analysis" => Ok(ChunkKind::Analysis),
            "evidence" => Ok(ChunkKind::Evidence),
            _ => Err(format!("Unknown chunk kind: {}", s)),
        }
    }
}

/// Typed metadata carried by every chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Jurisdiction the source belongs to (e.g. "EU", "Belgian").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
    /// Document type (e.g. "Impact Assessment").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    /// Publication year.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    /// Policy categories, ordered, no duplicates.
    #[serde(default)]
    pub categories: Vec<PolicyCategory>,
    /// Analysis type for analysis chunks (free-form from ingestion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_type: Option<String>,
    /// Evidence type for evidence chunks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_type: Option<String>,
    /// Impact direction hint, when the source states one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact_type: Option<String>,
}

/// Atomic unit of retrievable content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Opaque unique identifier.
    pub id: String,
    /// What kind of content this is.
    pub kind: ChunkKind,
    /// Normalized text content. Non-empty by invariant.
    pub content: String,
    /// Typed metadata.
    pub metadata: ChunkMetadata,
    /// Structural path within the source document (e.g. "3.2/para-4").
    #[serde(default)]
    pub position: String,
    /// Identifier of the source document.
    pub source_document_id: String,
    /// Token count estimate for budget accounting.
    pub token_count: usize,
}

impl Chunk {
    /// Create a chunk with a whitespace-based token estimate.
    pub fn new(
        id: impl Into<String>,
        kind: ChunkKind,
        content: impl Into<String>,
        source_document_id: impl Into<String>,
    ) -> Self {
        let content = content.into();
        let token_count = estimate_tokens(&content);
        Self {
            id: id.into(),
            kind,
            content,
            metadata: ChunkMetadata::default(),
            position: String::new(),
            source_document_id: source_document_id.into(),
            token_count,
        }
    }

    /// Set metadata.
    pub fn with_metadata(mut self, metadata: ChunkMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set categories.
    pub fn with_categories(mut self, categories: Vec<PolicyCategory>) -> Self {
        self.metadata.categories = categories;
        self
    }

    /// Set structural position.
    pub fn with_position(mut self, position: impl Into<String>) -> Self {
        self.position = position.into();
        self
    }

    /// Hash of the normalized content. Stable across runs, used for
    /// dedup and idempotent knowledge-base updates.
    pub fn content_hash(&self) -> String {
        content_hash(&self.content)
    }

    /// Ingestion-time validation of the chunk invariants.
    pub fn validate(&self) -> Result<(), String> {
        if normalize(&self.content).is_empty() {
            return Err(format!("chunk {} has empty content", self.id));
        }
        if self.kind == ChunkKind::Evidence && self.source_document_id.is_empty() {
            return Err(format!("evidence chunk {} has no source document", self.id));
        }
        Ok(())
    }
}

/// Lowercase, collapse whitespace.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// SHA-256 over normalized text, hex encoded.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(text).as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Rough token estimate: whitespace words plus a punctuation allowance.
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    words + words / 4
}

/// Scan free text for policy categories using keyword tables plus the
/// synonym list. Returns categories in canonical order, deduplicated.
pub fn match_categories(text: &str) -> Vec<PolicyCategory> {
    let lower = text.to_lowercase();
    let mut found: Vec<PolicyCategory> = Vec::new();

    for category in PolicyCategory::ALL {
        if category.keywords().iter().any(|kw| lower.contains(kw)) {
            found.push(category);
        }
    }
    for (synonym, category) in PolicyCategory::synonyms() {
        if lower.contains(synonym) && !found.contains(category) {
            found.push(*category);
        }
    }

    found.sort();
    found.dedup();
    found
}
