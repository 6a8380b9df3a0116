//! Structured report: the 21 Belgian impact themes and the section
//! extractor that parses chairman output into the fixed report form.

mod extract;
pub mod themes;

pub use extract::{
    extract_report, validate_synthesis, ImpactTag, SectionName, StructuredReport, ThemeAssessment,
};
pub use themes::{theme_name, theme_sheet, THEME_COUNT};
