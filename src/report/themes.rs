//! The 21 Belgian impact themes.
//!
//! The official form lists 21 numbered themes; every assessment must
//! carry an impact determination for each. Names follow the English
//! rendering of the Belgian RIA form.

/// Number of impact themes on the Belgian form.
pub const THEME_COUNT: usize = 21;

/// Theme names, indexed 0..20 for themes 1..21.
const THEME_NAMES: [&str; THEME_COUNT] = [
    "Combating poverty",
    "Equal opportunities and social cohesion",
    "Equality between women and men",
    "Health",
    "Employment",
    "Consumption and production patterns",
    "Economic development",
    "Investments",
    "Research and development",
    "SMEs",
    "Administrative burdens",
    "Energy",
    "Mobility",
    "Food",
    "Climate change",
    "Natural resources",
    "Outdoor and indoor air",
    "Biodiversity",
    "Nuisance",
    "Government",
    "Policy coherence for development",
];

/// Short keyword sheet per theme, used in council prompts so models know
/// what each theme covers.
const THEME_KEYWORDS: [&str; THEME_COUNT] = [
    "minimum income, access to quality services, over-indebtedness, risk of poverty or social exclusion, digital divide",
    "non-discrimination, equal treatment, access to goods and services, education and training, effectiveness of civil and social rights",
    "access of women and men to resources, income, work, health, education, mobility, exercise of fundamental rights",
    "access to quality healthcare, life expectancy in good health, chronic disease treatment, health determinants, quality of life",
    "access to the labour market, quality jobs, unemployment, working conditions, work-life balance, collective labour relations",
    "price stability, consumer information and protection, resource efficiency, externalities across product life cycles",
    "business creation, productivity, competitiveness, market access, public procurement, international trade relations",
    "investment in physical, technological, intellectual, and human capital, net investment as share of GDP",
    "research and development opportunities, innovation, diffusion of new production methods, R&D expenditure",
    "impact on the development of small and medium-sized enterprises",
    "reduction of formalities and administrative obligations tied to exercising rights or meeting obligations",
    "energy mix, energy efficiency, energy consumption, security of supply, access to energy goods and services",
    "transport volume, collective transport supply, modal shift, safety, traffic density",
    "access to safe food, healthy nutrition, food waste, fair trade",
    "greenhouse gas emissions, adaptation capacity, resilience, energy transition, renewable sources, carbon capture",
    "efficient resource management, recycling, water quality and consumption, soil quality and use, deforestation",
    "air quality including indoor air, pollutant emissions, fine particulates",
    "biological diversity, ecosystem condition, habitat alteration and fragmentation, invasive species, threatened species",
    "noise, visual or olfactory nuisance, vibrations, ionizing and non-ionizing radiation, light pollution",
    "democratic functioning of consultation bodies, public services to users, complaints and appeals, public investment",
    "consideration of unintended impacts of policy measures on the interests of developing countries",
];

/// English name for a theme number (1-based). Panics outside 1..=21,
/// which is a programmer error against the closed set.
pub fn theme_name(number: usize) -> &'static str {
    THEME_NAMES[number - 1]
}

/// Numbered theme sheet for prompts: `[N] Name (covers: keywords)`.
pub fn theme_sheet() -> String {
    let mut sheet = String::new();
    for (idx, name) in THEME_NAMES.iter().enumerate() {
        sheet.push_str(&format!(
            "[{}] {} (covers: {})\n",
            idx + 1,
            name,
            THEME_KEYWORDS[idx]
        ));
    }
    sheet
}

/// Compact numbered list without keywords.
pub fn theme_list() -> String {
    THEME_NAMES
        .iter()
        .enumerate()
        .map(|(idx, name)| format!("[{}] {}", idx + 1, name))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_theme_count_is_21() {
        assert_eq!(THEME_COUNT, 21);
        assert_eq!(THEME_NAMES.len(), THEME_KEYWORDS.len());
    }

    #[test]
    fn test_theme_name_boundaries() {
        assert_eq!(theme_name(1), "Combating poverty");
        assert_eq!(theme_name(21), "Policy coherence for development");
    }

    #[test]
    fn test_sheet_numbers_every_theme() {
        let sheet = theme_sheet();
        for n in 1..=THEME_COUNT {
            assert!(sheet.contains(&format!("[{}]", n)), "missing theme {}", n);
        }
    }
}
