//! Target classification against user maintained lists

use crate::config::TargetSettings;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Alert priority of a sighting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

/// Outcome of classifying one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub orig_target: Option<String>,
    pub target: Option<String>,
    pub ignore: bool,
    pub known: bool,
    pub dangerous: bool,
    pub priority: Priority,
    pub description: String,
}

impl Classification {
    fn unclassified(target: Option<&str>) -> Self {
        Self {
            orig_target: target.map(str::to_string),
            target: target.map(str::to_string),
            ignore: false,
            known: false,
            dangerous: false,
            priority: Priority::High,
            description: "Unknown vehicle".to_string(),
        }
    }
}

/// Classify a target identifier
///
/// Rules run in a fixed order: correction, ignore, dangerous, known. Every
/// rule after correction sees the corrected identifier. A target both
/// dangerous and known ends up with the known priority and description
/// while keeping the dangerous flag.
pub fn classify(target: Option<&str>, rules: Option<&TargetSettings>) -> Classification {
    let mut results = Classification::unclassified(target);
    let (Some(orig_target), Some(rules)) = (target.filter(|t| !t.is_empty()), rules) else {
        return results;
    };
    let mut target: &str = orig_target;

    if let Some((corrected, _)) = rules
        .correction
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|p| p.is_match(target)))
    {
        info!("Corrected target {} -> {}", target, corrected);
        results.target = Some(corrected.clone());
        target = corrected.as_str();
    }

    if let Some(pattern) = rules.ignore.iter().find(|p| p.is_match(target)) {
        info!("Ignoring {} matching ignore pattern {}", target, pattern);
        results.ignore = true;
        results.priority = Priority::Low;
        results.description = "Ignored".to_string();
    }

    if let Some(description) = rules.dangerous.get(target) {
        warn!("{} known as potential danger", target);
        results.dangerous = true;
        results.priority = Priority::Critical;
        results.description = describe(description, "Potential threat");
    }

    if let Some(description) = rules.known.get(target) {
        info!("{} known to household", target);
        results.known = true;
        results.priority = Priority::Medium;
        results.description = describe(description, "Known");
    }

    results
}

fn describe(configured: &Option<String>, fallback: &str) -> String {
    match configured.as_deref() {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => fallback.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Pattern;

    fn rules() -> TargetSettings {
        let mut rules = TargetSettings::default();
        rules
            .correction
            .insert("PK12TST".to_string(), vec![Pattern::new("P12TST").unwrap()]);
        rules
    }

    #[test]
    fn test_no_target_or_rules() {
        let results = classify(None, Some(&rules()));
        assert_eq!(results.priority, Priority::High);
        assert_eq!(results.description, "Unknown vehicle");
        assert!(results.target.is_none());

        let results = classify(Some(""), Some(&rules()));
        assert_eq!(results.target.as_deref(), Some(""));
        assert!(!results.known);

        let results = classify(Some("AB12CDE"), None);
        assert_eq!(results.target.as_deref(), Some("AB12CDE"));
        assert_eq!(results.priority, Priority::High);
    }

    #[test]
    fn test_known_after_correction() {
        let mut rules = rules();
        rules.known.insert("PK12TST".to_string(), Some("Postie".to_string()));

        let results = classify(Some("P12TST"), Some(&rules));
        assert!(results.known);
        assert!(!results.dangerous);
        assert_eq!(results.priority, Priority::Medium);
        assert_eq!(results.description, "Postie");
        assert_eq!(results.target.as_deref(), Some("PK12TST"));
        assert_eq!(results.orig_target.as_deref(), Some("P12TST"));
    }

    #[test]
    fn test_dangerous() {
        let mut rules = rules();
        rules
            .dangerous
            .insert("PK12TST".to_string(), Some("Local dodgy man".to_string()));

        let results = classify(Some("PK12TST"), Some(&rules));
        assert!(results.dangerous);
        assert_eq!(results.priority, Priority::Critical);
        assert_eq!(results.description, "Local dodgy man");
    }

    #[test]
    fn test_dangerous_and_known_ends_known() {
        let mut rules = rules();
        rules
            .dangerous
            .insert("PK12TST".to_string(), Some("Local dodgy man".to_string()));
        rules.known.insert("PK12TST".to_string(), Some("Postie".to_string()));

        let results = classify(Some("P12TST"), Some(&rules));
        assert!(results.dangerous);
        assert!(results.known);
        assert_eq!(results.priority, Priority::Medium);
        assert_eq!(results.description, "Postie");
    }

    #[test]
    fn test_ignore() {
        let mut rules = rules();
        rules.ignore.push(Pattern::new(".*TST").unwrap());

        let results = classify(Some("P12TST"), Some(&rules));
        assert!(results.ignore);
        assert_eq!(results.priority, Priority::Low);
        assert_eq!(results.description, "Ignored");

        let results = classify(Some("AB12CDE"), Some(&rules));
        assert!(!results.ignore);
    }

    #[test]
    fn test_empty_descriptions_fall_back() {
        let mut rules = TargetSettings::default();
        rules.known.insert("AB12CDE".to_string(), Some(String::new()));
        rules.dangerous.insert("XY99ZZZ".to_string(), None);

        assert_eq!(classify(Some("AB12CDE"), Some(&rules)).description, "Known");
        assert_eq!(classify(Some("XY99ZZZ"), Some(&rules)).description, "Potential threat");
    }

    #[test]
    fn test_first_correction_wins() {
        let mut rules = TargetSettings::default();
        rules
            .correction
            .insert("FIRST".to_string(), vec![Pattern::new("AB.*").unwrap()]);
        rules
            .correction
            .insert("SECOND".to_string(), vec![Pattern::new("AB12").unwrap()]);
        assert_eq!(classify(Some("AB12CDE"), Some(&rules)).target.as_deref(), Some("FIRST"));
    }

    #[test]
    fn test_priority_serialises_lowercase() {
        let value = serde_json::to_value(classify(Some("AB12CDE"), None)).unwrap();
        assert_eq!(value["priority"], "high");
        assert_eq!(value["orig_target"], "AB12CDE");
    }
}
