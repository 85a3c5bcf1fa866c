use anpr2mqtt_core::classifier::classify;
use anpr2mqtt_core::config::{FilenamePattern, Pattern, TargetSettings};
use anpr2mqtt_core::filename::{isoformat, parse};
use chrono::{DateTime, Timelike};
use proptest::prelude::*;

fn rules() -> TargetSettings {
    let mut rules = TargetSettings::default();
    rules
        .correction
        .insert("PK12TST".to_string(), vec![Pattern::new("P12TST").unwrap()]);
    rules.ignore.push(Pattern::new("ZZ.*").unwrap());
    rules.known.insert("PK12TST".to_string(), Some("Postie".to_string()));
    rules.known.insert("AB12CDE".to_string(), None);
    rules
        .dangerous
        .insert("AB12CDE".to_string(), Some("Local dodgy man".to_string()));
    rules
}

proptest! {
    #[test]
    fn test_classify_is_idempotent(target in "[A-Z0-9]{0,8}") {
        let rules = rules();
        let first = classify(Some(&target), Some(&rules));
        let second = classify(Some(&target), Some(&rules));
        prop_assert_eq!(first, second);
    }

    #[test]
    fn test_classify_keeps_original(target in "[A-Z0-9]{1,8}") {
        let result = classify(Some(&target), Some(&rules()));
        prop_assert_eq!(result.orig_target.as_deref(), Some(target.as_str()));
        // Known wins over dangerous; dangerous over ignore
        if result.known {
            prop_assert_eq!(result.priority, anpr2mqtt_core::Priority::Medium);
        }
    }

    #[test]
    fn test_parse_yields_captured_target(
        year in 2000u32..2100,
        month in 1u32..=12,
        day in 1u32..=28,
        hour in 0u32..24,
        minute in 0u32..60,
        second in 0u32..60,
        fraction in 0u32..1000,
        target in "[A-Z0-9]{1,10}",
    ) {
        let name = format!(
            "{:04}{:02}{:02}{:02}{:02}{:02}{:03}_{}_VEHICLE_DETECTION.jpg",
            year, month, day, hour, minute, second, fraction, target
        );
        let pattern = FilenamePattern::default();
        // Local zones may skip the hour entirely
        if let Some(info) = parse(&name, 1, &pattern) {
            prop_assert_eq!(&info.target, &target);
            prop_assert_eq!(info.timestamp.nanosecond(), fraction * 1000);
            let reparsed = DateTime::parse_from_rfc3339(&isoformat(&info.timestamp)).unwrap();
            prop_assert_eq!(reparsed, info.timestamp);
        }
    }
}
