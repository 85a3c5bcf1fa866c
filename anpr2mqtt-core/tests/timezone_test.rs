//! Local-time resolution around daylight saving transitions
//!
//! Runs as its own test binary so the zone can be pinned for the process.

use anpr2mqtt_core::config::FilenamePattern;
use anpr2mqtt_core::filename::parse;
use anpr2mqtt_core::tracker::VisitTracker;
use chrono::{Offset, Timelike};

#[test]
fn test_london_spring_forward_gap() {
    std::env::set_var("TZ", "Europe/London");

    // 01:30 on 30 March 2025 never happens on a London wall clock
    let info = parse(
        "20250330013000000_AB12CDE_VEHICLE_DETECTION.jpg",
        1024,
        &FilenamePattern::default(),
    )
    .unwrap();
    assert_eq!(info.target, "AB12CDE");
    assert_eq!(info.timestamp.hour(), 1);
    assert_eq!(info.timestamp.minute(), 30);
    assert_eq!(info.timestamp.offset().fix().local_minus_utc(), 0);

    // Offset-less history written during the gap still reads back
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("plate")).unwrap();
    std::fs::write(
        dir.path().join("plate").join("AB12CDE.json"),
        r#"["2025-03-30T01:30:00"]"#,
    )
    .unwrap();
    let tracker = VisitTracker::new(dir.path());
    let (count, last) = tracker.record_visit("AB12CDE", "plate", None);
    assert_eq!(count, 1);
    assert_eq!(last.unwrap().hour(), 1);
}
