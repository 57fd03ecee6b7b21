//! Replay a small classroom log and print one student's growth report

use growth_flux::catalog::{RawObservationAdapter, TagCatalog};
use growth_flux::{ConfigProfile, GrowthProcessor, ScoreError, StudentId};

fn main() {
    let tags = r#"[
        { "tag_id": "ask-question", "name": "Asks questions", "sentiment": "POSITIVE", "default_weight": 5 },
        { "tag_id": "helps-peer", "name": "Helps a classmate", "sentiment": "POSITIVE", "default_weight": 6 },
        { "tag_id": "off-task", "name": "Off task", "sentiment": "NEGATIVE", "default_weight": 4 }
    ]"#;

    // the 03-04 entry for ask-question arrives after 03-05 and is replayed into place
    let log = r#"
{ "student_id": "stu-7", "tag_id": "ask-question", "timestamp": "2024-03-01T09:00:00Z", "weight": 4 }
{ "student_id": "stu-7", "tag_id": "off-task", "timestamp": "2024-03-01T10:30:00Z" }
{ "student_id": "stu-7", "tag_id": "ask-question", "timestamp": "2024-03-02T09:10:00Z", "weight": 5 }
{ "student_id": "stu-7", "tag_id": "helps-peer", "timestamp": "2024-03-02T13:00:00Z" }
{ "student_id": "stu-7", "tag_id": "ask-question", "timestamp": "2024-03-03T09:05:00Z", "weight": 6 }
{ "student_id": "stu-7", "tag_id": "off-task", "timestamp": "2024-03-03T11:00:00Z", "weight": 2 }
{ "student_id": "stu-7", "tag_id": "ask-question", "timestamp": "2024-03-05T09:00:00Z", "weight": 8 }
{ "student_id": "stu-7", "tag_id": "ask-question", "timestamp": "2024-03-04T09:00:00Z", "weight": 7 }
{ "student_id": "stu-7", "tag_id": "off-task", "timestamp": "2024-03-06T10:00:00Z", "weight": 1 }
"#;

    match run(tags, log) {
        Ok(report) => println!("{report}"),
        Err(e) => eprintln!("Error: {e:?}"),
    }
}

fn run(tags: &str, log: &str) -> Result<String, ScoreError> {
    let catalog = TagCatalog::from_json(tags)?;
    let mut processor = GrowthProcessor::new(ConfigProfile::default(), catalog)?;

    let raws = RawObservationAdapter::parse_ndjson(log)?;
    processor.record_all(&raws)?;

    let report = processor.report(&StudentId::from("stu-7"), 7.0)?;
    serde_json::to_string_pretty(&report).map_err(ScoreError::from)
}
