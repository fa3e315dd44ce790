use time::Date;

use abstractor::types::{CandidateValue, SourceKind, ValueEncoding};

pub const EOR: &str = "extent_of_resection";

pub fn candidate(record_id: &str, kind: SourceKind, date: Date, value: &str) -> CandidateValue {
    CandidateValue {
        variable_name: EOR.to_string(),
        value: value.to_string(),
        encoding: ValueEncoding::Vocabulary,
        source_record_id: record_id.to_string(),
        source_kind: kind,
        record_date: date,
        priority_weight: abstractor::prioritizer::TypePriorityTable::default().priority(kind),
        extraction_pass: 1,
    }
}
