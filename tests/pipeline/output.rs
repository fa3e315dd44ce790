use std::path::PathBuf;

use serde_json::Value;
use time::macros::date;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use abstractor::{
    evidence::{EvidenceSourcePort, JsonDirectoryStore},
    pipeline::{
        BatchRunner, RunSummary,
        output::{write_records_ndjson, write_run_summary},
    },
    prioritizer::TypePriorityTable,
    types::{DateRange, SourceKind},
};

use crate::fixtures::{port, runner};

fn work_dir() -> PathBuf {
    std::env::temp_dir().join(format!("abstractor-pipeline-test-{}", Uuid::now_v7()))
}

#[tokio::test]
async fn given_batch_outcome_when_writing_outputs_then_one_line_per_event_and_summary_json() {
    let dir = work_dir();
    let batch = BatchRunner::new(runner(port()), 4);
    let outcome = batch
        .run(
            "run-out",
            vec!["p1".to_string(), "p3".to_string()],
            CancellationToken::new(),
        )
        .await;

    let records_path = dir.join("out").join("abstraction.ndjson");
    let summary_path = dir.join("out").join("run_summary.json");
    let written = write_records_ndjson(&records_path, &outcome.reports)
        .await
        .expect("records written");
    write_run_summary(&summary_path, &outcome.summary)
        .await
        .expect("summary written");

    assert_eq!(written, 2);
    let text = tokio::fs::read_to_string(&records_path)
        .await
        .expect("records readable");
    let lines: Vec<Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line is json"))
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["patient_id"], "p1");
    assert_eq!(lines[1]["patient_id"], "p3");
    assert_eq!(lines[1]["event_type"], "initial_surgery");

    let summary: RunSummary = serde_json::from_str(
        &tokio::fs::read_to_string(&summary_path)
            .await
            .expect("summary readable"),
    )
    .expect("summary parses");
    assert_eq!(summary, outcome.summary);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn given_patient_files_when_opening_directory_store_then_records_are_indexed() {
    let dir = work_dir();
    tokio::fs::create_dir_all(&dir).await.expect("dir created");
    tokio::fs::write(
        dir.join("p9.json"),
        r#"{
  "patient_id": "p9",
  "documents": [
    {
      "record_id": "p9-op",
      "source_kind": "operative_note",
      "record_date": "2021-02-03",
      "text": "Gross total resection of suprasellar mass."
    }
  ],
  "structured_fields": [
    {
      "record_id": "p9-sf",
      "record_date": "2021-02-05",
      "field": "histology",
      "value": "Craniopharyngioma"
    }
  ],
  "structured_events": [
    { "record_id": "p9-proc", "category": "procedure", "code": "61548", "date": "2021-02-03" }
  ]
}"#,
    )
    .await
    .expect("patient file written");
    tokio::fs::write(dir.join("notes.txt"), "ignored")
        .await
        .expect("stray file written");

    let store = JsonDirectoryStore::open(&dir, TypePriorityTable::default())
        .await
        .expect("store opens");

    assert_eq!(
        store.list_patients().await.expect("patients"),
        vec!["p9".to_string()]
    );
    let records = store
        .list_records(
            "p9",
            SourceKind::OperativeNote,
            DateRange::around(date!(2021 - 02 - 03), 7, 7),
        )
        .await
        .expect("records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].priority_weight, 95);
    let text = store.fetch_text("p9-op").await.expect("text");
    assert!(text.contains("Gross total resection"));

    let _ = tokio::fs::remove_dir_all(&dir).await;
}
