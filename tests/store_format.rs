use std::error::Error;
use std::fs;

use proptest::prelude::*;
use tempfile::tempdir;

use qrun::store::{Status, TaskStore};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn fresh_store_carries_the_default_documentation() -> TestResult {
    let dir = tempdir()?;
    let path = dir.path().join("tasks.csv");

    let store = TaskStore::open(&path)?;
    assert!(store.is_empty());
    store.persist()?;

    let text = fs::read_to_string(&path)?;
    assert!(text.starts_with("# qrun tasks file."));
    assert!(text.contains("\"comment\",\"status\""));
    Ok(())
}

#[test]
fn persisted_bytes_are_exactly_what_reopen_expects() -> TestResult {
    let dir = tempdir()?;
    let path = dir.path().join("tasks.csv");

    let mut store = TaskStore::from_text("# kept line\n\n")?;
    store.add_task(&[
        ("comment", "first"),
        ("status", "NEW"),
        ("command", "echo hi"),
    ])?;
    store.add_task(&[("comment", "second"), ("status", "FINISHED"), ("rc", "0")])?;

    let text = qrun::store::format::serialize_store(
        store.preserved_lines(),
        store.header(),
        &[store.get(0).cloned().unwrap(), store.get(1).cloned().unwrap()],
    )?;
    fs::write(&path, &text)?;

    let expected = "# kept line\n\
                    \n\
                    \"comment\",\"status\",\"pid\",\"rc\",\"command\",\"group\",\"user\",\"host\",\"pwd\",\"inputfile\",\"outputfile\",\"errorfile\",\"exception\"\n\
                    \"first\",\"NEW\",\"\",\"\",\"echo hi\",\"\",\"\",\"\",\"\",\"\",\"\",\"\",\"\"\n\
                    \"second\",\"FINISHED\",\"\",\"0\",\"\",\"\",\"\",\"\",\"\",\"\",\"\",\"\",\"\"\n";
    assert_eq!(text, expected);

    let reopened = TaskStore::open(&path)?;
    assert_eq!(reopened.len(), 2);
    assert_eq!(reopened.get(0).unwrap().comment.as_deref(), Some("first"));
    assert_eq!(reopened.get(1).unwrap().rc, Some(0));
    Ok(())
}

#[test]
fn reopening_after_persist_preserves_everything() -> TestResult {
    let dir = tempdir()?;
    let path = dir.path().join("tasks.csv");

    let mut store = TaskStore::open(&path)?;
    store.add_task(&[
        ("comment", "quoting, \"test\""),
        ("status", "NEW"),
        ("command", "sh -c 'echo a,b'"),
        ("group", "2"),
    ])?;
    store.add_task(&[("status", "RUNNING"), ("pid", "9999")])?;
    store.persist()?;

    let mut reopened = TaskStore::open(&path)?;
    assert_eq!(reopened.len(), store.len());
    for rownum in 0..store.len() {
        assert_eq!(reopened.get(rownum), store.get(rownum));
    }
    assert_eq!(reopened.groups(), &[0, 2]);
    // The RUNNING row is unordered, so its pid is tracked right away.
    assert_eq!(reopened.list_pids(), vec![9999]);

    reopened.choose_group(2);
    assert_eq!(reopened.current_group(), 2);
    Ok(())
}

fn status_name() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("".to_string()),
        Just("NEW".to_string()),
        Just("RUNNING".to_string()),
        Just("FINISHED".to_string()),
        Just("FAILED".to_string()),
        Just("KILLED9".to_string()),
    ]
}

// Fields may hold quotes and commas but not line breaks; the format is
// line-oriented before it is CSV.
fn field_text() -> impl Strategy<Value = String> {
    "[^\r\n]{0,40}"
}

proptest! {
    #[test]
    fn any_row_set_survives_a_persist_and_reopen(
        rows in proptest::collection::vec(
            (field_text(), status_name(), field_text(), proptest::option::of(-5i64..5)),
            0..20,
        )
    ) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tasks.csv");

        let mut store = TaskStore::open(&path).unwrap();
        for (comment, status, command, group) in &rows {
            let group_text = group.map(|g| g.to_string()).unwrap_or_default();
            store.add_task(&[
                ("comment", comment),
                ("status", status),
                ("command", command),
                ("group", &group_text),
            ]).unwrap();
        }
        store.persist().unwrap();

        let reopened = TaskStore::open(&path).unwrap();
        prop_assert_eq!(reopened.len(), rows.len());
        for rownum in 0..rows.len() {
            prop_assert_eq!(reopened.get(rownum), store.get(rownum));
        }
    }

    #[test]
    fn status_round_trips_through_its_canonical_spelling(status in status_name()) {
        let parsed: Status = status.parse().unwrap();
        prop_assert_eq!(parsed.as_str().parse::<Status>().unwrap(), parsed);
    }
}
