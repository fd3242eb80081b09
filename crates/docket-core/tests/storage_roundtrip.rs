use std::fs;

use chrono::NaiveDate;
use docket_core::storage::{FileStorage, KeyValueStore, TASKS_KEY, load_tasks, save_tasks};
use docket_core::task::{Task, TaskId, TaskKind};
use tempfile::tempdir;

fn sample(id: u64, text: &str, kind: TaskKind, hour: Option<u32>) -> Task {
    let day = NaiveDate::from_ymd_opt(2024, 1, 5).expect("valid date");
    let start = hour.and_then(|h| day.and_hms_opt(h, 0, 0));
    Task {
        id: TaskId(id),
        text: text.to_string(),
        kind,
        start_time: start,
        end_time: start.map(|s| s + chrono::Duration::minutes(30)),
        completed: id % 2 == 0,
        added_date: day,
    }
}

#[test]
fn collections_reload_field_for_field() {
    let temp = tempdir().expect("tempdir");
    let storage = FileStorage::open(temp.path()).expect("open storage");

    let cases = vec![
        vec![],
        vec![sample(1, "Pay rent", TaskKind::Task, Some(9))],
        vec![
            sample(1, "Pay rent", TaskKind::Task, Some(9)),
            sample(2, "Call mum", TaskKind::Reminder, Some(18)),
            sample(3, "Someday: learn Ωmega", TaskKind::Task, None),
        ],
    ];

    for tasks in cases {
        save_tasks(&storage, &tasks).expect("save");
        let reloaded = load_tasks(&storage).expect("load");
        assert_eq!(reloaded, tasks);
    }
}

#[test]
fn corrupt_file_loads_as_empty_and_is_replaced_on_save() {
    let temp = tempdir().expect("tempdir");
    let storage = FileStorage::open(temp.path()).expect("open storage");
    fs::write(storage.path_for(TASKS_KEY), "{ not json").expect("write corrupt file");

    assert!(load_tasks(&storage).expect("load").is_empty());

    let tasks = vec![sample(7, "Water plants", TaskKind::Reminder, Some(7))];
    save_tasks(&storage, &tasks).expect("save");
    let raw = storage.read(TASKS_KEY).expect("read").expect("present");
    assert!(raw.contains("\"type\":\"reminder\""));
    assert_eq!(load_tasks(&storage).expect("reload"), tasks);
}
