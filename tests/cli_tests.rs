#![cfg(feature = "cli")]

use assert_cmd::Command;
use predicates::str::contains as str_contains;
use tempfile::NamedTempFile;

#[allow(deprecated)]
fn run_cli(script: &str) -> assert_cmd::assert::Assert {
    let mut cmd = Command::cargo_bin("cli").expect("cli binary");
    cmd.env_remove("TIMETABLE_WATCHED_TABLES")
        .env_remove("TIMETABLE_SYNC_INTERVAL_SECS")
        .write_stdin(script.to_string())
        .assert()
}

#[test]
fn cli_rejects_double_booking_with_reason() {
    run_cli("add 7A T math 1 08:00 10:00 R1\nadd 7B U art Mon 09:00 11:00 R1\nquit\n")
        .success()
        .stdout(str_contains("Slot 1 created."))
        .stdout(str_contains("Rejected: slot conflicts with existing slot(s) 1"));
}

#[test]
fn cli_accepts_adjacent_slots() {
    run_cli("add 7A T math 1 08:00 10:00\nadd 7B T math 1 10:00 11:00\nquit\n")
        .success()
        .stdout(str_contains("Slot 2 created."));
}

#[test]
fn cli_reports_validation_errors() {
    run_cli("add 7A T math 2 11:00 10:00\nadd 7A T math 6 08:00 09:00\nadd 7A T math 2 8am 09:00\nquit\n")
        .success()
        .stdout(str_contains("Invalid: invalid slot: slot start time 11:00 must be before end time 10:00"))
        .stdout(str_contains("day of week must be 1 (Monday) through 5 (Friday)"))
        .stdout(str_contains("time must be formatted as HH:MM"));
}

#[test]
fn cli_check_honours_exclusion_and_delete_frees_the_slot() {
    run_cli(
        "add 7A T math 1 08:00 10:00 R1\ncheck T 1 09:00 09:30\ncheck T 1 09:00 09:30 - 1\ndelete 1\ndelete 1\nquit\n",
    )
    .success()
    .stdout(str_contains("Conflicts with 1 slot(s):"))
    .stdout(str_contains("No conflicts."))
    .stdout(str_contains("Deleted slot 1."))
    .stdout(str_contains("Error: slot 1 not found"));
}

#[test]
fn cli_move_reschedules_a_slot() {
    run_cli("add 7A T math 1 08:00 09:00\nmove 1 Fri 13:00 14:00\nshow\nquit\n")
        .success()
        .stdout(str_contains("Slot 1 moved."))
        .stdout(str_contains("| Fri"))
        .stdout(str_contains("13:00"));
}

#[test]
fn cli_save_and_load_json_round_trip() {
    let tmp = NamedTempFile::new().expect("create temp file");
    let path = tmp.path().to_string_lossy().to_string();
    let script = format!(
        "add 7A Persisted math 1 08:00 09:00\nsave json {path}\nadd 7B Temporary math 2 08:00 09:00\nload json {path}\nshow\nquit\n"
    );
    let assert = run_cli(&script).success();
    let output = String::from_utf8_lossy(&assert.get_output().stdout);
    assert!(output.contains("Timetable loaded from"));
    let after_reload = output
        .split("Timetable loaded from")
        .last()
        .unwrap_or_default();
    assert!(after_reload.contains("Persisted"));
    assert!(
        !after_reload.contains("Temporary"),
        "temporary slot should not appear after reload:\n{after_reload}"
    );
}

#[test]
fn cli_save_and_load_csv_round_trip() {
    let tmp = NamedTempFile::new().expect("create temp file");
    let path = tmp.path().to_string_lossy().to_string();
    let script = format!("add 7A T math 3 08:00 09:00 R4\nsave csv {path}\nload csv {path}\nshow\nquit\n");
    run_cli(&script)
        .success()
        .stdout(str_contains("Timetable saved to"))
        .stdout(str_contains("Timetable loaded from"))
        .stdout(str_contains("R4"));
}
