mod support;

use predicates::prelude::*;

use support::{TITLE, TITLE_DIR, spawn_site, write_provider};

#[test]
fn repair_on_empty_data_dir_reports_nothing() {
    let temp = tempfile::TempDir::new().expect("tempdir");
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("manga-sync");
    cmd.arg("repair")
        .arg("--data-dir")
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""entries_updated": 0"#))
        .stdout(predicate::str::contains(r#""pages_fixed": 0"#));
}

#[test]
fn rust_log_debug_emits_debug_line_to_stderr() {
    let temp = tempfile::TempDir::new().expect("tempdir");
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("manga-sync");
    cmd.env("RUST_LOG", "debug")
        .arg("repair")
        .arg("--data-dir")
        .arg(temp.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("parsed cli"));
}

#[test]
fn unknown_provider_fails() {
    let temp = tempfile::TempDir::new().expect("tempdir");
    let providers = temp.path().join("providers");
    write_provider(&providers, "https://unused.example");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("manga-sync");
    cmd.args(["sync", "--provider", "missing", "--url", "/manga/x/"])
        .arg("--data-dir")
        .arg(temp.path().join("data"))
        .arg("--providers-dir")
        .arg(&providers)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown provider: missing"));
}

#[test]
fn sync_prints_entry_with_scraped_pages() {
    let site = spawn_site();
    let temp = tempfile::TempDir::new().expect("tempdir");
    let providers = temp.path().join("providers");
    write_provider(&providers, &site.base_url);
    let images = temp.path().join("images");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("manga-sync");
    let output = cmd
        .args(["sync", "--provider", "testsite", "--url", "/manga/omniscient/"])
        .arg("--data-dir")
        .arg(temp.path().join("data"))
        .arg("--providers-dir")
        .arg(&providers)
        .arg("--image-dir")
        .arg(&images)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let entry: serde_json::Value = serde_json::from_slice(&output).expect("entry json");
    assert_eq!(entry["title"], TITLE);
    assert_eq!(entry["chapters"][0]["pages"].as_array().map(Vec::len), Some(2));
    assert_eq!(entry["chapters"][1]["pages"].as_array().map(Vec::len), Some(1));
    assert!(images.join(TITLE_DIR).join("2").join("1.webp").exists());
}

#[test]
fn sync_without_pages_schedules_nothing() {
    let site = spawn_site();
    let temp = tempfile::TempDir::new().expect("tempdir");
    let providers = temp.path().join("providers");
    write_provider(&providers, &site.base_url);

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("manga-sync");
    cmd.args([
        "sync",
        "--provider",
        "testsite",
        "--url",
        "/manga/omniscient/",
        "--no-pages",
    ])
    .arg("--data-dir")
    .arg(temp.path().join("data"))
    .arg("--providers-dir")
    .arg(&providers)
    .assert()
    .success()
    .stdout(predicate::str::contains(r#""pages": []"#));
}
