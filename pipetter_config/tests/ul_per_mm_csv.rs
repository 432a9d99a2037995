use std::fs::File;
use std::io::Write;

use pipetter_config::load_ul_per_mm_csv;
use rstest::rstest;
use tempfile::tempdir;

fn write_csv(body: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ul_per_mm.csv");
    let mut f = File::create(&path).unwrap();
    f.write_all(body.as_bytes()).unwrap();
    (dir, path)
}

#[rstest]
fn loads_ordered_rows() {
    let (_d, path) = write_csv("ceiling,slope,intercept\n10.0,0.2,16.0\n300.0,0.001,18.65\n");
    let rows = load_ul_per_mm_csv(&path).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].ceiling_ul, 10.0);
    assert!((rows[1].intercept - 18.65).abs() < 1e-12);
}

#[rstest]
#[case("ul,slope,intercept\n10.0,0.2,16.0\n", "must have headers")]
#[case("ceiling,slope,intercept\n10.0,0.2,16.0\n5.0,0.1,1.0\n", "strictly increasing")]
#[case("ceiling,slope,intercept\n10.0,abc,16.0\n", "invalid csv row 2")]
#[case("ceiling,slope,intercept\n", "at least one row")]
fn rejects_bad_tables(#[case] body: &str, #[case] needle: &str) {
    let (_d, path) = write_csv(body);
    let err = load_ul_per_mm_csv(&path).unwrap_err();
    assert!(
        err.to_string().to_lowercase().contains(needle),
        "unexpected error: {err}"
    );
}

#[rstest]
fn missing_file_reports_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nope.csv");
    let err = load_ul_per_mm_csv(&path).unwrap_err();
    assert!(err.to_string().contains("open ul-per-mm CSV"));
}
