//! File-to-file runs of the library entry point and the binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use spike_binner::reader::load_tensor;
use spike_binner::{process, BinningConfig, InputPaths, Label, SpikeBinError};
use tempfile::TempDir;

const STEM: &str = "2025-07-23T13-03-09_slamdunk_B-00068";

/// Writes the three inputs of a small session and returns their paths.
fn write_session(dir: &Path, spike_rows: &[&str], markers: &[f64], durations: &[u32]) -> InputPaths {
    let spikes = dir.join(format!("{STEM}.txt"));
    let mut text = String::from("Spike times exported 2025-07-23\nChannel,Unit,Timestamp\n");
    for row in spike_rows {
        text.push_str(row);
        text.push('\n');
    }
    fs::write(&spikes, text).unwrap();

    let sync = dir.join(format!("{STEM}_synctones.csv"));
    let mut text = String::from("synctone_s\n");
    for m in markers {
        text.push_str(&format!("{m}\n"));
    }
    fs::write(&sync, text).unwrap();

    let stims = dir.join(format!("{STEM}.stims.json"));
    let mut records = vec![r#"{ "name": "start" }"#.to_string()];
    for (i, d) in durations.iter().enumerate() {
        let color = if i % 2 == 0 { "white" } else { "black" };
        records.push(format!(r#"{{ "durationMs": {d}, "bgColor": "{color}" }}"#));
    }
    fs::write(&stims, format!(r#"{{ "stimuli": [{}] }}"#, records.join(","))).unwrap();

    InputPaths::new(spikes, sync, stims)
}

fn output_dir(tmp: &TempDir) -> PathBuf {
    let out = tmp.path().join("out");
    fs::create_dir(&out).unwrap();
    out
}

#[test]
fn single_stimulus_example() {
    let tmp = TempDir::new().unwrap();
    let inputs = write_session(tmp.path(), &["5,1,2.01", "5,1,2.30"], &[2.0], &[100]);
    let out = output_dir(&tmp);

    let result = process(&inputs, &BinningConfig::default(), Some(&out)).unwrap();

    let binned = &result.binned;
    assert_eq!(binned.tensor.shape(), &[1, 5, 1, 1]);
    let c = binned.channel_index(&Label::Int(5)).unwrap();
    let u = binned.unit_index(&Label::Int(1)).unwrap();
    assert_eq!(binned.tensor[[0, 0, c, u]], 1);
    assert_eq!(binned.metadata.total_spikes, 1);

    assert_eq!(result.paths.array, out.join(format!("{STEM}_4d.npz")));
    assert_eq!(result.paths.metadata, out.join(format!("{STEM}_metadata.npz")));
    let reloaded = load_tensor(&result.paths.array).unwrap();
    assert_eq!(reloaded, binned.tensor);
    assert!(result.paths.metadata.exists());
}

#[test]
fn mixed_units_and_several_stimuli() {
    let tmp = TempDir::new().unwrap();
    let rows = [
        "21,noise,0.999",
        "21,1,1.000",
        "3,2,1.045",
        "3,2,1.046",
        "21,1,2.079",
        "3,noise,2.100",
        "40,1,9.0",
    ];
    let inputs = write_session(tmp.path(), &rows, &[1.0, 2.0], &[60, 100]);
    let out = output_dir(&tmp);

    let binned = process(&inputs, &BinningConfig::default(), Some(&out))
        .unwrap()
        .binned;

    assert_eq!(binned.channels, vec![Label::Int(3), Label::Int(21), Label::Int(40)]);
    assert_eq!(
        binned.units,
        vec![Label::Int(1), Label::Int(2), Label::from("noise")]
    );
    assert_eq!(binned.tensor.shape(), &[2, 5, 3, 3]);

    // Stimulus 1: [1.0, 1.06)
    assert_eq!(binned.tensor[[0, 0, 1, 0]], 1);
    assert_eq!(binned.tensor[[0, 2, 0, 1]], 2);
    // Stimulus 2: [2.0, 2.1); the spike at exactly 2.1 is outside
    assert_eq!(binned.tensor[[1, 3, 1, 0]], 1);

    assert_eq!(binned.metadata.total_spikes, 4);
    assert_eq!(binned.metadata.dropped_spikes, 3);
    assert_eq!(binned.metadata.stimulus_durations_ms, vec![60.0, 100.0]);
}

#[test]
fn mismatched_markers_write_nothing() {
    let tmp = TempDir::new().unwrap();
    let inputs = write_session(tmp.path(), &["1,1,0.5"], &[0.0, 1.0, 2.0], &[100, 100]);
    let out = output_dir(&tmp);

    let err = process(&inputs, &BinningConfig::default(), Some(&out)).unwrap_err();
    assert!(matches!(err, SpikeBinError::MarkerCountMismatch { markers: 3, descriptors: 3 }));
    assert!(err.is_precheck());
    assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
}

#[test]
fn missing_input_is_a_precheck_error() {
    let tmp = TempDir::new().unwrap();
    let mut inputs = write_session(tmp.path(), &[], &[1.0], &[100]);
    inputs.sync_markers = tmp.path().join("absent.csv");

    let err = process(&inputs, &BinningConfig::default(), Some(tmp.path())).unwrap_err();
    match err {
        SpikeBinError::MissingInput(path) => assert!(path.ends_with("absent.csv")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn empty_spike_file_gives_zero_tensor() {
    let tmp = TempDir::new().unwrap();
    let inputs = write_session(tmp.path(), &[], &[1.0, 2.0], &[100, 40]);
    let out = output_dir(&tmp);

    let result = process(&inputs, &BinningConfig::default(), Some(&out)).unwrap();
    assert_eq!(result.binned.tensor.shape(), &[2, 5, 0, 0]);
    assert_eq!(result.binned.metadata.total_spikes, 0);
    assert!(result.paths.array.exists());
}

#[test]
fn binary_writes_outputs() {
    let tmp = TempDir::new().unwrap();
    let inputs = write_session(tmp.path(), &["5,1,2.01", "5,1,2.30"], &[2.0], &[100]);
    let out = output_dir(&tmp);

    let output = Command::new(env!("CARGO_BIN_EXE_spike_binner"))
        .arg(&inputs.spikes)
        .arg(&inputs.sync_markers)
        .arg(&inputs.stimuli)
        .arg("--output-dir")
        .arg(&out)
        .arg("--print-metadata")
        .arg("--log-level")
        .arg("warn")
        .output()
        .unwrap();

    assert!(output.status.success());
    let metadata: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(metadata["total_spikes"], 1);
    assert_eq!(metadata["shape"], serde_json::json!([1, 5, 1, 1]));
    assert!(out.join(format!("{STEM}_4d.npz")).exists());
    assert!(out.join(format!("{STEM}_metadata.npz")).exists());
}

#[test]
fn binary_rejects_wrong_argument_count() {
    let output = Command::new(env!("CARGO_BIN_EXE_spike_binner"))
        .arg("only-one.txt")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage"));
}

#[test]
fn binary_fails_on_missing_file() {
    let tmp = TempDir::new().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_spike_binner"))
        .arg(tmp.path().join("a.txt"))
        .arg(tmp.path().join("b.csv"))
        .arg(tmp.path().join("c.json"))
        .arg("--output-dir")
        .arg(tmp.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
}
