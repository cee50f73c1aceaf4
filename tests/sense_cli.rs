use std::process::Command;

use serde_json::Value;

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_sense_cli"))
}

#[test]
fn categories_outputs_table_json() {
    let output = cli().arg("categories").output().expect("categories command");

    assert!(
        output.status.success(),
        "categories exited with {:?}",
        output.status.code()
    );
    let report: Value = serde_json::from_slice(&output.stdout).expect("categories JSON");

    let categories = report["categories"].as_array().expect("categories array");
    assert_eq!(categories.len(), 3);
    assert_eq!(categories[0]["category"], "critical");
    assert_eq!(categories[0]["classes"][0]["index"], 394);
    assert_eq!(categories[0]["classes"][0]["label"], "Fire alarm");

    let sensitivity = report["sensitivity"].as_array().expect("sensitivity array");
    assert_eq!(sensitivity.len(), 5);
    assert_eq!(sensitivity[2]["level"], "medium");
    assert!((sensitivity[2]["threshold"].as_f64().unwrap() - 0.4).abs() < 1e-6);
}

#[test]
fn simulate_prints_event_lines() {
    let output = cli()
        .args([
            "simulate",
            "--seconds",
            "1",
            "--min-interval-ms",
            "20",
            "--max-interval-ms",
            "60",
        ])
        .output()
        .expect("simulate command");

    assert!(
        output.status.success(),
        "simulate exited with {:?}",
        output.status.code()
    );
    let stdout = String::from_utf8(output.stdout).expect("stdout utf8");
    let events: Vec<Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("event JSON line"))
        .collect();
    assert!(!events.is_empty(), "expected demo events, got {stdout}");
    for event in events {
        assert!(event["id"].as_str().is_some_and(|id| id.len() == 36));
        assert!(["critical", "warning"].contains(&event["category"].as_str().unwrap()));
    }
}

#[test]
fn classify_rejects_missing_model() {
    let wav_path =
        std::env::temp_dir().join(format!("sense-cli-tone-{}.wav", std::process::id()));
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&wav_path, spec).expect("create wav");
    for n in 0..16_000u32 {
        let t = n as f32 / 16_000.0;
        let sample = (t * 440.0 * std::f32::consts::TAU).sin() * 8_000.0;
        writer.write_sample(sample as i16).expect("write sample");
    }
    writer.finalize().expect("finalize wav");

    let output = cli()
        .args([
            "classify",
            "--wav",
            wav_path.to_str().unwrap(),
            "--model",
            "/nonexistent/yamnet.onnx",
        ])
        .output()
        .expect("classify command");
    let _ = std::fs::remove_file(&wav_path);

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).expect("stderr utf8");
    assert!(stderr.contains("could not be loaded"), "unexpected stderr: {stderr}");
}

#[test]
fn classify_rejects_unknown_sensitivity() {
    let output = cli()
        .args([
            "classify",
            "--wav",
            "missing.wav",
            "--model",
            "missing.onnx",
            "--sensitivity",
            "extreme",
        ])
        .output()
        .expect("classify command");

    assert!(!output.status.success());
}
