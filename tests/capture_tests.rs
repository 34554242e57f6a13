// Tests for the capture path: PCM encoding, volume estimate, WAV-backed microphone

use base64::Engine;
use kiosk_voice::audio::capture::{self, encode_frame, encode_pcm16, rms};
use kiosk_voice::audio::{AudioFrame, CaptureBackend, DeviceConfig, FileCapture, VolumeLevel};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for s in samples {
        writer.write_sample(*s).unwrap();
    }
    writer.finalize().unwrap();
}

fn small_frames() -> DeviceConfig {
    DeviceConfig {
        input_sample_rate: 16000,
        output_sample_rate: 24000,
        frame_size: 1600,
    }
}

#[test]
fn test_pcm16_scaling_and_saturation() {
    let bytes = encode_pcm16(&[0.0, 0.5, -0.5, 1.0, -1.0, 3.0, -7.0]);
    let values: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();

    assert_eq!(values, vec![0, 16384, -16384, 32767, -32768, 32767, -32768]);
}

#[test]
fn test_encoded_frame_blob() {
    let frame = AudioFrame::new(vec![0.5; 4], 16000);
    let blob = encode_frame(&frame);

    assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&blob.data)
        .unwrap();
    assert_eq!(bytes.len(), 8);
}

#[test]
fn test_volume_smoothing_stays_in_range() {
    let volume = VolumeLevel::new();
    assert_eq!(volume.get(), 0.0);

    let first = volume.fold(0.1);
    assert!((first - 0.2).abs() < 1e-6);

    let second = volume.fold(0.1);
    assert!((second - (0.2 * 0.8 + 0.2)).abs() < 1e-6);

    for _ in 0..10 {
        volume.fold(1.0);
    }
    assert_eq!(volume.get(), 1.0);

    volume.reset();
    assert_eq!(volume.get(), 0.0);
}

#[test]
fn test_rms() {
    assert_eq!(rms(&[]), 0.0);
    assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
}

#[test]
fn test_file_capture_resamples_to_frames() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stereo48k.wav");

    // One second of 48 kHz stereo -> 16000 mono samples -> 10 frames of 1600
    let samples = vec![1000i16; 48000 * 2];
    write_wav(&path, 48000, 2, &samples);

    let capture = FileCapture::open(&path, &small_frames()).unwrap();
    assert_eq!(capture.frame_count(), 10);
}

#[test]
fn test_file_capture_converts_non_integer_rates() {
    let dir = TempDir::new().unwrap();

    // One second of audio is 16000 capture-rate samples whatever the file rate
    for rate in [44100u32, 22050, 24000] {
        let path = dir.path().join(format!("mono{}.wav", rate));
        write_wav(&path, rate, 1, &vec![1000i16; rate as usize]);

        let capture = FileCapture::open(&path, &small_frames()).unwrap();
        assert_eq!(capture.frame_count(), 10, "{} Hz input", rate);
    }
}

#[test]
fn test_file_capture_rejects_missing_file() {
    let dir = TempDir::new().unwrap();
    assert!(FileCapture::open(dir.path().join("nope.wav"), &small_frames()).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_forwards_frames_and_tracks_volume() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("voice.wav");
    write_wav(&path, 16000, 1, &vec![8000i16; 16000]);

    let backend = FileCapture::open(&path, &small_frames()).unwrap();
    let volume = Arc::new(VolumeLevel::new());
    let (tx, mut rx) = mpsc::channel(64);

    let handle = capture::start(Box::new(backend), Arc::clone(&volume), tx)
        .await
        .unwrap();

    let mut received = 0;
    while received < 3 {
        let blob = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
        received += 1;
    }
    assert!(volume.get() > 0.0);

    handle.stop().await;
    assert_eq!(volume.get(), 0.0);
}

#[tokio::test]
async fn test_file_capture_stop_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("short.wav");
    write_wav(&path, 16000, 1, &vec![0i16; 3200]);

    let mut backend = FileCapture::open(&path, &small_frames()).unwrap();
    let _rx = backend.start().await.unwrap();
    assert!(backend.start().await.is_err());

    backend.stop().await.unwrap();
    backend.stop().await.unwrap();
    assert!(!backend.is_capturing());
}
