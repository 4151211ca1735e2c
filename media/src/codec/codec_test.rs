use std::f32::consts::PI;

use crate::codec::{g711, AudioCodec, CodecConfig, CodecKind, CodecState};
use crate::error::Error;
use crate::FrameClass;

fn pcmu_config() -> CodecConfig {
    CodecConfig {
        kind: CodecKind::Pcmu,
        sample_rate: 8_000,
        ..Default::default()
    }
}

fn voice_frame(len: usize, amp: f32) -> Vec<i16> {
    (0..len)
        .map(|i| (amp * (2.0 * PI * i as f32 / 80.0).sin()) as i16)
        .collect()
}

#[test]
fn test_payload_type_mapping() {
    assert_eq!(CodecKind::from_payload_type(0), Some(CodecKind::Pcmu));
    assert_eq!(CodecKind::from_payload_type(8), Some(CodecKind::Pcma));
    assert_eq!(CodecKind::from_payload_type(111), Some(CodecKind::Opus));
    assert_eq!(CodecKind::from_payload_type(9), None, "G.722 is not decoded");
    assert_eq!(CodecKind::from_payload_type(13), None);
}

#[test]
fn test_g711_requires_8khz_mono() {
    let mut config = pcmu_config();
    config.sample_rate = 16_000;
    assert_eq!(
        AudioCodec::new(&config).err(),
        Some(Error::ErrUnsupportedSampleRate(16_000))
    );

    let mut config = pcmu_config();
    config.channels = 2;
    assert_eq!(
        AudioCodec::new(&config).err(),
        Some(Error::ErrUnsupportedChannels(2))
    );
}

#[test]
fn test_pcmu_decode_roundtrip() {
    let mut codec = AudioCodec::new(&pcmu_config()).unwrap();
    assert_eq!(codec.state(), CodecState::Ready);
    assert_eq!(codec.frame_size(), 160);

    let pcm = voice_frame(160, 12_000.0);
    let mut payload = vec![0u8; 160];
    g711::encode_ulaw(&pcm, &mut payload);

    let mut out = [0i16; 160];
    let (n, class) = codec.decode(&payload, &mut out).unwrap();
    assert_eq!(n, 160);
    assert_eq!(class, FrameClass::Voice);
    for i in 0..160 {
        assert!(
            (out[i] as i32 - pcm[i] as i32).abs() <= pcm[i].abs() as i32 * 3 / 100 + 8,
            "sample {i}: {} vs {}",
            out[i],
            pcm[i]
        );
    }
}

#[test]
fn test_empty_payload_decodes_as_dtx_silence() {
    let mut codec = AudioCodec::new(&pcmu_config()).unwrap();
    let mut out = [i16::MAX; 160];
    let (n, class) = codec.decode(&[], &mut out).unwrap();
    assert_eq!(n, 160);
    assert_eq!(class, FrameClass::Dtx);
    assert!(out.iter().all(|&s| s == 0));
}

#[test]
fn test_encode_suppresses_silent_frames() {
    let mut codec = AudioCodec::new(&pcmu_config()).unwrap();
    let silence = vec![0i16; 160];
    let mut out = [0u8; 160];
    let (n, class) = codec.encode(&silence, &mut out, 0.0).unwrap();
    assert_eq!(n, 0, "DTX frames produce no payload");
    assert_eq!(class, FrameClass::Dtx);

    let speech = voice_frame(160, 12_000.0);
    let (n, class) = codec.encode(&speech, &mut out, 0.0).unwrap();
    assert_eq!(n, 160);
    assert_eq!(class, FrameClass::Voice);
}

#[test]
fn test_g711_bitrate_is_fixed() {
    let mut codec = AudioCodec::new(&pcmu_config()).unwrap();
    assert_eq!(codec.current_bitrate_bps(), 64_000);
    assert!(!codec.supports_inband_fec());

    codec.update_loss_feedback(0.9).unwrap();
    assert_eq!(codec.current_bitrate_bps(), 64_000);
}

#[test]
fn test_loss_feedback_steps_bitrate_without_encoding() {
    let mut codec = AudioCodec::new(&CodecConfig::default()).unwrap();
    let start = codec.current_bitrate_bps();

    for _ in 0..5 {
        codec.update_loss_feedback(0.5).unwrap();
    }
    assert_eq!(codec.current_bitrate_bps(), start - 5_000);

    for _ in 0..3 {
        codec.update_loss_feedback(0.0).unwrap();
    }
    assert_eq!(codec.current_bitrate_bps(), start - 2_000);
}

#[test]
fn test_fec_decode_rejected_without_fec_codec() {
    let mut codec = AudioCodec::new(&pcmu_config()).unwrap();
    let mut out = [0i16; 160];
    assert_eq!(
        codec.decode_fec(&[0u8; 160], &mut out).err(),
        Some(Error::ErrFecUnsupported)
    );
}

#[test]
fn test_close_releases_codec() {
    let mut codec = AudioCodec::new(&pcmu_config()).unwrap();
    codec.close();
    assert_eq!(codec.state(), CodecState::Uninitialized);

    let mut out = [0i16; 160];
    assert_eq!(
        codec.decode(&[0u8; 160], &mut out).err(),
        Some(Error::ErrCodecNotReady("uninitialized"))
    );
}

#[test]
fn test_short_output_buffer_rejected() {
    let mut codec = AudioCodec::new(&pcmu_config()).unwrap();
    let mut out = [0i16; 80];
    assert_eq!(
        codec.decode(&[0u8; 160], &mut out).err(),
        Some(Error::ErrBufferTooSmall { need: 160, got: 80 })
    );
}

#[test]
fn test_opus_roundtrip_and_plc() {
    let config = CodecConfig::default();
    let mut codec = AudioCodec::new(&config).unwrap();
    assert_eq!(codec.frame_size(), 960);
    assert!(codec.supports_inband_fec());

    let pcm = voice_frame(960, 12_000.0);
    let mut packet = vec![0u8; 1500];
    let (len, class) = codec.encode(&pcm, &mut packet, 0.0).unwrap();
    assert!(len > 0);
    assert_eq!(class, FrameClass::Voice);

    let mut out = vec![0i16; 960];
    let (n, _) = codec.decode(&packet[..len], &mut out).unwrap();
    assert_eq!(n, 960);

    // Codec-internal concealment keeps producing full frames.
    let n = codec.conceal(&mut out).unwrap();
    assert_eq!(n, 960);
}

#[test]
fn test_opus_bitrate_adapts_to_loss() {
    let config = CodecConfig::default();
    let mut codec = AudioCodec::new(&config).unwrap();
    let start = codec.current_bitrate_bps();

    let pcm = voice_frame(960, 12_000.0);
    let mut packet = vec![0u8; 1500];
    for _ in 0..5 {
        codec.encode(&pcm, &mut packet, 0.5).unwrap();
    }
    assert!(
        codec.current_bitrate_bps() < start,
        "sustained loss must push the bitrate down"
    );
}
