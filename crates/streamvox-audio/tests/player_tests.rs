//! Stream player integration tests using the in-memory sink.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use streamvox_audio::{
    AudioBuffer, AudioConfiguration, MemorySink, PlayerCallbacks, StreamPlayer, TimingInfo,
};
use streamvox_foundation::PlayerError;

fn make_player() -> (StreamPlayer, Arc<AudioBuffer>, Arc<AtomicU64>) {
    let config = AudioConfiguration::default();
    let buffer = Arc::new(AudioBuffer::new(&config, 2.0));
    let (factory, frames) = MemorySink::factory(config.sample_rate);
    let player = StreamPlayer::new(buffer.clone(), config, factory);
    (player, buffer, frames)
}

fn wait_until(deadline: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

#[test]
fn plays_queued_chunks_and_counts_bytes() {
    let (player, buffer, frames) = make_player();
    player.start().unwrap();

    buffer.put_pcm(vec![1u8; 640]).unwrap();
    buffer.put_pcm(vec![2u8; 640]).unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        player.stats().bytes_played == 1280
    }));
    assert_eq!(player.stats().chunks_played, 2);
    // 1280 bytes of 16-bit mono = 640 frames through the sink
    assert_eq!(frames.load(Ordering::SeqCst), 640);

    player.stop().unwrap();
}

#[test]
fn start_is_exclusive_and_stop_requires_session() {
    let (player, _buffer, _frames) = make_player();
    assert!(matches!(player.stop(), Err(PlayerError::NotPlaying)));
    player.start().unwrap();
    assert!(matches!(player.start(), Err(PlayerError::AlreadyPlaying)));
    player.stop().unwrap();
    assert!(matches!(player.stop(), Err(PlayerError::NotPlaying)));
}

#[test]
fn lifecycle_callbacks_fire_once_per_session() {
    let (player, _buffer, _frames) = make_player();
    let starts = Arc::new(AtomicU64::new(0));
    let stops = Arc::new(AtomicU64::new(0));
    let starts_cb = starts.clone();
    let stops_cb = stops.clone();
    player.set_callbacks(PlayerCallbacks {
        on_playback_start: Some(Arc::new(move || {
            starts_cb.fetch_add(1, Ordering::SeqCst);
        })),
        on_playback_stop: Some(Arc::new(move || {
            stops_cb.fetch_add(1, Ordering::SeqCst);
        })),
        ..Default::default()
    });

    player.start().unwrap();
    player.stop().unwrap();
    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

#[test]
fn pause_freezes_byte_count_until_resume() {
    let (player, buffer, _frames) = make_player();
    player.start().unwrap();

    buffer.put_pcm(vec![0u8; 320]).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        player.stats().bytes_played > 0
    }));

    player.pause().unwrap();
    assert!(player.is_paused());
    // Give the worker time to park, then queue more audio.
    std::thread::sleep(Duration::from_millis(250));
    buffer.put_pcm(vec![0u8; 320]).unwrap();

    let frozen = player.stats().bytes_played;
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(player.stats().bytes_played, frozen);

    player.resume().unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        player.stats().bytes_played > frozen
    }));

    player.stop().unwrap();
}

#[test]
fn pause_and_resume_preconditions() {
    let (player, _buffer, _frames) = make_player();
    assert!(matches!(player.pause(), Err(PlayerError::NotPlaying)));
    player.start().unwrap();
    assert!(matches!(player.resume(), Err(PlayerError::NotPaused)));
    player.pause().unwrap();
    assert!(matches!(player.pause(), Err(PlayerError::AlreadyPaused)));
    player.resume().unwrap();
    player.stop().unwrap();
}

#[test]
fn muted_playback_still_accounts_bytes() {
    let (player, buffer, frames) = make_player();
    player.mute();
    player.start().unwrap();

    buffer.put_pcm(vec![0x7Fu8; 640]).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        player.stats().bytes_played == 640
    }));
    // Frames still reach the sink (as silence) so pacing is unchanged.
    assert_eq!(frames.load(Ordering::SeqCst), 320);

    player.stop().unwrap();
}

#[test]
fn restart_resets_counters() {
    let (player, buffer, _frames) = make_player();
    player.start().unwrap();
    buffer.put_pcm(vec![0u8; 320]).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        player.stats().bytes_played > 0
    }));
    player.stop().unwrap();

    player.start().unwrap();
    assert_eq!(player.stats().bytes_played, 0);
    assert_eq!(player.stats().chunks_played, 0);
    player.stop().unwrap();
}

#[test]
fn stop_clears_buffer() {
    let (player, buffer, _frames) = make_player();
    player.start().unwrap();
    player.pause().unwrap();
    std::thread::sleep(Duration::from_millis(250));
    buffer.put_pcm(vec![0u8; 640]).unwrap();
    assert!(buffer.total_samples() > 0);

    player.stop().unwrap();
    assert_eq!(buffer.total_samples(), 0);
    assert_eq!(buffer.stats().audio_queue_len, 0);
}

#[test]
fn word_timings_reach_on_word_in_order() {
    let (player, buffer, _frames) = make_player();
    let words: Arc<parking_lot::Mutex<Vec<String>>> = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let words_cb = words.clone();
    player.set_callbacks(PlayerCallbacks {
        on_word: Some(Arc::new(move |timing: &TimingInfo| {
            words_cb.lock().push(timing.word.clone());
        })),
        ..Default::default()
    });
    player.start().unwrap();

    buffer
        .put_timing(TimingInfo::new(
            "hello",
            Duration::ZERO,
            Duration::from_millis(300),
        ))
        .unwrap();
    buffer
        .put_timing(TimingInfo::new(
            "world",
            Duration::from_millis(300),
            Duration::from_millis(600),
        ))
        .unwrap();
    buffer.put_pcm(vec![0u8; 320]).unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        player.stats().words_played == 2
    }));
    assert_eq!(*words.lock(), vec!["hello".to_string(), "world".to_string()]);

    player.stop().unwrap();
}

#[test]
fn drain_detection_completes_after_quiet_window() {
    let (player, buffer, _frames) = make_player();
    player.start().unwrap();
    buffer.put_pcm(vec![0u8; 320]).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        player.stats().bytes_played > 0
    }));

    let start = Instant::now();
    player
        .wait_for_playback_complete_with(
            Duration::from_secs(10),
            Duration::from_millis(300),
            Duration::from_millis(100),
        )
        .unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(5));

    player.stop().unwrap();
}

#[test]
fn drain_detection_times_out_while_audio_keeps_flowing() {
    let (player, buffer, _frames) = make_player();
    player.start().unwrap();

    let feeder = {
        let buffer = buffer.clone();
        std::thread::spawn(move || {
            for _ in 0..40 {
                if buffer.put_pcm(vec![0u8; 64]).is_err() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(25));
            }
        })
    };

    let result = player.wait_for_playback_complete_with(
        Duration::from_millis(400),
        Duration::from_millis(300),
        Duration::from_millis(100),
    );
    assert!(matches!(result, Err(PlayerError::DrainTimeout { .. })));

    feeder.join().unwrap();
    player.stop().unwrap();
}

#[test]
fn volume_validation() {
    let (player, _buffer, _frames) = make_player();
    assert!(player.set_volume(0.5).is_ok());
    assert_eq!(player.volume(), 0.5);
    assert!(player.set_volume(1.5).is_err());
    assert_eq!(player.volume(), 0.5);
}

#[test]
fn wav_tap_mirrors_played_audio() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mirror.wav");

    let config = AudioConfiguration::default();
    let buffer = Arc::new(AudioBuffer::new(&config, 2.0));
    let (factory, _frames) = MemorySink::factory(config.sample_rate);
    let player = StreamPlayer::new(buffer.clone(), config, factory).with_wav_tap(Some(path.clone()));

    player.start().unwrap();
    let pcm: Vec<u8> = (0..160u16).flat_map(|i| (i as i16).to_le_bytes()).collect();
    buffer.put_pcm(pcm).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        player.stats().bytes_played == 320
    }));
    player.stop().unwrap();

    let reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.spec().sample_rate, 16_000);
    assert_eq!(reader.len(), 160);
}
