//! eSpeak-backed TTS engine.
//!
//! Drives the `espeak`/`espeak-ng` binary with `--stdout`, strips the WAV
//! container and streams the PCM payload through the shared buffer in
//! playout-sized chunks. eSpeak emits 22050 Hz mono 16-bit audio; any other
//! output configuration is declared incompatible at initialization.

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use streamvox_audio::{AudioBuffer, AudioConfiguration};
use streamvox_foundation::CancelToken;
use streamvox_tts::{
    approximate_timings, EngineCapabilities, EngineCore, EngineError, EngineInfo, EngineResult,
    EngineStatus, TtsEngine, Voice, VoiceGender,
};
use tokio::process::Command;
use tracing::{debug, error, warn};


/// Output format eSpeak produces; anything else is incompatible.
const ESPEAK_SAMPLE_RATE: u32 = 22_050;
const ESPEAK_CHANNELS: u16 = 1;
const ESPEAK_BITS: u16 = 16;

const CANCEL_POLL: Duration = Duration::from_millis(20);

pub struct EspeakEngine {
    core: EngineCore,
    audio_config: Option<AudioConfiguration>,
    current_voice: Option<String>,
    available_voices: Vec<Voice>,
    /// Words per minute, espeak `-s`.
    rate: u32,
    /// 0..=99, espeak `-p`.
    pitch: u32,
    /// 0..=200, espeak `-a`.
    amplitude: u32,
}

impl Default for EspeakEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl EspeakEngine {
    pub fn new() -> Self {
        Self {
            core: EngineCore::new("espeak"),
            audio_config: None,
            current_voice: None,
            available_voices: Vec::new(),
            rate: 175,
            pitch: 50,
            amplitude: 100,
        }
    }

    /// Resolve the installed binary name, preferring classic espeak.
    async fn espeak_command() -> Option<String> {
        for cmd in ["espeak", "espeak-ng"] {
            if Command::new(cmd)
                .arg("--version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map(|s| s.success())
                .unwrap_or(false)
            {
                return Some(cmd.to_string());
            }
        }
        None
    }

    /// Parse `espeak --voices` output.
    ///
    /// Format: `Pty Language Age/Gender VoiceName File Other`, e.g.
    /// ` 5  en             M  en                 (en 2)`.
    fn parse_voice_list(output: &str) -> Vec<Voice> {
        let voice_regex = match Regex::new(r"^\s*(\d+)\s+([\w-]+)\s+([MF+-]?)\s*([\w\-_]+)\s+") {
            Ok(re) => re,
            Err(e) => {
                error!("Voice list regex failed to compile: {}", e);
                return Vec::new();
            }
        };

        let mut voices = Vec::new();
        for line in output.lines().skip(1) {
            if let Some(captures) = voice_regex.captures(line) {
                let language = captures.get(2).map_or("unknown", |m| m.as_str()).to_string();
                let gender = match captures.get(3).map_or("", |m| m.as_str()) {
                    "M" => Some(VoiceGender::Male),
                    "F" => Some(VoiceGender::Female),
                    _ => Some(VoiceGender::Unknown),
                };
                let id = captures.get(4).map_or("unknown", |m| m.as_str()).to_string();
                voices.push(Voice {
                    name: format!("{} ({})", language, id),
                    id,
                    language,
                    gender,
                    description: None,
                });
            }
        }
        voices
    }

    fn build_args(&self, text: &str) -> Vec<String> {
        let mut args = vec!["--stdout".to_string()];
        if let Some(voice) = &self.current_voice {
            args.push("-v".to_string());
            args.push(voice.clone());
        }
        args.push("-s".to_string());
        args.push(self.rate.to_string());
        args.push("-p".to_string());
        args.push(self.pitch.to_string());
        args.push("-a".to_string());
        args.push(self.amplitude.to_string());
        args.push(text.to_string());
        args
    }

    async fn run_espeak(&self, text: &str, cancel: &CancelToken) -> EngineResult<Vec<u8>> {
        let cmd = Self::espeak_command()
            .await
            .ok_or_else(|| EngineError::Unavailable("espeak binary not found".to_string()))?;
        let args = self.build_args(text);
        debug!("Running {} {:?}", cmd, args);

        let output_future = Command::new(&cmd)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::select! {
            result = output_future => result?,
            _ = self.poll_cancelled(cancel) => return Err(EngineError::Cancelled),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Transient(format!(
                "espeak exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(EngineError::Transient("espeak produced no audio".to_string()));
        }
        Ok(output.stdout)
    }

    async fn poll_cancelled(&self, cancel: &CancelToken) {
        loop {
            if cancel.is_cancelled() || self.core.is_stopped() {
                return;
            }
            tokio::time::sleep(CANCEL_POLL).await;
        }
    }
}

/// Skip the RIFF/WAVE container and return the raw PCM payload.
///
/// eSpeak writes a streaming header with an unknown length field, so the
/// `data` chunk is located by marker rather than by walking chunk sizes.
fn strip_wav_container(bytes: &[u8]) -> Option<&[u8]> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return None;
    }
    bytes
        .windows(4)
        .position(|w| w == b"data")
        .and_then(|pos| bytes.get(pos + 8..))
}

#[async_trait]
impl TtsEngine for EspeakEngine {
    fn info(&self) -> EngineInfo {
        EngineInfo {
            name: "espeak".to_string(),
            version: "1.0.0".to_string(),
            capabilities: EngineCapabilities {
                streaming: false,
                word_timings: true,
                languages: self
                    .available_voices
                    .iter()
                    .map(|v| v.language.clone())
                    .collect(),
            },
        }
    }

    fn status(&self) -> EngineStatus {
        self.core.status()
    }

    async fn initialize(&mut self, config: &AudioConfiguration) -> EngineResult<()> {
        self.core.set_status(EngineStatus::Initializing);

        if config.sample_rate != ESPEAK_SAMPLE_RATE
            || config.channels != ESPEAK_CHANNELS
            || config.bits_per_sample != ESPEAK_BITS
        {
            self.core.set_status(EngineStatus::Error);
            return Err(EngineError::Unavailable(format!(
                "espeak outputs {} Hz mono 16-bit; configured stream is {} Hz / {} ch / {}-bit",
                ESPEAK_SAMPLE_RATE, config.sample_rate, config.channels, config.bits_per_sample
            )));
        }

        let Some(cmd) = Self::espeak_command().await else {
            self.core.set_status(EngineStatus::Error);
            return Err(EngineError::Unavailable(
                "espeak not found; install espeak or espeak-ng".to_string(),
            ));
        };

        match Command::new(&cmd).arg("--voices").output().await {
            Ok(output) => {
                let listing = String::from_utf8_lossy(&output.stdout);
                self.available_voices = Self::parse_voice_list(&listing);
                debug!("Loaded {} espeak voices", self.available_voices.len());
            }
            Err(e) => {
                warn!("Failed to list espeak voices: {}", e);
            }
        }

        self.audio_config = Some(config.clone());
        self.core.clear_stop();
        self.core.set_status(EngineStatus::Ready);
        Ok(())
    }

    async fn is_available(&self) -> bool {
        Self::espeak_command().await.is_some()
    }

    async fn voices(&self) -> EngineResult<Vec<Voice>> {
        if self.core.status() == EngineStatus::Uninitialized {
            return Err(EngineError::NotInitialized);
        }
        Ok(self.available_voices.clone())
    }

    async fn set_voice(&mut self, voice_id: &str) -> EngineResult<()> {
        if !self.available_voices.is_empty()
            && !self.available_voices.iter().any(|v| v.id == voice_id)
        {
            return Err(EngineError::VoiceNotFound(voice_id.to_string()));
        }
        self.current_voice = Some(voice_id.to_string());
        Ok(())
    }

    async fn set_parameters(&mut self, params: HashMap<String, String>) -> EngineResult<()> {
        // Validate everything before applying anything.
        let mut staged = (self.rate, self.pitch, self.amplitude);
        for (name, value) in &params {
            let parsed: u32 = value.parse().map_err(|_| EngineError::InvalidParameter {
                name: name.clone(),
                reason: format!("not an integer: {value}"),
            })?;
            match name.as_str() {
                "rate" => staged.0 = parsed,
                "pitch" if parsed <= 99 => staged.1 = parsed,
                "amplitude" if parsed <= 200 => staged.2 = parsed,
                "pitch" | "amplitude" => {
                    return Err(EngineError::InvalidParameter {
                        name: name.clone(),
                        reason: format!("out of range: {parsed}"),
                    });
                }
                other => {
                    return Err(EngineError::InvalidParameter {
                        name: other.to_string(),
                        reason: "unknown parameter".to_string(),
                    });
                }
            }
        }
        (self.rate, self.pitch, self.amplitude) = staged;
        Ok(())
    }

    fn set_audio_buffer(&mut self, buffer: Arc<AudioBuffer>) {
        self.core.attach_buffer(buffer);
    }

    async fn synthesize(&mut self, text: &str, cancel: &CancelToken) -> EngineResult<()> {
        let config = self
            .audio_config
            .clone()
            .ok_or(EngineError::NotInitialized)?;
        self.core.check_live(cancel)?;
        if text.trim().is_empty() {
            return Err(EngineError::InvalidInput("empty text".to_string()));
        }

        self.core.set_status(EngineStatus::Synthesizing);
        let result = async {
            let wav = self.run_espeak(text, cancel).await?;
            let pcm = strip_wav_container(&wav).ok_or_else(|| EngineError::EngineSpecific {
                engine: "espeak".to_string(),
                message: "unrecognized WAV output".to_string(),
            })?;

            let frames = pcm.len() / config.bytes_per_frame();
            let audio_duration =
                Duration::from_secs_f64(frames as f64 / config.sample_rate as f64);
            for timing in approximate_timings(text, audio_duration) {
                self.core.enqueue_timing(timing);
            }

            self.core.enqueue_chunked(pcm, &config, cancel)
        }
        .await;

        match &result {
            Ok(()) => {
                self.core.set_status(EngineStatus::Ready);
            }
            Err(e) if e.is_cancellation() => {
                self.core.set_status(EngineStatus::Ready);
            }
            Err(_) => {
                self.core.set_status(EngineStatus::Error);
            }
        }
        result
    }

    async fn stop(&mut self) -> EngineResult<()> {
        self.core.request_stop();
        Ok(())
    }

    async fn shutdown(&mut self) -> EngineResult<()> {
        self.core.request_stop();
        self.available_voices.clear();
        self.current_voice = None;
        self.core.set_status(EngineStatus::Closed);
        debug!("espeak engine shut down");
        Ok(())
    }
}
