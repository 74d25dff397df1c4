//! cpal output stream fed with interleaved f32 chunks.
//!
//! The decoder side pushes chunks through a bounded channel; the callback
//! drains them, scales by the shared volume and writes silence while paused
//! or starved. Volume and pause live in atomics so the callback never locks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use crate::media::MediaError;

/// Chunks queued ahead of the device.
const QUEUE_CHUNKS: usize = 32;

struct Shared {
    volume: AtomicU32,
    paused: AtomicBool,
}

impl Shared {
    fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }
}

/// Default output device playing interleaved f32 samples.
pub struct AudioOutput {
    stream: Stream,
    config: StreamConfig,
    shared: Arc<Shared>,
    tx: Sender<Vec<f32>>,
    rx: Receiver<Vec<f32>>,
}

impl AudioOutput {
    pub fn open(initial_volume: f32) -> Result<Self, MediaError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| MediaError::AudioOutput("No audio device available".into()))?;
        let default_config = device
            .default_output_config()
            .map_err(|e| MediaError::AudioOutput(format!("default config: {}", e)))?;
        let config = StreamConfig::from(default_config);

        let shared = Arc::new(Shared {
            volume: AtomicU32::new(initial_volume.clamp(0.0, 1.0).to_bits()),
            paused: AtomicBool::new(false),
        });
        let (tx, rx) = channel::bounded::<Vec<f32>>(QUEUE_CHUNKS);

        let callback_shared = Arc::clone(&shared);
        let callback_rx = rx.clone();
        let mut pending: VecDeque<f32> = VecDeque::new();
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if callback_shared.paused.load(Ordering::Relaxed) {
                        data.fill(0.0);
                        return;
                    }
                    let volume = callback_shared.volume();
                    for sample in data.iter_mut() {
                        while pending.is_empty() {
                            match callback_rx.try_recv() {
                                Ok(chunk) => pending.extend(chunk),
                                Err(_) => break,
                            }
                        }
                        *sample = pending.pop_front().map_or(0.0, |s| s * volume);
                    }
                },
                |err| tracing::warn!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| MediaError::AudioOutput(format!("build stream: {}", e)))?;
        stream
            .play()
            .map_err(|e| MediaError::AudioOutput(format!("play stream: {}", e)))?;

        tracing::info!(
            "Audio output: {} Hz, {} channels",
            config.sample_rate.0,
            config.channels
        );
        Ok(Self {
            stream,
            config,
            shared,
            tx,
            rx,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    pub fn volume(&self) -> f32 {
        self.shared.volume()
    }

    pub fn set_volume(&self, volume: f32) {
        self.shared
            .volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn set_paused(&self, paused: bool) {
        self.shared.paused.store(paused, Ordering::Relaxed);
        let result = if paused {
            self.stream.pause().map_err(|e| e.to_string())
        } else {
            self.stream.play().map_err(|e| e.to_string())
        };
        if let Err(e) = result {
            tracing::warn!("Audio stream pause/resume failed: {}", e);
        }
    }

    /// Queue a chunk. Returns false when the queue is full and the chunk was
    /// dropped.
    pub fn push(&self, samples: Vec<f32>) -> bool {
        match self.tx.try_send(samples) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn is_full(&self) -> bool {
        self.tx.is_full()
    }

    /// Drop everything queued, e.g. after a seek.
    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        if let Err(e) = self.stream.pause() {
            tracing::debug!("Audio stream pause on drop failed: {}", e);
        }
    }
}
