// Audio track playback. A dedicated thread owns the cpal output stream
// (cpal streams are !Send) and plays a hound-decoded WAV buffer to the
// default output device; the player polls `is_playing` to keep lights
// and audio finishing together. The device is only touched once the
// first `play` call arrives.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::error::{PlayerError, Result};

struct Playback {
    /// Set by the stream callback once the last sample has been played.
    done: Arc<AtomicBool>,
    /// Tells the stream-owning thread to tear down.
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct AudioPlayer {
    playback: Option<Playback>,
}

impl AudioPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts asynchronous playback of a WAV file, stopping any prior
    /// playback first.
    pub fn play(&mut self, path: &Path) -> Result<()> {
        self.stop();

        let (samples, channels, sample_rate) = decode_wav(path)?;
        log::info!(
            "playing audio {} ({channels}ch @ {sample_rate}Hz, {:.1}s)",
            path.display(),
            samples.len() as f64 / (channels as f64 * sample_rate as f64),
        );

        let done = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));

        let (result_tx, result_rx) = mpsc::sync_channel::<std::result::Result<(), String>>(1);
        let thread_done = Arc::clone(&done);
        let thread_shutdown = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("audio-out".into())
            .spawn(move || {
                let result = (|| -> std::result::Result<cpal::Stream, String> {
                    let host = cpal::default_host();
                    let device = host
                        .default_output_device()
                        .ok_or_else(|| "no audio output device found".to_string())?;

                    let config = cpal::StreamConfig {
                        channels,
                        sample_rate: cpal::SampleRate(sample_rate),
                        buffer_size: cpal::BufferSize::Default,
                    };

                    let mut pos = 0usize;
                    let callback_done = Arc::clone(&thread_done);
                    let stream = device
                        .build_output_stream(
                            &config,
                            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                                for out in data.iter_mut() {
                                    if pos < samples.len() {
                                        *out = samples[pos];
                                        pos += 1;
                                    } else {
                                        *out = 0.0;
                                        callback_done.store(true, Ordering::Relaxed);
                                    }
                                }
                            },
                            |err| log::error!("audio stream error: {err}"),
                            None,
                        )
                        .map_err(|e| format!("build_output_stream failed: {e}"))?;

                    stream.play().map_err(|e| format!("stream.play failed: {e}"))?;
                    Ok(stream)
                })();

                match result {
                    Ok(stream) => {
                        let _ = result_tx.send(Ok(()));
                        // Park here: this thread keeps the stream alive.
                        while !thread_shutdown.load(Ordering::Relaxed)
                            && !thread_done.load(Ordering::Relaxed)
                        {
                            thread::park_timeout(Duration::from_millis(100));
                        }
                        drop(stream);
                    }
                    Err(e) => {
                        thread_done.store(true, Ordering::Relaxed);
                        let _ = result_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| PlayerError::Thread(e.to_string()))?;

        match result_rx.recv() {
            Ok(Ok(())) => {
                self.playback = Some(Playback {
                    done,
                    shutdown,
                    handle,
                });
                Ok(())
            }
            Ok(Err(msg)) => {
                let _ = handle.join();
                Err(PlayerError::AudioInit(msg))
            }
            Err(_) => Err(PlayerError::AudioInit(
                "audio thread died before reporting status".into(),
            )),
        }
    }

    /// Whether playback is still running. Once the source has drained,
    /// the stream thread is reaped and its resources released.
    pub fn is_playing(&mut self) -> bool {
        let done = match &self.playback {
            Some(p) => p.done.load(Ordering::Relaxed),
            None => return false,
        };
        if done {
            self.stop();
        }
        !done
    }

    /// Stops playback and tears down the stream thread.
    pub fn stop(&mut self) {
        if let Some(p) = self.playback.take() {
            p.shutdown.store(true, Ordering::Relaxed);
            p.handle.thread().unpark();
            let _ = p.handle.join();
        }
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Decodes a WAV file into interleaved f32 samples.
fn decode_wav(path: &Path) -> Result<(Vec<f32>, u16, u32)> {
    let mut reader =
        hound::WavReader::open(path).map_err(|e| PlayerError::AudioPlay(e.to_string()))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| PlayerError::AudioPlay(e.to_string()))?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| PlayerError::AudioPlay(e.to_string()))?
        }
    };

    Ok((samples, spec.channels, spec.sample_rate))
}
