// Playback orchestrator. Ties the pump, cell table, LOR encoder and
// serial sink together into the per-frame loop, paced by the adaptive
// sleeper and punctuated by heartbeats so the controllers keep the
// link alive.

pub mod cells;
pub mod pump;
pub mod sleep;

use std::sync::Arc;
use std::time::Duration;

use crate::audio::AudioPlayer;
use crate::cmap::ChannelMap;
use crate::error::Result;
use crate::fseq::{self, SeqHeader};
use crate::lor;
use crate::lor::MsgBuffer;
use crate::netstats::NetStats;
use crate::queue::PlayRequest;
use crate::rafile::{OpenMode, RandomAccessFile};
use crate::serial::SerialSink;

use cells::{CellGroup, CellTable};
use pump::FramePump;
use sleep::SleepEstimator;

/// Poll interval for the end-of-sequence audio completion wait.
const AUDIO_POLL_INTERVAL: Duration = Duration::from_millis(50);

// ─────────────────────────────────────────────────────────────────────────────
//  Entry point
// ─────────────────────────────────────────────────────────────────────────────

/// Executes one playback job to completion: sequence, audio and the
/// final lights-off broadcast. Blocks until both the sequence and any
/// audio track have finished.
pub fn exec(req: &PlayRequest, serial: &mut SerialSink, audio: &mut AudioPlayer) -> Result<()> {
    let file = Arc::new(RandomAccessFile::open(&req.seq_path, OpenMode::Read)?);

    let cmap = ChannelMap::from_file(&req.cmap_path).map_err(|e| {
        log::error!(
            "failed to read/parse channel map file `{}`: {e}",
            req.cmap_path.display()
        );
        e
    })?;

    let seq = fseq::open(&file)?;
    log::info!(
        "sequence: {} channels, {} frames @ {}ms step ({} fps nominal, {:?})",
        seq.channel_count,
        seq.frame_count,
        seq.frame_step_time_ms,
        seq.fps(),
        seq.compression,
    );

    let mut sleeper = SleepEstimator::new();
    let mut table = CellTable::new(&cmap, seq.channel_count);
    let mut pump = FramePump::new(Arc::clone(&file), seq.clone())?;

    // LOR hardware wants several heartbeats before it considers the
    // link established; wait out the requested grace period first.
    wait_for_connection(serial, req.wait_secs);

    start_audio(req, &file, &seq, audio);

    play_frames(&seq, &mut pump, &mut table, &mut sleeper, serial)?;

    log::info!("turning off lights, waiting for end of audio...");
    lights_off(serial);

    while audio.is_playing() {
        std::thread::sleep(AUDIO_POLL_INTERVAL);
    }

    log::info!("end of sequence!");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
//  Frame loop
// ─────────────────────────────────────────────────────────────────────────────

fn play_frames(
    seq: &SeqHeader,
    pump: &mut FramePump,
    table: &mut CellTable,
    sleeper: &mut SleepEstimator,
    serial: &mut SerialSink,
) -> Result<()> {
    let step = seq.frame_step_time_ms as u32;
    let heartbeat_every = (500 / step).max(1);
    let status_every = (1000 / step).max(1);

    let mut msg = MsgBuffer::new();
    let mut stats = NetStats::new();
    let mut next_frame: u32 = 0;

    while next_frame < seq.frame_count {
        sleeper.sleep(step);

        // Send a heartbeat every ~500ms, or sooner if the frame rate
        // doesn't divide it evenly.
        if next_frame % heartbeat_every == 0 {
            lor::append_heartbeat(&mut msg);
            stats.record_packet();
            stats.add_written(msg.flush_if(true, |b| serial.write(b)) as u64);
        }

        let frame_id = next_frame;
        next_frame += 1;

        pump.check_preload(frame_id)?;
        let Some(frame) = pump.next_frame()? else {
            break;
        };

        for (i, &intensity) in frame.iter().enumerate() {
            table.set(i, intensity);
        }
        table.link_all();

        let mut cursor = 0;
        while let Some(group) = table.next_group(&mut cursor) {
            append_group_effect(&mut msg, &group);
            stats.record_group(group.size);
            stats.add_written(msg.flush_if(false, |b| serial.write(b)) as u64);
        }
        stats.add_written(msg.flush_if(true, |b| serial.write(b)) as u64);

        // Wait for the serial line to drain. This is deliberate back
        // pressure: a link that can't keep up costs frames instead of
        // building an unbounded backlog.
        serial.drain();

        if frame_id % status_every == 0 {
            log_status(seq, frame_id, pump, sleeper, &mut stats);
        }
    }

    Ok(())
}

/// Encodes one cell group as a channel or channel-set effect.
fn append_group_effect(msg: &mut MsgBuffer, group: &CellGroup) {
    let level = lor::intensity_curve_vendor(group.intensity as f32 / 255.0);
    let effect = lor::Effect::SetIntensity(level);

    // The single-channel form only addresses channels 0..127; higher
    // circuits go out as a one-bit channel set.
    let channel = group.section as u16 * 16 + group.channel_bits.trailing_zeros() as u16;
    if group.size == 1 && channel < 0x80 {
        lor::append_channel_effect(msg, effect, channel, group.unit);
    } else {
        lor::append_channel_set_effect(
            msg,
            effect,
            lor::ChannelSet {
                offset: group.section,
                channel_bits: group.channel_bits,
            },
            group.unit,
        );
    }
}

fn log_status(
    seq: &SeqHeader,
    frame: u32,
    pump: &FramePump,
    sleeper: &SleepEstimator,
    stats: &mut NetStats,
) {
    let ms = sleeper.average_ns() as f64 / 1e6;
    let fps = if ms > 0.0 { 1000.0 / ms } else { 0.0 };

    let frames_left = seq.frame_count.saturating_sub(frame) as u64;
    let seconds = frames_left * seq.frame_step_time_ms as u64 / 1000;

    log::info!(
        "remaining: {:02}m {:02}s\tdt: {ms:.4}ms ({fps:.2} fps)\tpump: {:5}\t{}",
        seconds / 60,
        seconds % 60,
        pump.frames_remaining(),
        stats.pop_summary(),
    );
}

// ─────────────────────────────────────────────────────────────────────────────
//  Connection setup / teardown helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Repeats heartbeats for `seconds` before any frame data goes out, so
/// downstream hardware treats the link as established. Runs on a plain
/// 500ms cadence, independent of the frame clock.
fn wait_for_connection(serial: &mut SerialSink, seconds: u32) {
    if seconds == 0 {
        return;
    }

    log::info!("waiting {seconds} seconds for connection...");

    let mut msg = MsgBuffer::new();
    for _ in 0..seconds * 2 {
        lor::append_heartbeat(&mut msg);
        msg.flush_if(true, |b| serial.write(b));
        std::thread::sleep(lor::HEARTBEAT_DELAY);
    }
}

/// Broadcasts a set-off effect to every possible unit id.
fn lights_off(serial: &mut SerialSink) {
    let mut msg = MsgBuffer::new();
    for unit in lor::UNIT_MIN..=lor::UNIT_MAX {
        lor::append_unit_effect(&mut msg, lor::Effect::SetOff, unit);
        msg.flush_if(false, |b| serial.write(b));
    }
    msg.flush_if(true, |b| serial.write(b));
    serial.drain();
}

/// Starts audio for the job: the explicit override if one was given,
/// otherwise whatever the sequence's `mf` variable names. Audio
/// failures are logged and swallowed; playback continues in silence.
fn start_audio(
    req: &PlayRequest,
    file: &RandomAccessFile,
    seq: &SeqHeader,
    audio: &mut AudioPlayer,
) {
    let path = match &req.audio_path {
        Some(p) => Some(p.clone()),
        None => match fseq::media_file(file, seq) {
            Ok(found) => found.map(std::path::PathBuf::from),
            Err(e) => {
                log::warn!("failed to read sequence media file variable: {e}");
                None
            }
        },
    };

    match path {
        Some(p) => {
            if let Err(e) = audio.play(&p) {
                log::warn!("audio playback failed, continuing in silence: {e}");
            }
        }
        None => log::info!("sequence has no audio track"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flush(msg: &mut MsgBuffer) -> Vec<u8> {
        let mut out = Vec::new();
        msg.flush_if(true, |b| out.extend_from_slice(b));
        out
    }

    #[test]
    fn test_single_cell_group_uses_the_channel_form() {
        let mut msg = MsgBuffer::new();
        append_group_effect(
            &mut msg,
            &CellGroup {
                unit: 7,
                section: 2,
                channel_bits: 1 << 5,
                intensity: 255,
                size: 1,
            },
        );

        // circuit offset 5 in section 2 -> channel 37
        let out = flush(&mut msg);
        assert_eq!(out[1], 7);
        assert_eq!(*out.last().unwrap(), 0x00);
        assert_eq!(out[out.len() - 2], 0x80 | 37);
    }

    #[test]
    fn test_multi_cell_group_uses_the_channel_set_form() {
        let mut msg = MsgBuffer::new();
        append_group_effect(
            &mut msg,
            &CellGroup {
                unit: 7,
                section: 1,
                channel_bits: 0x00FF,
                intensity: 0,
                size: 8,
            },
        );

        let out = flush(&mut msg);
        // payload tail: section, mask hi, mask lo before the stop byte
        let n = out.len();
        assert_eq!(&out[n - 4..], &[1, 0x00, 0xFF, 0x00]);
    }

    #[test]
    fn test_lights_off_covers_every_unit_once() {
        let mut msg = MsgBuffer::new();
        let mut bytes = Vec::new();
        for unit in lor::UNIT_MIN..=lor::UNIT_MAX {
            lor::append_unit_effect(&mut msg, lor::Effect::SetOff, unit);
            msg.flush_if(false, |b| bytes.extend_from_slice(b));
        }
        msg.flush_if(true, |b| bytes.extend_from_slice(b));

        // each unit-off packet: stop + unit + opcode + stop
        assert_eq!(bytes.len(), 240 * 4);
        let units: Vec<u8> = bytes.chunks_exact(4).map(|p| p[1]).collect();
        assert_eq!(units.len(), 240);
        assert_eq!(units[0], lor::UNIT_MIN);
        assert_eq!(*units.last().unwrap(), lor::UNIT_MAX);
        // strictly ascending, so no unit repeats
        assert!(units.windows(2).all(|w| w[1] == w[0] + 1));

        // and the real sink path accepts the broadcast
        let mut sink = SerialSink::open("null", 19200).unwrap();
        lights_off(&mut sink);
    }

    #[test]
    fn test_heartbeat_cadence_arithmetic() {
        // 50ms frames -> every 10th frame; 500ms frames -> every frame;
        // a step above 500ms still heartbeats every frame instead of
        // dividing by zero.
        for (step, expect) in [(50u32, 10u32), (500, 1), (1000, 1)] {
            assert_eq!((500 / step).max(1), expect);
        }
    }

    #[test]
    fn test_play_loop_emits_heartbeats_on_the_500ms_cadence() {
        use crate::fseq::tests::{write_test_file, TestHeader};

        // 30 frames of 16 zeroed channels at 50ms: 1.5s of playback.
        let channel_count = 16u32;
        let frames = 30u32;
        let step = 50u8;

        let path = std::env::temp_dir().join(format!(
            "lumen-player-heartbeat-{}",
            std::process::id()
        ));
        write_test_file(
            &path,
            &TestHeader {
                channel_count,
                frame_count: frames,
                frame_step_time_ms: step,
                channel_data_offset: 32,
                ..Default::default()
            },
            &vec![0u8; (frames * channel_count) as usize],
        );

        let file = Arc::new(RandomAccessFile::open(&path, OpenMode::Read).unwrap());
        let seq = fseq::open(&file).unwrap();
        let cmap = ChannelMap::parse(
            r#"[{"index": {"from": 0, "to": 15}, "circuit": {"from": 1, "to": 16}, "unit": 1}]"#,
        )
        .unwrap();

        let mut table = CellTable::new(&cmap, seq.channel_count);
        let mut pump = FramePump::new(Arc::clone(&file), seq.clone()).unwrap();
        let mut sleeper = SleepEstimator::new();
        let mut sink = SerialSink::Capture(Vec::new());

        play_frames(&seq, &mut pump, &mut table, &mut sleeper, &mut sink).unwrap();

        let SerialSink::Capture(bytes) = sink else {
            unreachable!();
        };
        let heartbeats = bytes
            .windows(5)
            .filter(|w| *w == [0x00, 0xFF, 0x81, 0x56, 0x00])
            .count() as i64;

        // F frames at period p yield ceil(F*p / 500) heartbeats, +/- 1.
        let expected = (frames as i64 * step as i64 + 499) / 500;
        assert!(
            (heartbeats - expected).abs() <= 1,
            "{heartbeats} heartbeats emitted, expected {expected} +/- 1"
        );

        std::fs::remove_file(&path).unwrap();
    }
}
