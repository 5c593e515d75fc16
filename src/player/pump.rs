// Frame pump: a double-buffered frame source that hides read and
// decompression latency behind playback. While the player drains the
// current frame set, a single worker thread preloads the next set
// (one compression block, or ~10s of raw frames) in the background.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver};

use crate::error::{PlayerError, Result};
use crate::fseq::{comblock, Compression, SeqHeader};
use crate::rafile::RandomAccessFile;

/// Ordered FIFO of owned frame buffers with O(1) append and O(1)
/// head-shift.
#[derive(Debug, Default)]
pub struct FrameList {
    frames: std::collections::VecDeque<Vec<u8>>,
}

impl FrameList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, frame: Vec<u8>) {
        self.frames.push_back(frame);
    }

    pub fn shift(&mut self) -> Option<Vec<u8>> {
        self.frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl From<Vec<Vec<u8>>> for FrameList {
    fn from(frames: Vec<Vec<u8>>) -> Self {
        Self {
            frames: frames.into(),
        }
    }
}

/// Read position for the next frame set.
#[derive(Debug, Clone, Copy)]
enum ReadPos {
    /// Next compression block index (zstd sequences).
    Block(u32),
    /// Next frame index (uncompressed sequences).
    Frame(u32),
}

/// An in-flight preload. The worker sends exactly one frame set (empty
/// on end-of-sequence or on a logged read failure) and exits.
struct Preload {
    rx: Receiver<FrameList>,
    handle: JoinHandle<()>,
}

pub struct FramePump {
    file: Arc<RandomAccessFile>,
    seq: SeqHeader,
    curr: FrameList,
    preload: Option<Preload>,
    pos: ReadPos,
    /// Effective compression block count (zstd only), trailing padding
    /// entries already trimmed.
    block_count: u32,
}

impl FramePump {
    pub fn new(file: Arc<RandomAccessFile>, seq: SeqHeader) -> Result<Self> {
        let (pos, block_count) = match seq.compression {
            Compression::Zstd => (ReadPos::Block(0), comblock::count(&file, &seq)?),
            Compression::None => (ReadPos::Frame(0), 0),
            Compression::Zlib => {
                return Err(PlayerError::Unsupported(
                    "zlib-compressed sequences are not playable".into(),
                ))
            }
        };

        Ok(Self {
            file,
            seq,
            curr: FrameList::new(),
            preload: None,
            pos,
            block_count,
        })
    }

    /// Number of frames buffered for immediate consumption.
    pub fn frames_remaining(&self) -> usize {
        self.curr.len()
    }

    /// Spawns a preload worker if the buffered frame count has dropped
    /// below ~3 seconds of playback and no preload is already in
    /// flight. `frame` is the index of the frame about to be played.
    pub fn check_preload(&mut self, frame: u32) -> Result<()> {
        if self.curr.is_empty() {
            return Ok(()); // empty pump falls back to a sync read
        }
        if self.preload.is_some() {
            return Ok(());
        }

        let reqd = (3000 / self.seq.frame_step_time_ms as u32).max(1) as usize;
        if self.curr.len() >= reqd {
            return Ok(());
        }

        // Advance the read position to the target of this preload: the
        // next block in order, or the first frame not yet buffered.
        self.pos = match self.pos {
            ReadPos::Block(cb) => ReadPos::Block(cb + 1),
            ReadPos::Frame(_) => ReadPos::Frame(frame + self.curr.len() as u32),
        };

        let (tx, rx) = bounded(1);
        let file = Arc::clone(&self.file);
        let seq = self.seq.clone();
        let pos = self.pos;
        let block_count = self.block_count;

        let handle = std::thread::Builder::new()
            .name("frame-preload".into())
            .spawn(move || {
                let list = match read_frame_set(&file, &seq, pos, block_count) {
                    Ok(list) => list,
                    Err(e) => {
                        // Swallowed here; the next sync read at the same
                        // position re-surfaces the failure.
                        log::error!("failed to preload next frame set: {e}");
                        FrameList::new()
                    }
                };
                let _ = tx.send(list);
            })
            .map_err(|e| PlayerError::Thread(e.to_string()))?;

        self.preload = Some(Preload { rx, handle });
        Ok(())
    }

    /// Takes the next frame buffer, transferring ownership to the
    /// caller. When the current set runs dry this resolves any
    /// outstanding preload, or falls back to a synchronous read.
    /// Returns `None` once the sequence is exhausted.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.curr.is_empty() {
            let mut next = FrameList::new();

            if let Some(preload) = self.preload.take() {
                next = preload
                    .rx
                    .recv()
                    .map_err(|_| PlayerError::Thread("preload worker died".into()))?;
                let _ = preload.handle.join();
            }

            if next.is_empty() {
                next = read_frame_set(&self.file, &self.seq, self.pos, self.block_count)?;
            }

            if next.is_empty() {
                return Ok(None);
            }
            self.curr = next;
        }

        Ok(self.curr.shift())
    }
}

// Dropping the pump drops any in-flight `Preload` with it, which
// detaches the worker instead of blocking shutdown on a slow read.

/// Reads one frame set at `pos`. An empty list signals end of sequence.
fn read_frame_set(
    file: &RandomAccessFile,
    seq: &SeqHeader,
    pos: ReadPos,
    block_count: u32,
) -> Result<FrameList> {
    match pos {
        ReadPos::Block(cb) => {
            if cb >= block_count {
                return Ok(FrameList::new());
            }
            Ok(comblock::read_block(file, seq, cb)?.into())
        }
        ReadPos::Frame(frame) => {
            if frame >= seq.frame_count {
                return Ok(FrameList::new());
            }
            read_raw_frames(file, seq, frame)
        }
    }
}

/// Batches ~10 seconds of uncompressed frames in one positioned read,
/// then splits the block into per-frame owned buffers to match the
/// compressed path's ownership model.
fn read_raw_frames(file: &RandomAccessFile, seq: &SeqHeader, frame: u32) -> Result<FrameList> {
    let frame_size = seq.channel_count as usize;
    let batch = (10_000 / seq.frame_step_time_ms as u32).max(1) as usize;
    let offset = seq.channel_data_offset as u64 + frame as u64 * frame_size as u64;

    let mut block = vec![0u8; batch * frame_size];
    let units = file.read_units_at(offset, frame_size, batch, &mut block)?;

    let mut list = FrameList::new();
    for i in 0..units {
        list.append(block[i * frame_size..(i + 1) * frame_size].to_vec());
    }
    Ok(list)
}
