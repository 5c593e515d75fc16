// Light-O-Rama wire protocol encoding.
//
// The LOR network is a byte stream of short packets, each framed by a
// 0x00 stop byte on either side (the framing lives in `buffer`). The
// payload layouts this player emits:
//
//   heartbeat            [0xFF, 0x81, 0x56]
//   unit effect          [unit, effect, args...]
//   channel effect       [unit, effect, args..., 0x80 | channel]
//   channel-set effect   [unit, effect | 0x10, args..., section, bits_hi, bits_lo]
//
// Units are addressed 0x01..=0xF0. A "channel" is the 0-based circuit
// within its unit; a channel set addresses a 16-channel section of a
// unit through a bitmask. Intensity bytes are device levels produced by
// the vendor curve, not linear frame values.

pub mod buffer;

use std::time::Duration;

pub use buffer::MsgBuffer;

/// Lowest addressable unit id.
pub const UNIT_MIN: u8 = 0x01;
/// Highest addressable unit id.
pub const UNIT_MAX: u8 = 0xF0;

/// Device level for 0% brightness. Levels run *down* from here to
/// `INTENSITY_MAX`; the vendor encoding is inverted relative to the
/// linear [0,255] frame space.
pub const INTENSITY_MIN: u8 = 0xF0;
/// Device level for 100% brightness.
pub const INTENSITY_MAX: u8 = 0x01;

/// Hardware keep-alive period. Controllers drop the link without a
/// heartbeat roughly twice a second.
pub const HEARTBEAT_DELAY: Duration = Duration::from_millis(500);

const OP_SET_OFF: u8 = 0x02;
const OP_SET_INTENSITY: u8 = 0x03;
const OP_FADE: u8 = 0x04;

/// Flag OR'd into the effect opcode when it routes to a channel set.
const CHANNEL_SET_FORM: u8 = 0x10;

/// Flag OR'd into a single-channel address byte.
const CHANNEL_FORM: u8 = 0x80;

/// A 16-channel selection within one unit: `offset` is the section
/// index (circuit / 16), `channel_bits` selects offsets 0..15 within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSet {
    pub offset: u8,
    pub channel_bits: u16,
}

/// Effects the player emits. Intensity fields carry vendor-curved
/// device levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    SetOff,
    SetIntensity(u8),
    /// Hardware-side fade between two levels over a duration in
    /// deciseconds. The playback loop emits set-intensity only; fades
    /// are reserved for a precomputed-transition pass.
    #[allow(dead_code)]
    Fade {
        start: u8,
        end: u8,
        deciseconds: u16,
    },
}

impl Effect {
    fn opcode(&self) -> u8 {
        match self {
            Effect::SetOff => OP_SET_OFF,
            Effect::SetIntensity(_) => OP_SET_INTENSITY,
            Effect::Fade { .. } => OP_FADE,
        }
    }

    fn push_args(&self, payload: &mut Vec<u8>) {
        match *self {
            Effect::SetOff => {}
            Effect::SetIntensity(level) => payload.push(level),
            Effect::Fade {
                start,
                end,
                deciseconds,
            } => {
                payload.push(start);
                payload.push(end);
                payload.extend_from_slice(&deciseconds.to_be_bytes());
            }
        }
    }
}

/// Maps a linear intensity in [0,1] onto the vendor's device level
/// range. Monotonic: brighter input always yields a level at least as
/// bright (numerically lower) as a dimmer one.
pub fn intensity_curve_vendor(normal: f32) -> u8 {
    let n = normal.clamp(0.0, 1.0);
    let span = (INTENSITY_MIN - INTENSITY_MAX) as f32;
    (INTENSITY_MIN as f32 - span * n).round() as u8
}

/// Appends a link keep-alive packet.
pub fn append_heartbeat(msg: &mut MsgBuffer) {
    msg.append(&[0xFF, 0x81, 0x56]);
}

/// Appends an effect addressed to every channel of `unit`.
pub fn append_unit_effect(msg: &mut MsgBuffer, effect: Effect, unit: u8) {
    debug_assert!((UNIT_MIN..=UNIT_MAX).contains(&unit));

    let mut payload = Vec::with_capacity(8);
    payload.push(unit);
    payload.push(effect.opcode());
    effect.push_args(&mut payload);
    msg.append(&payload);
}

/// Appends an effect addressed to a single 0-based channel of `unit`.
pub fn append_channel_effect(msg: &mut MsgBuffer, effect: Effect, channel: u16, unit: u8) {
    debug_assert!((UNIT_MIN..=UNIT_MAX).contains(&unit));
    debug_assert!(channel < 0x80, "single-channel form addresses channels 0..127");

    let mut payload = Vec::with_capacity(8);
    payload.push(unit);
    payload.push(effect.opcode());
    effect.push_args(&mut payload);
    payload.push(CHANNEL_FORM | channel as u8);
    msg.append(&payload);
}

/// Appends an effect addressed to a channel-set selection of `unit`.
pub fn append_channel_set_effect(msg: &mut MsgBuffer, effect: Effect, cs: ChannelSet, unit: u8) {
    debug_assert!((UNIT_MIN..=UNIT_MAX).contains(&unit));
    debug_assert!(cs.channel_bits != 0);

    let mut payload = Vec::with_capacity(10);
    payload.push(unit);
    payload.push(effect.opcode() | CHANNEL_SET_FORM);
    effect.push_args(&mut payload);
    payload.push(cs.offset);
    payload.extend_from_slice(&cs.channel_bits.to_be_bytes());
    msg.append(&payload);
}
