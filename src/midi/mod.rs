//! Translation of sequence events into timestamped MIDI messages
use crate::sequencer::{Event, Note, Update, UpdateValue};

pub mod output;

pub use output::{list_output_ports, resolve_port, TimedOutput};

pub const NOTE_ON: u8 = 0x90;
pub const POLY_TOUCH: u8 = 0xA0;
pub const CONTROL_CHANGE: u8 = 0xB0;
pub const PROGRAM_CHANGE: u8 = 0xC0;
pub const CHANNEL_TOUCH: u8 = 0xD0;
pub const PITCH_BEND: u8 = 0xE0;

const PRESSURE: &str = "pressure";
const BEND: &str = "bend";
const PROGRAM: &str = "program";
const CONTROL_PREFIX: &str = "control";

/// Largest bend value sent; the centre (8192) is clamped down to it.
const BEND_MAX: i64 = 8191;

/// A short MIDI message stamped with its delivery time in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiMessage {
    pub timestamp: u64,
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
}

impl MidiMessage {
    pub fn channel(&self) -> u8 {
        self.status & 0x0F
    }

    pub fn kind(&self) -> u8 {
        self.status & 0xF0
    }

    /// Wire bytes. Program Change and Channel Pressure carry one data byte.
    pub fn bytes(&self) -> Vec<u8> {
        match self.kind() {
            PROGRAM_CHANGE | CHANNEL_TOUCH => vec![self.status, self.data1],
            _ => vec![self.status, self.data1, self.data2],
        }
    }
}

/// Destination for translated messages. Implementations are responsible
/// for honouring the timestamps.
pub trait MidiSink {
    fn write_short(&mut self, msg: MidiMessage) -> anyhow::Result<()>;
}

/// Collects messages instead of sending them.
impl MidiSink for Vec<MidiMessage> {
    fn write_short(&mut self, msg: MidiMessage) -> anyhow::Result<()> {
        self.push(msg);
        Ok(())
    }
}

/// What an update's attribute means for MIDI output. Names only match
/// together with their expected value type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Attribute {
    Pressure(f64),
    Bend(f64),
    Program(i64),
    Control(i64, f64),
    Other,
}

impl Attribute {
    pub fn classify(update: &Update) -> Self {
        let name = update.parameter.name.as_str();
        match (name, &update.parameter.value) {
            (PRESSURE, UpdateValue::Real(v)) => Attribute::Pressure(*v),
            (BEND, UpdateValue::Real(v)) => Attribute::Bend(*v),
            (PROGRAM, UpdateValue::Integer(v)) => Attribute::Program(*v),
            (_, UpdateValue::Real(v)) => match controller_number(name) {
                Some(control) => Attribute::Control(control, *v),
                None => Attribute::Other,
            },
            _ => Attribute::Other,
        }
    }
}

/// Leading decimal digits after the `control` prefix.
fn controller_number(name: &str) -> Option<i64> {
    let rest = name.strip_prefix(CONTROL_PREFIX)?;
    let digits = rest
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map_or(rest, |(i, _)| &rest[..i]);
    if digits.is_empty() {
        return None;
    }
    // Anything too long for an i64 is far past 127 anyway.
    Some(digits.parse().unwrap_or(i64::MAX))
}

fn timestamp_ms(when: f64) -> u64 {
    // Float to int `as` saturates: negative times become 0.
    (when * 1000.0) as u64
}

fn data_byte(value: i64) -> u8 {
    value.clamp(0, 127) as u8
}

fn status_byte(status: u8, chan: i32) -> u8 {
    status | (chan & 0x0F) as u8
}

fn channel_message(when: f64, status: u8, chan: i32, data1: i64, data2: i64) -> MidiMessage {
    MidiMessage {
        timestamp: timestamp_ms(when),
        status: status_byte(status, chan),
        data1: data_byte(data1),
        data2: data_byte(data2),
    }
}

pub fn note_on(when: f64, chan: i32, key: i32, loud: i64) -> MidiMessage {
    channel_message(when, NOTE_ON, chan, key as i64, loud)
}

/// Pitch bend for a value in [-1, 1). Returns (msb, lsb).
pub fn bend_bytes(value: f64) -> (i64, i64) {
    let bend = ((value + 1.0) * 8192.0).round() as i64;
    let bend = bend.clamp(0, BEND_MAX);
    (bend >> 7, bend & 0x7F)
}

fn translate_note(note: &Note, note_on_flag: bool) -> MidiMessage {
    if note_on_flag {
        note_on(note.start, note.chan, note.key, note.loud as i64)
    } else {
        note_on(note.end, note.chan, note.key, 0)
    }
}

fn translate_update(update: &Update) -> Option<MidiMessage> {
    let when = update.time;
    let chan = update.chan;
    let msg = match Attribute::classify(update) {
        Attribute::Pressure(v) => {
            let amount = (v * 127.0) as i64;
            if update.key < 0 {
                channel_message(when, CHANNEL_TOUCH, chan, amount, 0)
            } else {
                channel_message(when, POLY_TOUCH, chan, update.key as i64, amount)
            }
        }
        Attribute::Bend(v) => {
            let (msb, lsb) = bend_bytes(v);
            channel_message(when, PITCH_BEND, chan, msb, lsb)
        }
        Attribute::Program(program) => channel_message(when, PROGRAM_CHANGE, chan, program, 0),
        Attribute::Control(control, v) => {
            let amount = (v * 127.0).round() as i64;
            channel_message(when, CONTROL_CHANGE, chan, control, amount)
        }
        Attribute::Other => {
            log::trace!("ignoring update {:?}", update.parameter);
            return None;
        }
    };
    Some(msg)
}

/// Message for one `(event, note_on)` pair from the sequence walk, if any.
pub fn translate(event: &Event, note_on_flag: bool) -> Option<MidiMessage> {
    match event {
        Event::Note(note) => Some(translate_note(note, note_on_flag)),
        Event::Update(update) => translate_update(update),
    }
}

/// Scientific pitch name of a key, e.g. 60 -> "C4".
pub fn note_name(key: u8) -> String {
    const NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
    let octave = (key / 12) as i32 - 1;
    format!("{}{}", NAMES[(key % 12) as usize], octave)
}

/// Translate and hand the result to the sink.
pub fn send_event<S: MidiSink + ?Sized>(
    sink: &mut S,
    event: &Event,
    note_on_flag: bool,
) -> anyhow::Result<()> {
    if let Some(msg) = translate(event, note_on_flag) {
        log::debug!(
            "t={}ms {:02X} {} {}",
            msg.timestamp,
            msg.status,
            msg.data1,
            msg.data2
        );
        sink.write_short(msg)?;
    }
    Ok(())
}
