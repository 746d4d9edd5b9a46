//! seqplay - real-time MIDI playback of note/update sequences
//!
//! This library provides:
//! - A time-ordered sequence model with note-off interleaving
//! - Translation of notes and parameter updates into MIDI messages
//! - A polling time-waiter and the real-time dispatch loop
//! - Buffered, timestamped MIDI output through midir

pub mod config;
pub mod midi;
pub mod sequencer;

// Re-export commonly used types
pub use config::PlayerConfig;
pub use midi::{note_name, send_event, translate, MidiMessage, MidiSink, TimedOutput};
pub use sequencer::playback::{dispatch, seq_play, Clock, Player, TimeSource, Waiter};
pub use sequencer::{Event, Note, Parameter, Sequence, SequenceIter, Update, UpdateValue};
