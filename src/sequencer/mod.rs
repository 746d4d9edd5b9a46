//! Core sequence model - notes, parameter updates and the time-ordered walk
//! over them.
use std::cmp::Ordering;
use std::collections::BinaryHeap;

pub mod playback;

/// Value carried by a parameter update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateValue {
    Real(f64),
    Integer(i64),
    String(String),
    Logical(bool),
}

impl UpdateValue {
    /// One-letter type tag: `r`, `i`, `s` or `l`.
    pub fn type_code(&self) -> char {
        match self {
            UpdateValue::Real(_) => 'r',
            UpdateValue::Integer(_) => 'i',
            UpdateValue::String(_) => 's',
            UpdateValue::Logical(_) => 'l',
        }
    }
}

/// A named, typed value, e.g. `bend = Real(0.25)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: UpdateValue,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: UpdateValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn real(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, UpdateValue::Real(value))
    }

    pub fn integer(name: impl Into<String>, value: i64) -> Self {
        Self::new(name, UpdateValue::Integer(value))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub chan: i32,
    /// Pitch, also used as the note identifier
    pub key: i32,
    pub loud: f32,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub chan: i32,
    pub time: f64,
    /// Target key, or negative for a channel-wide update
    pub key: i32,
    pub parameter: Parameter,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Note(Note),
    Update(Update),
}

impl Event {
    /// Start time for notes, time of the update otherwise.
    pub fn time(&self) -> f64 {
        match self {
            Event::Note(note) => note.start,
            Event::Update(update) => update.time,
        }
    }
}

/// Time-ordered collection of events.
#[derive(Debug, Clone, Default)]
pub struct Sequence {
    events: Vec<Event>,
}

impl Sequence {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Insert an event, keeping the collection sorted by time. Events with
    /// equal times keep their insertion order.
    pub fn push(&mut self, event: Event) {
        let time = event.time();
        let index = self.events.partition_point(|e| e.time() <= time);
        self.events.insert(index, event);
    }

    pub fn add_note(&mut self, chan: i32, key: i32, loud: f32, start: f64, duration: f64) {
        self.push(Event::Note(Note {
            chan,
            key,
            loud,
            start,
            end: start + duration.max(0.0),
        }));
    }

    pub fn add_update(&mut self, chan: i32, time: f64, key: i32, parameter: Parameter) {
        self.push(Event::Update(Update {
            chan,
            time,
            key,
            parameter,
        }));
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Latest time anything happens, note ends included.
    pub fn end_time(&self) -> f64 {
        self.events
            .iter()
            .map(|e| match e {
                Event::Note(note) => note.end,
                Event::Update(update) => update.time,
            })
            .fold(0.0, f64::max)
    }

    /// Begin a single ordered pass over the sequence.
    pub fn iter(&self) -> SequenceIter<'_> {
        SequenceIter {
            events: &self.events,
            next_index: 0,
            pending_offs: BinaryHeap::new(),
        }
    }
}

impl<'a> IntoIterator for &'a Sequence {
    type Item = (&'a Event, bool);
    type IntoIter = SequenceIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A note waiting for its note-off. Ordered so the `BinaryHeap` pops the
/// earliest end time first, and among equal end times the note that started
/// first.
struct PendingOff {
    end: f64,
    index: usize,
}

impl PartialEq for PendingOff {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PendingOff {}

impl PartialOrd for PendingOff {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingOff {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .end
            .total_cmp(&self.end)
            .then_with(|| other.index.cmp(&self.index))
    }
}

/// Ordered walk over a [`Sequence`], yielding `(event, note_on)` pairs.
///
/// `note_on` is `true` for note starts and for every update, `false` for
/// the note-off of a previously yielded note. Note-offs are interleaved by
/// end time; a note-off due at the same time as the next event comes first.
/// Dropping the iterator ends the pass.
pub struct SequenceIter<'a> {
    events: &'a [Event],
    next_index: usize,
    pending_offs: BinaryHeap<PendingOff>,
}

impl<'a> SequenceIter<'a> {
    /// Time the player should wait for before handling this pair.
    pub fn effective_time(event: &Event, note_on: bool) -> f64 {
        match event {
            Event::Note(note) if !note_on => note.end,
            _ => event.time(),
        }
    }
}

impl<'a> Iterator for SequenceIter<'a> {
    type Item = (&'a Event, bool);

    fn next(&mut self) -> Option<Self::Item> {
        let events = self.events;
        let next_event = events.get(self.next_index);

        let off_first = match (self.pending_offs.peek(), next_event) {
            (Some(off), Some(event)) => off.end <= event.time(),
            (Some(_), None) => true,
            (None, _) => false,
        };

        if off_first {
            let off = self.pending_offs.pop()?;
            return Some((&events[off.index], false));
        }

        let event = next_event?;
        if let Event::Note(note) = event {
            self.pending_offs.push(PendingOff {
                end: note.end,
                index: self.next_index,
            });
        }
        self.next_index += 1;
        Some((event, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note_at(start: f64, end: f64, key: i32) -> Event {
        Event::Note(Note {
            chan: 0,
            key,
            loud: 100.0,
            start,
            end,
        })
    }

    fn walk(seq: &Sequence) -> Vec<(f64, bool, i32)> {
        seq.iter()
            .map(|(event, note_on)| {
                let key = match event {
                    Event::Note(note) => note.key,
                    Event::Update(update) => update.key,
                };
                (SequenceIter::effective_time(event, note_on), note_on, key)
            })
            .collect()
    }

    #[test]
    fn test_push_keeps_time_order() {
        let mut seq = Sequence::new();
        seq.push(note_at(2.0, 3.0, 62));
        seq.push(note_at(0.0, 1.0, 60));
        seq.push(note_at(1.0, 2.0, 61));
        let starts: Vec<f64> = seq.events().iter().map(Event::time).collect();
        assert_eq!(starts, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_push_is_stable_for_equal_times() {
        let mut seq = Sequence::new();
        seq.add_update(0, 1.0, 1, Parameter::real("bend", 0.0));
        seq.add_update(0, 1.0, 2, Parameter::real("bend", 0.0));
        let keys: Vec<i32> = walk(&seq).iter().map(|(_, _, key)| *key).collect();
        assert_eq!(keys, vec![1, 2]);
    }

    #[test]
    fn test_single_note_yields_on_then_off() {
        let mut seq = Sequence::new();
        seq.add_note(0, 60, 100.0, 0.5, 1.0);
        assert_eq!(walk(&seq), vec![(0.5, true, 60), (1.5, false, 60)]);
    }

    #[test]
    fn test_note_offs_interleave_by_end_time() {
        let mut seq = Sequence::new();
        seq.add_note(0, 60, 100.0, 0.0, 3.0);
        seq.add_note(0, 64, 100.0, 1.0, 0.5);
        seq.add_update(0, 2.0, -1, Parameter::real("pressure", 0.5));
        assert_eq!(
            walk(&seq),
            vec![
                (0.0, true, 60),
                (1.0, true, 64),
                (1.5, false, 64),
                (2.0, true, -1),
                (3.0, false, 60),
            ]
        );
    }

    #[test]
    fn test_note_off_comes_before_restrike_at_same_time() {
        let mut seq = Sequence::new();
        seq.add_note(0, 60, 100.0, 0.0, 1.0);
        seq.add_note(0, 60, 100.0, 1.0, 1.0);
        assert_eq!(
            walk(&seq),
            vec![
                (0.0, true, 60),
                (1.0, false, 60),
                (1.0, true, 60),
                (2.0, false, 60),
            ]
        );
    }

    #[test]
    fn test_equal_note_offs_follow_start_order() {
        let mut seq = Sequence::new();
        seq.add_note(0, 60, 100.0, 0.0, 1.0);
        seq.add_note(0, 64, 100.0, 0.0, 1.0);
        seq.add_note(0, 67, 100.0, 0.0, 1.0);
        let offs: Vec<i32> = walk(&seq)
            .into_iter()
            .filter(|(_, note_on, _)| !note_on)
            .map(|(_, _, key)| key)
            .collect();
        assert_eq!(offs, vec![60, 64, 67]);
    }

    #[test]
    fn test_empty_sequence() {
        let seq = Sequence::new();
        assert!(seq.is_empty());
        assert_eq!(seq.iter().count(), 0);
        assert_eq!(seq.end_time(), 0.0);
    }

    #[test]
    fn test_end_time_includes_note_ends() {
        let mut seq = Sequence::new();
        seq.add_note(0, 60, 100.0, 0.0, 4.0);
        seq.add_update(0, 2.0, -1, Parameter::integer("program", 5));
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.end_time(), 4.0);
    }

    #[test]
    fn test_update_value_type_codes() {
        assert_eq!(UpdateValue::Real(0.0).type_code(), 'r');
        assert_eq!(UpdateValue::Integer(0).type_code(), 'i');
        assert_eq!(UpdateValue::String(String::new()).type_code(), 's');
        assert_eq!(UpdateValue::Logical(true).type_code(), 'l');
    }
}
