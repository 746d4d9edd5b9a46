//! MIDI output using midir, with timestamped delivery
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context};
use midir::MidiOutput;

use super::{MidiMessage, MidiSink};
use crate::config::PlayerConfig;
use crate::sequencer::playback::{Clock, TimeSource};

const DELIVERY_TICK: Duration = Duration::from_millis(1);

pub fn list_output_ports(client_name: &str) -> anyhow::Result<Vec<String>> {
    let midi_out = MidiOutput::new(client_name)
        .map_err(|e| anyhow!("Failed to create MIDI output: {}", e))?;
    Ok(midi_out
        .ports()
        .iter()
        .filter_map(|p| midi_out.port_name(p).ok())
        .collect())
}

/// Index of the port to use: the first whose name contains `wanted`
/// (ignoring case), or the first port when nothing is asked for.
pub fn resolve_port<S: AsRef<str>>(names: &[S], wanted: Option<&str>) -> Option<usize> {
    match wanted {
        None => (!names.is_empty()).then_some(0),
        Some(wanted) => {
            let wanted = wanted.to_lowercase();
            names
                .iter()
                .position(|name| name.as_ref().to_lowercase().contains(&wanted))
        }
    }
}

/// Buffered output stream. Messages are handed to a delivery thread that
/// sends each one once the clock reaches its timestamp plus the latency.
/// At most `buffer_size` messages wait in the thread; further writes block.
pub struct TimedOutput {
    sender: Option<SyncSender<MidiMessage>>,
    worker: Option<thread::JoinHandle<()>>,
    pending: Arc<AtomicUsize>,
    port_name: String,
}

impl TimedOutput {
    /// Connect to the configured port and start delivering.
    pub fn open(config: &PlayerConfig, clock: Clock) -> anyhow::Result<Self> {
        let midi_out = MidiOutput::new(&config.client_name)
            .map_err(|e| anyhow!("Failed to create MIDI output: {}", e))?;

        let ports = midi_out.ports();
        let names: Vec<String> = ports
            .iter()
            .enumerate()
            .map(|(i, p)| {
                midi_out
                    .port_name(p)
                    .unwrap_or_else(|_| format!("Unknown port {}", i))
            })
            .collect();
        let index = resolve_port(&names, config.port.as_deref()).ok_or_else(|| {
            match &config.port {
                Some(wanted) => anyhow!("No MIDI output port matching '{}'", wanted),
                None => anyhow!("No MIDI output ports available"),
            }
        })?;
        let port_name = names[index].clone();

        let mut connection = midi_out
            .connect(&ports[index], &config.client_name)
            .map_err(|e| anyhow!("Failed to connect to '{}': {}", port_name, e))?;
        log::info!("Connected to MIDI output '{}'", port_name);

        let latency_ms = config.latency_ms;
        let capacity = config.buffer_size;
        Self::spawn(port_name, move |rx, pending| {
            let delivery = Delivery {
                receiver: rx,
                capacity,
                latency_ms,
                pending: &pending,
            };
            delivery.run(&clock, |bytes| {
                connection
                    .send(bytes)
                    .map_err(|e| anyhow!("Failed to send: {}", e))
            });
            let _ = connection.close();
        })
    }

    fn spawn<F>(port_name: String, deliver: F) -> anyhow::Result<Self>
    where
        F: FnOnce(Receiver<MidiMessage>, Arc<AtomicUsize>) + Send + 'static,
    {
        // Rendezvous channel: a write completes only once the worker has room.
        let (sender, receiver) = sync_channel(0);
        let pending = Arc::new(AtomicUsize::new(0));
        let worker_pending = Arc::clone(&pending);
        let worker = thread::Builder::new()
            .name("midi-delivery".to_string())
            .spawn(move || deliver(receiver, worker_pending))
            .context("Failed to start MIDI delivery thread")?;
        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            pending,
            port_name,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Messages written but not yet sent.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Block until every written message has been sent.
    pub fn flush(&self) {
        while self.pending() > 0 {
            match &self.worker {
                Some(worker) if !worker.is_finished() => thread::sleep(DELIVERY_TICK),
                _ => break,
            }
        }
    }

    /// Deliver everything still buffered, then disconnect.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Disconnecting the channel tells the worker to drain and stop.
        self.sender = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("MIDI delivery thread for '{}' panicked", self.port_name);
            }
            log::info!("Closed MIDI output '{}'", self.port_name);
        }
    }
}

impl MidiSink for TimedOutput {
    fn write_short(&mut self, msg: MidiMessage) -> anyhow::Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("MIDI output '{}' is closed", self.port_name))?;
        self.pending.fetch_add(1, Ordering::SeqCst);
        sender.send(msg).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            anyhow!("MIDI delivery for '{}' stopped", self.port_name)
        })
    }
}

impl Drop for TimedOutput {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker side of a [`TimedOutput`].
struct Delivery<'a> {
    receiver: Receiver<MidiMessage>,
    capacity: usize,
    latency_ms: u64,
    pending: &'a AtomicUsize,
}

impl Delivery<'_> {
    /// Runs until the sending side is gone and every queued message has
    /// been sent. Only takes new messages while the queue has room, which
    /// keeps writers blocked on a full buffer.
    fn run<T, F>(self, clock: &T, mut send: F)
    where
        T: TimeSource + ?Sized,
        F: FnMut(&[u8]) -> anyhow::Result<()>,
    {
        let capacity = self.capacity.max(1);
        let mut queue: Vec<MidiMessage> = Vec::with_capacity(capacity);
        let mut connected = true;

        while connected || !queue.is_empty() {
            while connected && queue.len() < capacity {
                match self.receiver.try_recv() {
                    Ok(msg) => queue.push(msg),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => connected = false,
                }
            }

            let now = clock.elapsed_ms();
            let mut i = 0;
            while i < queue.len() {
                if queue[i].timestamp.saturating_add(self.latency_ms) <= now {
                    let msg = queue.remove(i);
                    if let Err(e) = send(&msg.bytes()) {
                        log::warn!("Dropped MIDI message {:?}: {}", msg, e);
                    }
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                } else {
                    i += 1;
                }
            }

            clock.sleep(DELIVERY_TICK);
        }
    }
}
