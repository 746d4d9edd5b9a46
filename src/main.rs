#[cfg(feature = "cli")]
use std::time::Duration;

#[cfg(feature = "cli")]
use clap::Parser;

#[cfg(feature = "cli")]
use seqplay::{midi, note_name, Parameter, Player, PlayerConfig, Sequence};

/// Play a short demonstration sequence on a MIDI output port.
#[cfg(feature = "cli")]
#[derive(Parser, Debug)]
#[command(name = "seqplay", version)]
struct Args {
    /// Part of the output port name (case-insensitive); first port if omitted
    #[arg(short, long)]
    port: Option<String>,

    /// List output ports and exit
    #[arg(short, long)]
    list: bool,

    /// Delivery latency in milliseconds
    #[arg(long, default_value_t = 100)]
    latency: u64,

    /// Output buffer size in messages
    #[arg(long, default_value_t = 256)]
    buffer: usize,

    /// Seconds to keep the port open after the last event
    #[arg(long, default_value_t = 1.0)]
    drain: f64,

    /// Print the MIDI messages instead of playing them
    #[arg(long)]
    dry_run: bool,
}

#[cfg(feature = "cli")]
fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = PlayerConfig::new()
        .with_latency_ms(args.latency)
        .with_buffer_size(args.buffer)
        .with_drain(Duration::from_secs_f64(args.drain.max(0.0)));
    if let Some(port) = args.port {
        config = config.with_port(port);
    }

    if args.list {
        let ports = midi::list_output_ports(&config.client_name)?;
        if ports.is_empty() {
            println!("No MIDI output ports available");
        }
        for (i, name) in ports.iter().enumerate() {
            println!("{}: {}", i, name);
        }
        return Ok(());
    }

    let seq = demo_sequence();

    if args.dry_run {
        let mut messages: Vec<midi::MidiMessage> = Vec::new();
        for (event, note_on) in seq.iter() {
            midi::send_event(&mut messages, event, note_on)?;
        }
        for msg in messages {
            let name = if msg.kind() == midi::NOTE_ON {
                note_name(msg.data1)
            } else {
                String::new()
            };
            println!(
                "{:>6}ms  {:02X} {:3} {:3}  {}",
                msg.timestamp, msg.status, msg.data1, msg.data2, name
            );
        }
        return Ok(());
    }

    let mut player = Player::open(&config)?;
    log::info!("Output: {}", player.port_name());
    let result = player.play(&seq);
    player.close();
    println!();
    result
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("This binary requires the 'cli' feature to be enabled");
    std::process::exit(1);
}

/// A rising C major arpeggio with a pressure swell, a bend and a filter
/// sweep, on channel 0.
#[cfg(feature = "cli")]
fn demo_sequence() -> Sequence {
    let mut seq = Sequence::new();
    seq.add_update(0, 0.0, -1, Parameter::integer("program", 0));
    seq.add_update(0, 0.0, -1, Parameter::real("bend", 0.0));

    for (i, key) in [60, 64, 67, 72, 76, 79, 84].into_iter().enumerate() {
        let start = i as f64 * 0.25;
        seq.add_note(0, key, 70.0 + i as f32 * 8.0, start, 0.3);
        seq.add_update(0, start, -1, Parameter::real("control74", i as f64 / 6.0));
    }

    seq.add_note(0, 48, 90.0, 2.0, 1.5);
    for step in 0..=10 {
        let t = 2.0 + step as f64 * 0.1;
        seq.add_update(0, t, -1, Parameter::real("pressure", step as f64 / 10.0));
        seq.add_update(0, t, 48, Parameter::real("pressure", 1.0 - step as f64 / 10.0));
    }
    seq.add_update(0, 3.0, -1, Parameter::real("bend", -0.5));
    seq.add_update(0, 3.5, -1, Parameter::real("bend", 0.0));
    seq
}
