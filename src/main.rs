use clap::Parser;
use env_logger::Env;
use midiarp_scheduler::midi::ports::{list_input_ports, list_output_ports};
use midiarp_scheduler::worker::LfoWaveform;
use midiarp_scheduler::{
    Arpeggiator, Lfo, MidirQueue, Notification, OutputBinding, SchedulerConfig, SchedulerResult,
    Worker, WorkerCommand, spawn_scheduler,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Interval between two notification polls
const NOTIFICATION_POLL: Duration = Duration::from_millis(50);

/// Log level variable, e.g. `MIDIARP_LOG=debug`
const LOG_ENV: &str = "MIDIARP_LOG";

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the configuration file (RON, or JSON with a .json extension)
    #[arg(long)]
    config: Option<PathBuf>,

    /// List the MIDI ports and exit
    #[arg(long, default_value_t = false)]
    list_ports: bool,

    /// Override the configured tempo
    #[arg(long)]
    tempo: Option<f64>,

    /// Connect to this system MIDI input instead of the default one
    #[arg(long)]
    input: Option<String>,

    /// Follow incoming MIDI clock
    #[arg(long, default_value_t = false)]
    midi_clock: bool,

    /// Do not register the demo LFO and arpeggiator
    #[arg(long, default_value_t = false)]
    no_demo: bool,
}

/// Log backend reading its filter from `var`, `info` when unset
fn logger_builder(var: &str) -> env_logger::Builder {
    let mut builder = env_logger::Builder::from_env(Env::default().filter_or(var, "info"));
    builder.format_timestamp_millis();
    builder
}

fn print_ports(client_name: &str) {
    println!("MIDI inputs:");
    for port in list_input_ports(client_name) {
        println!("  [{}] {}", port.index, port.name);
    }
    println!("MIDI outputs:");
    for port in list_output_ports(client_name) {
        println!("  [{}] {}", port.index, port.name);
    }
}

fn demo_workers() -> Vec<Box<dyn Worker>> {
    let mut lfo = Lfo::new(OutputBinding::new(0, 0), 74);
    lfo.apply(WorkerCommand::SetWaveform(LfoWaveform::Triangle));
    lfo.apply(WorkerCommand::SetResolution(16));

    let arp = Arpeggiator::new(OutputBinding::new(0, 1));

    vec![Box::new(lfo) as Box<dyn Worker>, Box::new(arp)]
}

fn print_notification(notification: &Notification) {
    match notification {
        Notification::Status(status) => {
            println!("[{:?}/{:?}] {}", status.level, status.category, status.message)
        }
        Notification::NoteReceived { note, velocity } => {
            println!("Note {} velocity {}", note, velocity)
        }
        Notification::ControllerReceived {
            controller,
            channel,
            value,
        } => println!("CC {} = {} (channel {})", controller, value, channel + 1),
        Notification::TempoChanged(bpm) => println!("Tempo {:.1} BPM", bpm),
        Notification::QueueRunning(running) => {
            println!("Queue {}", if *running { "running" } else { "stopped" })
        }
        Notification::TransportShutdown(sync) => {
            println!("Transport shut down, sync {}", if *sync { "on" } else { "off" })
        }
        other => log::debug!("{:?}", other),
    }
}

fn run(args: Args) -> SchedulerResult<()> {
    let mut config = SchedulerConfig::load_or_default(args.config.as_deref())?;
    if let Some(tempo) = args.tempo {
        config.tempo = tempo;
    }
    if args.midi_clock {
        config.midi_clock_sync = true;
    }
    let config = config.validate();

    if args.list_ports {
        print_ports(&config.client_name);
        return Ok(());
    }

    println!("=== midiarp scheduler ===");
    println!("{} port(s) at {:.1} BPM\n", config.port_count, config.tempo);

    let mut queue = MidirQueue::new(&config.client_name)?;
    if let Some(input) = args.input.as_deref() {
        queue.connect_input(input)?;
    }

    let mut handle = spawn_scheduler(queue, config)?;
    if !args.no_demo {
        for worker in demo_workers() {
            handle.add_worker(worker)?;
        }
    }
    handle.set_running(true)?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_for_ctrlc = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        stop_for_ctrlc.store(true, Ordering::SeqCst);
    }) {
        log::warn!("Ctrl-C handler not installed: {}", e);
    }

    println!("Running, press Ctrl-C to quit");
    while !stop.load(Ordering::SeqCst) {
        for notification in handle.poll_notifications() {
            print_notification(&notification);
        }
        std::thread::sleep(NOTIFICATION_POLL);
    }

    println!("\nShutting down...");
    handle.shutdown()
}

fn main() {
    logger_builder(LOG_ENV).init();
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("ERROR: {}", e);
        std::process::exit(1);
    }
}
