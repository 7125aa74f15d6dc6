use std::process::exit;
use std::sync::mpsc;

use anyhow::{bail, Context, Result};
use clap::Parser;

use mindstream::{logging, Collector, StatusEvent};

#[derive(Parser, Debug)]
#[command(
    name = "mindstream",
    about = "Collect a timed multichannel capture over Bluetooth SPP and submit it"
)]
struct Args {
    /// Bluetooth MAC address of the sensing device (e.g., 98:D3:51:FE:6F:A3)
    #[arg(required_unless_present = "serial")]
    mac: Option<String>,
    /// Read from an already-bound serial device instead (e.g., /dev/rfcomm0)
    #[arg(long)]
    serial: Option<String>,
    /// Annotation stored with the captured session
    #[arg(short, long)]
    label: String,
    /// Session length in minutes (1-10)
    #[arg(short, long, default_value_t = 2)]
    minutes: u32,
    /// Collection endpoint as host:port or full URL
    #[arg(short, long)]
    endpoint: String,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn run() -> Result<()> {
    logging::init();
    let args = Args::parse();

    let (events_tx, events) = mpsc::channel();
    let collector = Collector::new(events_tx, args.endpoint.clone());

    match (&args.serial, &args.mac) {
        (Some(path), _) => collector.connect_serial(path)?,
        (None, Some(mac)) => collector.connect(mac)?,
        (None, None) => unreachable!("clap requires a mac unless --serial is given"),
    }

    loop {
        let event = events.recv().context("core stopped emitting events")?;
        match event {
            StatusEvent::Connecting => println!("/> connecting ..."),
            StatusEvent::Connected => {
                println!("/> connected");
                collector.start_session(&args.label, args.minutes)?;
                println!("/> collecting for {}m", args.minutes);
            }
            StatusEvent::ConnectFailed(reason) => bail!("failed to connect: {reason}"),
            StatusEvent::Tick {
                remaining_seconds,
                progress_percent,
            } => println!("/> {remaining_seconds}s remaining ({progress_percent}%)"),
            StatusEvent::LinkLost(reason) => println!("/> link lost: {reason}"),
            StatusEvent::SessionFinished => println!("/> session finished, submitting ..."),
            StatusEvent::SubmissionResult(outcome) => {
                println!("/> {outcome}");
                break;
            }
        }
    }
    Ok(())
}
