//! evento_ctl - headless control surface
//!
//! Switches the producer's mode and event type, edits ROI documents and
//! pulls the latest published frames out of the shared database.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use evento::control::ControlPlane;
use evento::storage::FrameLog;
use evento::{
    decode_frame, AppMode, EventType, RoiConfigStore, RoiSlot, SqliteControlPlane,
    SqliteFrameLog,
};

#[derive(Parser, Debug)]
#[command(name = "evento_ctl", about = "Control surface for the evento producer")]
struct Args {
    /// SQLite file shared with the producer.
    #[arg(long, global = true, default_value = "evento.db")]
    db: String,
    /// Frame log stream name.
    #[arg(long, global = true, default_value = "camera:0")]
    stream: String,
    /// Directory holding the per-event ROI documents.
    #[arg(long, global = true, default_value = "config")]
    config_dir: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Unset,
    Configuring,
    Streaming,
}

impl From<ModeArg> for AppMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Unset => AppMode::Unset,
            ModeArg::Configuring => AppMode::Configuring,
            ModeArg::Streaming => AppMode::Streaming,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EventArg {
    EventStat,
    AlertStranger,
    MonitorVehicle,
}

impl From<EventArg> for EventType {
    fn from(arg: EventArg) -> Self {
        match arg {
            EventArg::EventStat => EventType::EventStat,
            EventArg::AlertStranger => EventType::AlertStranger,
            EventArg::MonitorVehicle => EventType::MonitorVehicle,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show mode, event type and the latest frame log record
    Status,

    /// Set the producer mode
    Mode {
        #[arg(value_enum)]
        mode: ModeArg,
    },

    /// Select the active event type
    Event {
        #[arg(value_enum)]
        event: EventArg,
    },

    /// Inspect or edit an event's regions
    Roi {
        #[command(subcommand)]
        action: RoiAction,
    },

    /// Save the latest annotated frame from the frame log
    Latest {
        #[arg(long)]
        out: PathBuf,
    },

    /// Save the latest raw frame published for an event
    Snapshot {
        #[arg(long, value_enum)]
        event: EventArg,
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum RoiAction {
    /// Print every slot's vertices
    Show {
        #[arg(long, value_enum)]
        event: EventArg,
    },
    /// Create empty documents for every event type that has none
    Init,
    /// Append a vertex to a slot
    Add {
        #[arg(long, value_enum)]
        event: EventArg,
        /// Slot number, 1-5.
        #[arg(long)]
        slot: usize,
        #[arg(long)]
        x: i32,
        #[arg(long)]
        y: i32,
    },
    /// Remove the most recently added vertex of a slot
    Undo {
        #[arg(long, value_enum)]
        event: EventArg,
        #[arg(long)]
        slot: usize,
    },
    /// Empty every slot of an event
    Clear {
        #[arg(long, value_enum)]
        event: EventArg,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let store = RoiConfigStore::new(&args.config_dir);

    match args.command {
        Command::Status => cmd_status(&args.db, &args.stream),
        Command::Mode { mode } => {
            let mut control = SqliteControlPlane::open(&args.db)?;
            let mode = AppMode::from(mode);
            control.set_mode(mode)?;
            println!("mode set to {}", mode);
            Ok(())
        }
        Command::Event { event } => {
            let event = EventType::from(event);
            // refuse to point the producer at regions it cannot load
            store.load(event)?;
            let mut control = SqliteControlPlane::open(&args.db)?;
            control.set_event_type(event)?;
            println!("event type set to {}", event);
            Ok(())
        }
        Command::Roi { action } => cmd_roi(&store, action),
        Command::Latest { out } => {
            let log = SqliteFrameLog::open_existing(&args.db, &args.stream)?;
            let record = log
                .latest()?
                .ok_or_else(|| anyhow!("frame log {} is empty", args.stream))?;
            save_frame(&record.image, &out)?;
            println!("record #{} {} -> {}", record.sequence, record.metadata, out.display());
            Ok(())
        }
        Command::Snapshot { event, out } => {
            let event = EventType::from(event);
            let control = SqliteControlPlane::open(&args.db)?;
            let encoded = control
                .latest_raw_frame(event)?
                .ok_or_else(|| anyhow!("no raw frame published for {}", event))?;
            save_frame(&encoded, &out)?;
            println!("{} raw frame -> {}", event, out.display());
            Ok(())
        }
    }
}

fn cmd_status(db: &str, stream: &str) -> Result<()> {
    let control = SqliteControlPlane::open(db)?;
    println!("=== evento status ({}) ===", db);
    match control.read_mode() {
        Ok(mode) => println!("Mode:       {}", mode),
        Err(e) => println!("Mode:       <{}>", e),
    }
    match control.read_event_type() {
        Ok(event) => println!("Event type: {}", event),
        Err(e) => println!("Event type: <{}>", e),
    }

    match SqliteFrameLog::open_existing(db, stream) {
        Ok(log) => {
            println!("Frame log:  {} ({}/{} records)", stream, log.len()?, log.capacity());
            if let Some(record) = log.latest()? {
                println!("Latest:     #{} at {} {}", record.sequence, record.created_at, record.metadata);
            }
        }
        Err(e) => println!("Frame log:  <{}>", e),
    }
    Ok(())
}

fn cmd_roi(store: &RoiConfigStore, action: RoiAction) -> Result<()> {
    match action {
        RoiAction::Show { event } => {
            let config = store.load(event.into())?;
            println!("=== {} ({}) ===", config.event_type(), store.path_for(config.event_type()).display());
            for region in config.regions() {
                let state = if region.is_active() { "active" } else { "inactive" };
                println!("{} [{}]: {:?}", region.slot, state, region.vertices);
            }
        }
        RoiAction::Init => {
            for event in EventType::ALL {
                store.init(event)?;
            }
            println!("ROI documents ready in {}", store.dir().display());
        }
        RoiAction::Add { event, slot, x, y } => {
            let slot = parse_slot(slot)?;
            let mut config = store.load(event.into())?;
            if config.add_point(slot, x, y) {
                store.save(&config)?;
                println!("{}: added ({}, {})", slot, x, y);
            } else {
                println!("{}: ({}, {}) already present", slot, x, y);
            }
        }
        RoiAction::Undo { event, slot } => {
            let slot = parse_slot(slot)?;
            let mut config = store.load(event.into())?;
            match config.remove_last_point(slot) {
                Some([x, y]) => {
                    store.save(&config)?;
                    println!("{}: removed ({}, {})", slot, x, y);
                }
                None => println!("{}: no vertices", slot),
            }
        }
        RoiAction::Clear { event } => {
            let mut config = store.load(event.into())?;
            config.clear();
            store.save(&config)?;
            println!("{}: all regions cleared", config.event_type());
        }
    }
    Ok(())
}

fn parse_slot(number: usize) -> Result<RoiSlot> {
    RoiSlot::from_number(number).ok_or_else(|| anyhow!("slot must be 1-5, got {}", number))
}

fn save_frame(encoded: &str, out: &Path) -> Result<()> {
    let frame = decode_frame(encoded)?;
    frame
        .save(out)
        .with_context(|| format!("failed to write {}", out.display()))
}
