//! Tiny CLI glue (C13), `spec.md` §2's C13 row: reads/writes the
//! preferences file and opens the audio device it describes. Not a full
//! control client (that's the "host CLI" `spec.md` §1 places out of
//! scope) — just enough to start the engine, prove a device opens, and
//! let a preference be set from the command line, grounded on the
//! subcommand shape `clap::Subcommand` gives the other example pack
//! repo's own audio CLI.

use std::path::PathBuf;
use std::time::Duration;

use arco::prefs::Prefs;
use arco::{CpalBackend, CpalBackendOptions, Engine, LoggingControlService};
use clap::{Parser, Subcommand};
use cpal::traits::{DeviceTrait, HostTrait};

#[derive(Parser)]
#[command(name = "arco-cli")]
#[command(about = "Open an Arco audio device and hold it open for a while.")]
struct Cli {
    /// Preferences file to read/write, `spec.md` §6.
    #[arg(long, default_value = "arco_prefs.txt")]
    prefs: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List output devices cpal can see.
    Devices,
    /// Set the preferred output device name and save it.
    SetOutputDevice { name: String },
    /// Open the preferred device and hold the stream open for `seconds`.
    Run {
        #[arg(long, default_value_t = 2.0)]
        seconds: f32,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Devices => {
            let host = cpal::default_host();
            for device in host.output_devices()? {
                println!("{}", device.name()?);
            }
        }
        Command::SetOutputDevice { name } => {
            let mut prefs = Prefs::load(&cli.prefs)?;
            prefs.audio_out_name = Some(name);
            prefs.save(&cli.prefs)?;
        }
        Command::Run { seconds } => {
            let prefs = Prefs::load(&cli.prefs)?;
            let device = prefs.audio_out_name.clone().unwrap_or_else(|| "default".into());
            let backend = CpalBackend::new(CpalBackendOptions { device, verbose: true })?;
            let mut engine = Engine::start(Box::new(backend), Box::new(LoggingControlService))?;
            log::info!("engine running, clock at {:.3}s", engine.clock_seconds());
            std::thread::sleep(Duration::from_secs_f32(seconds));
            engine.stop()?;
        }
    }
    Ok(())
}
