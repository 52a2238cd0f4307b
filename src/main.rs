// Command-line player: opens one file, plays it to the end and exits
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use tailwind::{DiagnosticLog, NullOutput, PlayerSettings, Tailwind, TailwindStatus};

#[derive(Debug, Parser)]
#[command(name = "tailwind", about = "Play an audio file to the end")]
struct Cli {
    /// Audio file to play
    file: PathBuf,

    /// Start this many milliseconds into the file
    #[arg(long, value_name = "MS")]
    seek: Option<i64>,

    /// Master gain in decibels
    #[arg(long, value_name = "DB", allow_hyphen_values = true)]
    gain: Option<f32>,

    /// Discard audio instead of using the output device
    #[arg(long)]
    null_output: bool,

    /// Settings directory
    #[arg(long, value_name = "DIR")]
    settings: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tailwind::logging::init("info");

    let settings_dir = cli.settings.clone().unwrap_or_else(PlayerSettings::default_dir);
    let settings = PlayerSettings::load(&settings_dir)
        .with_context(|| format!("load settings from {}", settings_dir.display()))?;
    let diagnostics = DiagnosticLog::from_settings(
        &settings.diagnostics,
        settings.diagnostics_dir(&settings_dir),
    );

    let mut builder = Tailwind::builder().settings(settings).diagnostics(diagnostics);
    if cli.null_output {
        builder = builder.output_provider(NullOutput::realtime());
    }
    let player = builder.build();

    player.add_generic_listener(|media| {
        println!(
            "{} - {} ({})",
            media.artist.as_deref().unwrap_or("Unknown artist"),
            media.title,
            media.album.as_deref().unwrap_or("Unknown album"),
        );
    });
    player.add_error_listener(|message| eprintln!("error: {}", message));
    let last_second = Arc::new(AtomicU64::new(0));
    player.add_time_listener(move |ms| {
        let second = ms / 1000;
        if last_second.swap(second, Ordering::Relaxed) != second {
            info!("{}:{:02}", second / 60, second % 60);
        }
    });
    let statuses = player.subscribe_status();

    player
        .open(&cli.file)
        .with_context(|| format!("open {}", cli.file.display()))?;
    info!("Length: {} ms", player.length());

    if let Some(gain) = cli.gain {
        let applied = player.set_gain(gain)?;
        info!("Gain set to {} dB", applied);
    }
    if let Some(seek) = cli.seek {
        player.seek_to(seek)?;
    }
    player.play()?;

    for status in statuses {
        match status {
            TailwindStatus::End => break,
            TailwindStatus::Closed if !player.is_open() => bail!("playback stopped unexpectedly"),
            _ => {}
        }
    }
    player.close();
    Ok(())
}
