use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "score_bridge",
    about = "Translate between MIDI files and structured part/measure compositions"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Read a MIDI file and report its notes, time signatures and markers.
    Import {
        /// Path to the source MIDI file.
        midi: PathBuf,

        /// Print the whole import result as JSON instead of a summary.
        #[arg(short, long, default_value_t = false)]
        json: bool,

        /// Maximum notes to list in the summary.
        #[arg(long, default_value_t = 80)]
        max_notes: usize,
    },

    /// Write a JSON composition document out as a MIDI file.
    Export {
        /// Path to the composition document (JSON).
        document: PathBuf,

        /// Destination MIDI file. `.mid` is appended when missing.
        output: PathBuf,

        /// Ticks per quarter note in the written file.
        #[arg(short, long, default_value_t = 480)]
        time_resolution: u32,

        /// Channel for each part's setup events: index|uniform|<0-15>.
        #[arg(short, long, default_value = "index")]
        channels: String,
    },
}
