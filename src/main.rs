use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use score_bridge::{
    Args, Command, Composition, ExportOptions, export_midi_file, import_midi_file,
    parse_channel_policy,
};
use std::fs;

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::Import {
            midi,
            json,
            max_notes,
        } => {
            info!("Importing MIDI file: '{}'...", midi.display());
            let imported = import_midi_file(&midi)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&imported)?);
                return Ok(());
            }

            info!(
                "{} notes, {} time signature(s), {} marker(s), {} tempo change(s), resolution {}",
                imported.notes.len(),
                imported.time_signatures.len(),
                imported.markers.len(),
                imported.tempo_track.tempo_changes.len(),
                imported.time_resolution
            );

            for (i, timed) in imported.notes.iter().take(max_notes).enumerate() {
                info!(
                    "Note {}: pitch={} vel={} beat={:.3} dur={:.3} bar={} beat={} sub={}/{}",
                    i,
                    timed.note.pitch,
                    timed.note.velocity,
                    timed.timestamp,
                    timed.note.duration,
                    timed.bar_beat.bar,
                    timed.bar_beat.beat,
                    timed.bar_beat.sub_beat,
                    timed.bar_beat.sub_beat_divisor
                );
            }
            for signature in imported.time_signatures.iter() {
                info!(
                    "Time signature {}/{} at beat {:.3}",
                    signature.numerator,
                    1u32 << signature.denominator_log.min(31),
                    signature.timestamp
                );
            }
            for marker in imported.markers.iter() {
                info!("Marker at beat {:.3}", marker);
            }
        }
        Command::Export {
            document,
            output,
            time_resolution,
            channels,
        } => {
            let raw = fs::read_to_string(&document)
                .with_context(|| format!("Failed to read {}", document.display()))?;
            let composition: Composition = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid composition document {}", document.display()))?;

            debug!(
                "Loaded '{}' with {} part(s), {} measure(s), tempo {}, progression: {}",
                composition.name(),
                composition.number_of_parts(),
                composition.number_of_measures(),
                composition.tempo(),
                composition.chord_progression()
            );

            let options = ExportOptions {
                time_resolution,
                setup_channels: parse_channel_policy(&channels),
            };
            let written = export_midi_file(&composition, &options, &output)?;
            info!("Wrote '{}'", written.display());
        }
    }

    Ok(())
}
