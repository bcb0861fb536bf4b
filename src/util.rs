use crate::SetupChannelPolicy;
use log::info;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub fn parse_channel_policy(input: &str) -> SetupChannelPolicy {
    match input.to_lowercase().as_str() {
        "i" | "index" | "part-index" => SetupChannelPolicy::PartIndex,
        "u" | "uniform" => SetupChannelPolicy::Uniform,
        other => match other.parse::<u8>() {
            Ok(channel) if channel < 16 => SetupChannelPolicy::Fixed(channel),
            _ => {
                info!("Unknown channel policy '{}', defaulting to `index`..!", other);
                SetupChannelPolicy::PartIndex
            }
        },
    }
}

/// Appends `.mid` unless the path already ends with it.
pub fn with_midi_extension(path: &Path) -> PathBuf {
    if path.to_string_lossy().ends_with(".mid") {
        return path.to_path_buf();
    }

    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(".mid");
    PathBuf::from(raw)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn channel_policy_strings() {
        env_logger::try_init().unwrap_or(());

        assert_eq!(parse_channel_policy("Index"), SetupChannelPolicy::PartIndex);
        assert_eq!(parse_channel_policy("u"), SetupChannelPolicy::Uniform);
        assert_eq!(parse_channel_policy("9"), SetupChannelPolicy::Fixed(9));
        assert_eq!(parse_channel_policy("16"), SetupChannelPolicy::PartIndex);
        assert_eq!(parse_channel_policy("banana"), SetupChannelPolicy::PartIndex);
    }

    #[test]
    fn midi_extension() {
        assert_eq!(with_midi_extension(Path::new("out/song")), PathBuf::from("out/song.mid"));
        assert_eq!(with_midi_extension(Path::new("song.mid")), PathBuf::from("song.mid"));
        assert_eq!(with_midi_extension(Path::new("song.midi")), PathBuf::from("song.midi.mid"));
        assert_eq!(with_midi_extension(Path::new("take.2")), PathBuf::from("take.2.mid"));
    }
}
