mod midi_exporter;
mod midi_importer;
mod model;
mod sequence;
mod util;

pub use midi_exporter::*;
pub use midi_importer::*;
pub use model::composition::*;
pub use model::config::*;
pub use model::event::*;
pub use sequence::*;
pub use util::*;
