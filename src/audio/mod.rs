// Audio playback module
// Uses Symphonia for decoding and cpal for output

pub mod controls;
pub mod decoder;
pub mod format;
pub mod null;
pub mod output;
pub mod player;
pub mod resample;
mod workers;

pub use controls::{BooleanControl, Control, ControlBank, EnumControl, FloatControl};
pub use decoder::{DecodeStream, StreamProvider, SymphoniaProvider};
pub use format::{AudioFormat, FileFormat};
pub use null::NullOutput;
pub use output::{CpalOutput, OutputLine, OutputProvider};
pub use player::{MediaSource, PlayerState, Tailwind, TailwindBuilder};
