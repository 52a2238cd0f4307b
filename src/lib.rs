// Tailwind - audio playback controller for the Halcyon music player
// Module declarations
pub mod audio;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod logging;
pub mod metadata;
pub mod settings;

pub use audio::{
    AudioFormat, ControlBank, CpalOutput, DecodeStream, FileFormat, MediaSource, NullOutput,
    OutputLine, OutputProvider, PlayerState, StreamProvider, SymphoniaProvider, Tailwind,
    TailwindBuilder,
};
pub use diagnostics::DiagnosticLog;
pub use error::{Result, TailwindError};
pub use events::{EventManager, TailwindStatus};
pub use metadata::{MediaInfo, MetadataExtractor};
pub use settings::{BufferSize, PlayerSettings};
