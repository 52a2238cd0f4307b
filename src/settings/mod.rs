// Player settings
pub mod settings;

pub use settings::{BufferSize, DiagnosticsSettings, PlayerSettings};
