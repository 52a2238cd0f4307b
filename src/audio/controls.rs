// Named line controls (gain, balance, pan, mute) and the bank that holds them
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::format::AudioFormat;
use crate::error::{Result, TailwindError};

pub const MASTER_GAIN: &str = "Master Gain";
pub const BALANCE: &str = "Balance";
pub const PAN: &str = "Pan";
pub const MUTE: &str = "Mute";

/// Gain range of the standard master gain control, in decibels
pub const MIN_GAIN_DB: f32 = -80.0;
pub const MAX_GAIN_DB: f32 = 6.0206;

const SHIFT_STEP: Duration = Duration::from_millis(10);

/// A bounded numeric control. Clones share the same value.
#[derive(Debug, Clone)]
pub struct FloatControl {
    name: String,
    units: String,
    min: f32,
    max: f32,
    value: Arc<Mutex<f32>>,
}

impl FloatControl {
    pub fn new(name: &str, min: f32, max: f32, initial: f32, units: &str) -> Self {
        Self {
            name: name.to_string(),
            units: units.to_string(),
            min,
            max,
            value: Arc::new(Mutex::new(initial.clamp(min, max))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn units(&self) -> &str {
        &self.units
    }

    pub fn minimum(&self) -> f32 {
        self.min
    }

    pub fn maximum(&self) -> f32 {
        self.max
    }

    pub fn value(&self) -> f32 {
        *self.value.lock()
    }

    /// Set the value, clamped to [min, max]. Returns the applied value.
    pub fn set_value(&self, value: f32) -> f32 {
        let clamped = if value.is_nan() {
            self.min
        } else {
            value.clamp(self.min, self.max)
        };
        *self.value.lock() = clamped;
        clamped
    }

    /// Move linearly from `from` to `to` over `duration`, blocking the caller
    pub fn shift(&self, from: f32, to: f32, duration: Duration) {
        let start = Instant::now();
        self.set_value(from);
        while start.elapsed() < duration {
            let progress = start.elapsed().as_secs_f32() / duration.as_secs_f32();
            self.set_value(from + (to - from) * progress.min(1.0));
            thread::sleep(SHIFT_STEP);
        }
        self.set_value(to);
    }
}

/// An on/off control. Clones share the same value.
#[derive(Debug, Clone)]
pub struct BooleanControl {
    name: String,
    value: Arc<AtomicBool>,
}

impl BooleanControl {
    pub fn new(name: &str, initial: bool) -> Self {
        Self {
            name: name.to_string(),
            value: Arc::new(AtomicBool::new(initial)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> bool {
        self.value.load(Ordering::Relaxed)
    }

    pub fn set_value(&self, value: bool) {
        self.value.store(value, Ordering::Relaxed);
    }
}

/// A control that selects one of a fixed set of values
#[derive(Debug, Clone)]
pub struct EnumControl {
    name: String,
    values: Arc<Vec<String>>,
    selected: Arc<Mutex<usize>>,
}

impl EnumControl {
    pub fn new(name: &str, values: Vec<String>, initial: usize) -> Self {
        let initial = initial.min(values.len().saturating_sub(1));
        Self {
            name: name.to_string(),
            values: Arc::new(values),
            selected: Arc::new(Mutex::new(initial)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn value(&self) -> Option<&str> {
        self.values.get(*self.selected.lock()).map(String::as_str)
    }

    /// Select `value`. Returns false if it is not one of the allowed values.
    pub fn set_value(&self, value: &str) -> bool {
        match self.values.iter().position(|v| v == value) {
            Some(index) => {
                *self.selected.lock() = index;
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Control {
    Float(FloatControl),
    Boolean(BooleanControl),
    Enum(EnumControl),
}

impl Control {
    pub fn name(&self) -> &str {
        match self {
            Control::Float(c) => c.name(),
            Control::Boolean(c) => c.name(),
            Control::Enum(c) => c.name(),
        }
    }

    /// Copy the value of a control of the same kind. Returns false when the
    /// kinds differ.
    fn copy_from(&self, previous: &Control) -> bool {
        match (self, previous) {
            (Control::Float(new), Control::Float(old)) => {
                new.set_value(old.value());
                true
            }
            (Control::Boolean(new), Control::Boolean(old)) => {
                new.set_value(old.value());
                true
            }
            (Control::Enum(new), Control::Enum(old)) => match old.value() {
                Some(value) => new.set_value(value),
                None => false,
            },
            _ => false,
        }
    }
}

/// Controls a line exposes for a given source format: master gain and mute
/// always, balance for stereo and pan for mono sources.
pub fn standard_controls(format: &AudioFormat) -> Vec<Control> {
    let mut controls = vec![
        Control::Float(FloatControl::new(MASTER_GAIN, MIN_GAIN_DB, MAX_GAIN_DB, 0.0, "dB")),
        Control::Boolean(BooleanControl::new(MUTE, false)),
    ];
    match format.channels {
        1 => controls.push(Control::Float(FloatControl::new(PAN, -1.0, 1.0, 0.0, ""))),
        2 => controls.push(Control::Float(FloatControl::new(BALANCE, -1.0, 1.0, 0.0, ""))),
        _ => {}
    }
    controls
}

/// Convert a gain in decibels to a linear amplitude factor
pub fn db_to_linear(db: f32) -> f32 {
    if db <= MIN_GAIN_DB {
        0.0
    } else {
        10f32.powf(db / 20.0)
    }
}

/// Named controls of the currently open line
#[derive(Debug, Clone, Default)]
pub struct ControlBank {
    controls: BTreeMap<String, Control>,
}

impl ControlBank {
    /// Build a bank from the controls a freshly opened line reports, carrying
    /// over values from `previous` for controls with the same name and kind.
    pub fn snapshot(line_controls: Vec<Control>, previous: Option<&ControlBank>) -> Self {
        let mut controls = BTreeMap::new();
        for control in line_controls {
            if let Some(old) = previous.and_then(|bank| bank.get(control.name())) {
                control.copy_from(old);
            }
            controls.insert(control.name().to_string(), control);
        }
        Self { controls }
    }

    pub fn get(&self, name: &str) -> Option<&Control> {
        self.controls.get(name)
    }

    pub fn float(&self, name: &str) -> Result<&FloatControl> {
        match self.controls.get(name) {
            Some(Control::Float(control)) => Ok(control),
            _ => Err(TailwindError::UnsupportedControl(name.to_string())),
        }
    }

    pub fn boolean(&self, name: &str) -> Result<&BooleanControl> {
        match self.controls.get(name) {
            Some(Control::Boolean(control)) => Ok(control),
            _ => Err(TailwindError::UnsupportedControl(name.to_string())),
        }
    }

    pub fn enumerated(&self, name: &str) -> Result<&EnumControl> {
        match self.controls.get(name) {
            Some(Control::Enum(control)) => Ok(control),
            _ => Err(TailwindError::UnsupportedControl(name.to_string())),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.controls.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_control_clamps() {
        let gain = FloatControl::new(MASTER_GAIN, MIN_GAIN_DB, MAX_GAIN_DB, 0.0, "dB");
        assert_eq!(gain.set_value(100.0), MAX_GAIN_DB);
        assert_eq!(gain.set_value(-1000.0), MIN_GAIN_DB);
        assert_eq!(gain.set_value(-6.0), -6.0);
        assert_eq!(gain.value(), -6.0);
    }

    #[test]
    fn test_clones_share_value() {
        let pan = FloatControl::new(PAN, -1.0, 1.0, 0.0, "");
        let handle = pan.clone();
        handle.set_value(0.5);
        assert_eq!(pan.value(), 0.5);
    }

    #[test]
    fn test_enum_control_rejects_unknown_values() {
        let reverb = EnumControl::new("Reverb", vec!["None".into(), "Hall".into()], 0);
        assert!(reverb.set_value("Hall"));
        assert!(!reverb.set_value("Cathedral"));
        assert_eq!(reverb.value(), Some("Hall"));
    }

    #[test]
    fn test_standard_controls_by_channel_count() {
        let stereo = ControlBank::snapshot(standard_controls(&AudioFormat::pcm16(44100, 2)), None);
        assert!(stereo.float(BALANCE).is_ok());
        assert!(stereo.float(PAN).is_err());

        let mono = ControlBank::snapshot(standard_controls(&AudioFormat::pcm16(44100, 1)), None);
        assert!(mono.float(PAN).is_ok());
        assert!(mono.float(BALANCE).is_err());
        assert!(mono.boolean(MUTE).is_ok());
    }

    #[test]
    fn test_snapshot_carries_over_matching_values() {
        let format = AudioFormat::pcm16(44100, 2);
        let first = ControlBank::snapshot(standard_controls(&format), None);
        first.float(MASTER_GAIN).unwrap().set_value(-12.0);
        first.boolean(MUTE).unwrap().set_value(true);

        let second = ControlBank::snapshot(standard_controls(&format), Some(&first));
        assert_eq!(second.float(MASTER_GAIN).unwrap().value(), -12.0);
        assert!(second.boolean(MUTE).unwrap().value());
        assert_eq!(second.float(BALANCE).unwrap().value(), 0.0);
    }

    #[test]
    fn test_snapshot_ignores_kind_mismatch() {
        let old = ControlBank::snapshot(vec![Control::Boolean(BooleanControl::new(PAN, true))], None);
        let new = ControlBank::snapshot(
            vec![Control::Float(FloatControl::new(PAN, -1.0, 1.0, 0.25, ""))],
            Some(&old),
        );
        assert_eq!(new.float(PAN).unwrap().value(), 0.25);
    }

    #[test]
    fn test_missing_control_is_unsupported() {
        let bank = ControlBank::default();
        assert!(matches!(
            bank.float(MASTER_GAIN),
            Err(TailwindError::UnsupportedControl(name)) if name == MASTER_GAIN
        ));
    }

    #[test]
    fn test_db_to_linear() {
        assert_eq!(db_to_linear(MIN_GAIN_DB), 0.0);
        assert!((db_to_linear(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_linear(-6.0206) - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_shift_reaches_target() {
        let gain = FloatControl::new(MASTER_GAIN, MIN_GAIN_DB, MAX_GAIN_DB, 0.0, "dB");
        gain.shift(0.0, MIN_GAIN_DB, Duration::from_millis(30));
        assert_eq!(gain.value(), MIN_GAIN_DB);
    }
}
