//! # Servo Calibration
//!
//! Per-channel left/right servo angles, persisted in a small TOML
//! preference file and rewritten on every change.
//!
//! Angles are stored as `|`-joined strings so the file stays hand-editable:
//!
//! ```toml
//! channel_angles_left = "20|20|25|20|20|20|20|20|20|20|20|20|20|20|20|20"
//! channel_angles_right = "40|40|70|40|40|40|40|40|40|40|40|40|40|40|40|40"
//! selected_channel = 2
//! ```
//!
//! An empty or missing string means "every channel at its default".

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::device::Pca9685;
use crate::error::{PeriphLinkError, Result};

/// Separator between angles in a stored list
pub const ANGLE_SEPARATOR: char = '|';

/// Default number of calibrated channels
pub const DEFAULT_CHANNELS: u8 = 16;

/// Default left angle in degrees
pub const DEFAULT_LEFT_ANGLE: u16 = 20;

/// Default right angle in degrees
pub const DEFAULT_RIGHT_ANGLE: u16 = 40;

/// Which end of its travel a servo was last driven to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServoPosition {
    Left,
    Right,
}

impl ServoPosition {
    pub fn toggled(self) -> Self {
        match self {
            ServoPosition::Left => ServoPosition::Right,
            ServoPosition::Right => ServoPosition::Left,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PreferenceFile {
    #[serde(default)]
    channel_angles_left: String,
    #[serde(default)]
    channel_angles_right: String,
    #[serde(default)]
    selected_channel: u8,
}

/// Parse a stored angle list
///
/// An empty string yields `channels` copies of `default`. A list shorter
/// than `channels` is padded with `default`; extra entries are dropped.
///
/// # Errors
///
/// `Calibration` if an entry is not an integer angle.
///
/// # Examples
///
/// ```
/// use periphlink::calibration::parse_angles;
///
/// assert_eq!(parse_angles("10|20|30", 3, 0).unwrap(), vec![10, 20, 30]);
/// assert_eq!(parse_angles("", 2, 20).unwrap(), vec![20, 20]);
/// ```
pub fn parse_angles(value: &str, channels: u8, default: u16) -> Result<Vec<u16>> {
    let channels = usize::from(channels);
    if value.trim().is_empty() {
        return Ok(vec![default; channels]);
    }

    let mut angles = value
        .split(ANGLE_SEPARATOR)
        .map(|entry| {
            entry.trim().parse::<u16>().map_err(|e| {
                PeriphLinkError::Calibration(format!("invalid angle {:?}: {}", entry, e))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if angles.len() != channels {
        warn!(
            "Calibration lists {} angles for {} channels, adjusting",
            angles.len(),
            channels
        );
        angles.resize(channels, default);
    }
    Ok(angles)
}

/// Join angles for storage
pub fn join_angles(angles: &[u16]) -> String {
    angles
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(&ANGLE_SEPARATOR.to_string())
}

/// Calibrated servo end points for every channel
#[derive(Debug, Clone)]
pub struct ServoCalibration {
    path: Option<PathBuf>,
    left: Vec<u16>,
    right: Vec<u16>,
    selected_channel: u8,
    positions: Vec<Option<ServoPosition>>,
}

impl ServoCalibration {
    /// In-memory calibration with every channel at its defaults
    pub fn new(channels: u8, default_left: u16, default_right: u16) -> Self {
        let count = usize::from(channels);
        Self {
            path: None,
            left: vec![default_left; count],
            right: vec![default_right; count],
            selected_channel: 0,
            positions: vec![None; count],
        }
    }

    /// Load calibration from `path`, falling back to defaults when the file
    /// does not exist yet
    ///
    /// Every later change is written back to `path`.
    ///
    /// # Errors
    ///
    /// I/O errors other than a missing file, TOML errors, or `Calibration`
    /// for malformed angle lists.
    pub fn load<P: AsRef<Path>>(
        path: P,
        channels: u8,
        default_left: u16,
        default_right: u16,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut calibration = Self::new(channels, default_left, default_right);
        calibration.path = Some(path.to_path_buf());

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No calibration at {}, using defaults", path.display());
                return Ok(calibration);
            }
            Err(e) => return Err(e.into()),
        };
        let prefs: PreferenceFile = toml::from_str(&contents)?;

        calibration.left = parse_angles(&prefs.channel_angles_left, channels, default_left)?;
        calibration.right = parse_angles(&prefs.channel_angles_right, channels, default_right)?;
        calibration.selected_channel = if prefs.selected_channel < channels {
            prefs.selected_channel
        } else {
            0
        };
        debug!("Loaded calibration for {} channels", channels);
        Ok(calibration)
    }

    pub fn channels(&self) -> u8 {
        self.left.len() as u8
    }

    pub fn left_angle(&self, channel: u8) -> Result<u16> {
        Ok(self.left[self.index(channel)?])
    }

    pub fn right_angle(&self, channel: u8) -> Result<u16> {
        Ok(self.right[self.index(channel)?])
    }

    pub fn set_left(&mut self, channel: u8, angle: u16) -> Result<()> {
        let index = self.index(channel)?;
        self.left[index] = angle;
        self.save()
    }

    pub fn set_right(&mut self, channel: u8, angle: u16) -> Result<()> {
        let index = self.index(channel)?;
        self.right[index] = angle;
        self.save()
    }

    pub fn selected_channel(&self) -> u8 {
        self.selected_channel
    }

    pub fn select_channel(&mut self, channel: u8) -> Result<()> {
        self.index(channel)?;
        self.selected_channel = channel;
        self.save()
    }

    /// Last position a channel was driven to, if any
    pub fn position(&self, channel: u8) -> Option<ServoPosition> {
        self.positions.get(usize::from(channel)).copied().flatten()
    }

    /// Flip a channel to its other end and return the new position and the
    /// angle to drive
    ///
    /// A channel never driven before goes Left first.
    pub fn toggle(&mut self, channel: u8) -> Result<(ServoPosition, u16)> {
        let index = self.index(channel)?;
        let next = match self.positions[index] {
            Some(ServoPosition::Left) => ServoPosition::Right,
            _ => ServoPosition::Left,
        };
        self.positions[index] = Some(next);
        let angle = match next {
            ServoPosition::Left => self.left[index],
            ServoPosition::Right => self.right[index],
        };
        Ok((next, angle))
    }

    /// Toggle `channel` and drive the servo there
    pub fn toggle_servo(&mut self, servo: &mut Pca9685, channel: u8) -> Result<ServoPosition> {
        let (position, angle) = self.toggle(channel)?;
        servo.set_servo_angle(channel, angle)?;
        info!("Channel {} {:?} ({} deg)", channel, position, angle);
        Ok(position)
    }

    /// Write the preference file; a no-op for in-memory calibration
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let prefs = PreferenceFile {
            channel_angles_left: join_angles(&self.left),
            channel_angles_right: join_angles(&self.right),
            selected_channel: self.selected_channel,
        };
        fs::write(path, toml::to_string(&prefs)?)?;
        debug!("Calibration saved to {}", path.display());
        Ok(())
    }

    fn index(&self, channel: u8) -> Result<usize> {
        let index = usize::from(channel);
        if index >= self.left.len() {
            return Err(PeriphLinkError::Calibration(format!(
                "channel {} out of range (0-{})",
                channel,
                self.left.len().saturating_sub(1)
            )));
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::sim::SimI2c;
    use crate::device::pca9685::PCA9685_ADDRESS;
    use tempfile::TempDir;

    #[test]
    fn test_parse_and_join() {
        assert_eq!(parse_angles("20|35|40", 3, 0).unwrap(), vec![20, 35, 40]);
        assert_eq!(join_angles(&[20, 35, 40]), "20|35|40");
        assert_eq!(join_angles(&[]), "");
    }

    #[test]
    fn test_parse_pads_and_truncates() {
        assert_eq!(parse_angles("1|2", 4, 9).unwrap(), vec![1, 2, 9, 9]);
        assert_eq!(parse_angles("1|2|3", 2, 9).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_angles("20|abc|40", 3, 0),
            Err(PeriphLinkError::Calibration(_))
        ));
        assert!(parse_angles("20||40", 3, 0).is_err());
    }

    #[test]
    fn test_defaults() {
        let calibration = ServoCalibration::new(DEFAULT_CHANNELS, DEFAULT_LEFT_ANGLE, DEFAULT_RIGHT_ANGLE);
        assert_eq!(calibration.channels(), 16);
        assert_eq!(calibration.left_angle(15).unwrap(), 20);
        assert_eq!(calibration.right_angle(0).unwrap(), 40);
        assert!(calibration.left_angle(16).is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let calibration = ServoCalibration::load(dir.path().join("prefs.toml"), 16, 20, 40).unwrap();

        assert_eq!(calibration.left_angle(3).unwrap(), 20);
        assert_eq!(calibration.selected_channel(), 0);
    }

    #[test]
    fn test_changes_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.toml");

        let mut calibration = ServoCalibration::load(&path, 16, 20, 40).unwrap();
        calibration.set_left(2, 25).unwrap();
        calibration.set_right(2, 70).unwrap();
        calibration.select_channel(2).unwrap();

        let stored = fs::read_to_string(&path).unwrap();
        assert!(stored.contains("channel_angles_left = \"20|20|25|20"));

        let reloaded = ServoCalibration::load(&path, 16, 20, 40).unwrap();
        assert_eq!(reloaded.left_angle(2).unwrap(), 25);
        assert_eq!(reloaded.right_angle(2).unwrap(), 70);
        assert_eq!(reloaded.selected_channel(), 2);
    }

    #[test]
    fn test_empty_strings_mean_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.toml");
        fs::write(&path, "channel_angles_left = \"\"\nselected_channel = 99\n").unwrap();

        let calibration = ServoCalibration::load(&path, 16, 20, 40).unwrap();
        assert_eq!(calibration.left_angle(0).unwrap(), 20);
        assert_eq!(calibration.right_angle(0).unwrap(), 40);
        assert_eq!(calibration.selected_channel(), 0);
    }

    #[test]
    fn test_toggle_alternates_starting_left() {
        let mut calibration = ServoCalibration::new(4, 20, 40);
        assert_eq!(calibration.position(1), None);

        assert_eq!(calibration.toggle(1).unwrap(), (ServoPosition::Left, 20));
        assert_eq!(calibration.toggle(1).unwrap(), (ServoPosition::Right, 40));
        assert_eq!(calibration.toggle(1).unwrap(), (ServoPosition::Left, 20));
        assert_eq!(calibration.position(1), Some(ServoPosition::Left));
        assert_eq!(ServoPosition::Left.toggled(), ServoPosition::Right);
    }

    #[test]
    fn test_toggle_servo_drives_channel() {
        let bus = SimI2c::new();
        let mut servo = Pca9685::new(Box::new(bus.clone()), PCA9685_ADDRESS);
        let mut calibration = ServoCalibration::new(16, 0, 180);

        assert_eq!(calibration.toggle_servo(&mut servo, 0).unwrap(), ServoPosition::Left);
        // Channel 0 OFF_L/OFF_H at 0x08/0x09: 0 deg maps to 145 ticks
        assert_eq!(bus.register(PCA9685_ADDRESS, 0x08), 145);
        assert_eq!(bus.register(PCA9685_ADDRESS, 0x09), 0);

        calibration.toggle_servo(&mut servo, 0).unwrap();
        // 180 deg maps to 580 ticks = 0x0244
        assert_eq!(bus.register(PCA9685_ADDRESS, 0x08), 0x44);
        assert_eq!(bus.register(PCA9685_ADDRESS, 0x09), 0x02);
    }
}
