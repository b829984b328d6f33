//! Linux sysfs GPIO backend.
//!
//! Lines are exported through `<root>/export` and driven through the
//! `direction` and `value` attributes of `<root>/gpio<N>/`. The root defaults
//! to `/sys/class/gpio`; tests point it at a temporary directory.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::hardware::{DigitalIo, Direction, HardwareError, HwResult, LineId};

/// Default sysfs GPIO class directory.
pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";

/// GPIO lines accessed through the sysfs class interface.
#[derive(Debug)]
pub struct SysfsGpio {
    root: PathBuf,
    requested: HashSet<LineId>,
    /// Lines this instance exported and should unexport on drop
    exported: Vec<LineId>,
}

impl SysfsGpio {
    /// Backend rooted at `root`, usually [`DEFAULT_SYSFS_ROOT`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            requested: HashSet::new(),
            exported: Vec::new(),
        }
    }

    /// The sysfs class directory in use.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn line_dir(&self, line: LineId) -> PathBuf {
        self.root.join(format!("gpio{}", line.0))
    }

    fn attribute(&self, line: LineId, name: &str) -> HwResult<PathBuf> {
        if !self.requested.contains(&line) {
            return Err(HardwareError::LineNotRequested { line });
        }
        Ok(self.line_dir(line).join(name))
    }

    /// Unexport every line this instance exported.
    pub fn release(&mut self) {
        for line in self.exported.drain(..) {
            let path = self.root.join("unexport");
            if let Err(source) = fs::write(&path, line.0.to_string()) {
                warn!(%line, error = %source, "Failed to unexport GPIO line");
            }
        }
        self.requested.clear();
    }
}

impl Default for SysfsGpio {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_ROOT)
    }
}

impl Drop for SysfsGpio {
    fn drop(&mut self) {
        self.release();
    }
}

impl DigitalIo for SysfsGpio {
    fn request_line(&mut self, line: LineId) -> HwResult<()> {
        if !self.line_dir(line).exists() {
            fs::write(self.root.join("export"), line.0.to_string())
                .map_err(|source| HardwareError::Io { line, source })?;
            self.exported.push(line);
            debug!(%line, "Exported GPIO line");
        }
        self.requested.insert(line);
        Ok(())
    }

    fn set_direction(&mut self, line: LineId, direction: Direction) -> HwResult<()> {
        let path = self.attribute(line, "direction")?;
        fs::write(path, direction.as_sysfs()).map_err(|source| HardwareError::Io { line, source })
    }

    fn read_line(&mut self, line: LineId) -> HwResult<bool> {
        let path = self.attribute(line, "value")?;
        let raw = fs::read_to_string(path).map_err(|source| HardwareError::Io { line, source })?;
        match raw.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(HardwareError::Fault {
                line,
                message: format!("unexpected value '{other}'"),
            }),
        }
    }

    fn write_line(&mut self, line: LineId, value: bool) -> HwResult<()> {
        let path = self.attribute(line, "value")?;
        fs::write(path, if value { "1" } else { "0" })
            .map_err(|source| HardwareError::Io { line, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_line(root: &Path, number: u32, value: &str) {
        let dir = root.join(format!("gpio{number}"));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("value"), value).unwrap();
        fs::write(dir.join("direction"), "in").unwrap();
    }

    #[test]
    fn reads_and_writes_value_attribute() {
        let tmp = TempDir::new().unwrap();
        fake_line(tmp.path(), 11, "1\n");
        fake_line(tmp.path(), 19, "0\n");

        let mut gpio = SysfsGpio::new(tmp.path());
        gpio.request_line(LineId(11)).unwrap();
        gpio.request_line(LineId(19)).unwrap();
        gpio.set_direction(LineId(19), Direction::Output).unwrap();

        assert!(gpio.read_line(LineId(11)).unwrap());
        gpio.write_line(LineId(19), true).unwrap();

        let dir = tmp.path().join("gpio19");
        assert_eq!(fs::read_to_string(dir.join("value")).unwrap(), "1");
        assert_eq!(fs::read_to_string(dir.join("direction")).unwrap(), "out");
    }

    #[test]
    fn missing_line_is_exported_then_unexported() {
        let tmp = TempDir::new().unwrap();
        let mut gpio = SysfsGpio::new(tmp.path());

        gpio.request_line(LineId(5)).unwrap();
        assert_eq!(fs::read_to_string(tmp.path().join("export")).unwrap(), "5");

        // The kernel would create gpio5/; without it the attribute write fails.
        assert!(matches!(
            gpio.set_direction(LineId(5), Direction::Input),
            Err(HardwareError::Io { line: LineId(5), .. })
        ));

        drop(gpio);
        assert_eq!(fs::read_to_string(tmp.path().join("unexport")).unwrap(), "5");
    }

    #[test]
    fn garbage_value_is_a_fault() {
        let tmp = TempDir::new().unwrap();
        fake_line(tmp.path(), 2, "x");
        let mut gpio = SysfsGpio::new(tmp.path());
        gpio.request_line(LineId(2)).unwrap();

        assert!(matches!(
            gpio.read_line(LineId(2)),
            Err(HardwareError::Fault { .. })
        ));
    }

    #[test]
    fn unrequested_line_is_rejected() {
        let tmp = TempDir::new().unwrap();
        fake_line(tmp.path(), 3, "0");
        let mut gpio = SysfsGpio::new(tmp.path());

        assert!(matches!(
            gpio.read_line(LineId(3)),
            Err(HardwareError::LineNotRequested { .. })
        ));
    }
}
