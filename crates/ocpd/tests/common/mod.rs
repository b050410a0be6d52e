//! Fake timecard class directory for integration tests.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

#![allow(dead_code)]

use std::ffi::CString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ocp_core::DeviceRoot;
use ocpd::{Engine, EngineConfig};
use tempfile::TempDir;

/// Upper bound on any single await in a test, so regressions fail instead
/// of hanging.
pub const TEST_GUARD: Duration = Duration::from_secs(10);

/// A `/sys/class/timecard`-like tree with one `ocp0` device.
pub struct FakeDevice {
    dir: TempDir,
    root: PathBuf,
}

impl FakeDevice {
    /// Device with only the always-available attributes.
    pub fn minimal() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let root = dir.path().join("ocp0");
        fs::create_dir(&root).expect("create device root");

        let device = Self { dir, root };
        device.write("serialnum", "OCP-TEST-0001");
        device.write("available_clock_sources", "NONE PPS GNSS MAC");
        device.write("clock_source", "GNSS");
        device.write("gnss_sync", "SYNC");
        device.write("clock_status_drift", "0.5");
        device.write("clock_status_offset", "-3");
        device.write("utc_tai_offset", "37");
        device
    }

    /// Device exposing every optional group with four instances each.
    pub fn full() -> Self {
        let device = Self::minimal();
        device.write("available_sma_inputs", "PPS1 PPS2 TS1 10Mhz None");
        device.write("available_sma_outputs", "10Mhz PHC MAC GNSS1 None");
        for n in 1..=4 {
            device.write(&format!("sma{n}"), "PPS1");
            device.write(&format!("sma{n}_out"), "PHC");
        }

        device.write("tod_protocol", "UBX");
        device.write("available_tod_protocols", "NMEA UBX");
        device.write("tod_baud_rate", "115200");
        device.write("available_tod_baud_rates", "9600 115200");
        device.write("tod_correction", "0");
        device.write("irig_b_mode", "3");

        for n in 1..=4 {
            device.write(&format!("gen{n}/duty"), "50");
            device.write(&format!("gen{n}/period"), "1000000000");
            device.write(&format!("gen{n}/phase"), "0");
            device.write(&format!("gen{n}/polarity"), "1");
            device.write(&format!("gen{n}/running"), "0");
            device.write(&format!("gen{n}/start"), "0.000000000");
            device.write(&format!("gen{n}/signal"), "1000000000 50 0 1");
            device.write(&format!("freq{n}/frequency"), "10000000");
            device.write(&format!("freq{n}/seconds"), "1");
            device.write(&format!("ts{n}/enable"), "1");
        }

        device.link("ptp", "ptp3");
        device.link("pps", "pps1");
        device
    }

    /// Points `leaf` at a directory named `target` outside the device root,
    /// like the `ptp` and `pps` class links.
    pub fn link(&self, leaf: &str, target: &str) {
        let target = self.dir.path().join("links").join(target);
        fs::create_dir_all(&target).expect("create link target");
        std::os::unix::fs::symlink(&target, self.path(leaf)).expect("create link");
    }

    pub fn class_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn root(&self) -> DeviceRoot {
        DeviceRoot::new(&self.root)
    }

    pub fn path(&self, leaf: &str) -> PathBuf {
        self.root.join(leaf)
    }

    pub fn write(&self, leaf: &str, value: &str) {
        let path = self.path(leaf);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, format!("{value}\n")).expect("write leaf");
    }

    pub fn read(&self, leaf: &str) -> String {
        fs::read_to_string(self.path(leaf)).expect("read leaf")
    }

    pub fn remove(&self, leaf: &str) {
        fs::remove_file(self.path(leaf)).expect("remove leaf");
    }

    /// Replaces `leaf` with a FIFO. Opening it for reading blocks until a
    /// writer appears, which never happens: a model of a wedged attribute.
    pub fn make_stuck(&self, leaf: &str) {
        let path = self.path(leaf);
        let _ = fs::remove_file(&path);
        let c_path = CString::new(path.as_os_str().as_bytes()).expect("path without NUL");
        let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o644) };
        assert_eq!(rc, 0, "mkfifo failed for {}", path.display());
    }

    pub fn config(&self, read_timeout_ms: u64) -> EngineConfig {
        EngineConfig {
            device_path: Some(self.root.clone()),
            class_dir: self.dir.path().to_path_buf(),
            read_timeout_ms,
            ..Default::default()
        }
    }

    pub fn engine(&self, read_timeout_ms: u64) -> Engine {
        Engine::new(self.root(), &self.config(read_timeout_ms))
    }
}
