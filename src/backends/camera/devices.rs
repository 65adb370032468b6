// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 device discovery for `camfx list-devices`

use std::os::unix::io::{AsRawFd, RawFd};
use tracing::debug;

/// VIDIOC_QUERYCAP ioctl number
const VIDIOC_QUERYCAP: libc::c_ulong = 0x80685600;

/// V4L2 capability flag for single-planar video capture
const V4L2_CAP_VIDEO_CAPTURE: u32 = 0x00000001;

/// V4L2 capability structure for VIDIOC_QUERYCAP ioctl
#[repr(C)]
struct V4l2Capability {
    driver: [u8; 16],
    card: [u8; 32],
    bus_info: [u8; 32],
    version: u32,
    capabilities: u32,
    device_caps: u32,
    reserved: [u32; 3],
}

/// A `/dev/video*` node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// N in `/dev/videoN`; the value for `--input`
    pub index: u32,
    pub path: String,
    /// Name from sysfs, falling back to the V4L2 card name
    pub name: String,
    pub driver: String,
    /// Whether the node can capture video (metadata nodes cannot)
    pub can_capture: bool,
}

/// Issue `VIDIOC_QUERYCAP` on an open file descriptor
fn query_v4l2_cap(fd: RawFd) -> Option<V4l2Capability> {
    let mut cap: V4l2Capability = unsafe { std::mem::zeroed() };
    let result = unsafe { libc::ioctl(fd, VIDIOC_QUERYCAP as _, &mut cap as *mut V4l2Capability) };
    if result < 0 { None } else { Some(cap) }
}

/// NUL-terminated C string field to String
fn c_field(bytes: &[u8]) -> String {
    let len = bytes.iter().position(|&c| c == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).trim().to_string()
}

/// Parse N from a `videoN` node name
pub fn parse_video_index(name: &str) -> Option<u32> {
    name.strip_prefix("video")?.parse().ok()
}

fn query_device(index: u32) -> DeviceInfo {
    let path = format!("/dev/video{}", index);
    let sysfs_name = std::fs::read_to_string(format!("/sys/class/video4linux/video{}/name", index))
        .unwrap_or_default()
        .trim()
        .to_string();

    let cap = std::fs::File::open(&path)
        .ok()
        .and_then(|file| query_v4l2_cap(file.as_raw_fd()));

    let (driver, card, can_capture) = match cap {
        Some(cap) => {
            // Use device_caps if available, otherwise capabilities
            let caps = if cap.device_caps != 0 {
                cap.device_caps
            } else {
                cap.capabilities
            };
            (
                c_field(&cap.driver),
                c_field(&cap.card),
                caps & V4L2_CAP_VIDEO_CAPTURE != 0,
            )
        }
        None => (String::new(), String::new(), false),
    };

    let name = if !sysfs_name.is_empty() {
        sysfs_name
    } else if !card.is_empty() {
        card
    } else {
        format!("video{}", index)
    };

    debug!(path = %path, name = %name, driver = %driver, can_capture, "Probed V4L2 device");
    DeviceInfo {
        index,
        path,
        name,
        driver,
        can_capture,
    }
}

/// Enumerate `/dev/video*` in index order
pub fn list_devices() -> Vec<DeviceInfo> {
    let entries = match std::fs::read_dir("/dev") {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut indices: Vec<u32> = entries
        .flatten()
        .filter_map(|entry| parse_video_index(&entry.file_name().to_string_lossy()))
        .collect();
    indices.sort_unstable();

    indices.into_iter().map(query_device).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_video_index() {
        assert_eq!(parse_video_index("video0"), Some(0));
        assert_eq!(parse_video_index("video12"), Some(12));
        assert_eq!(parse_video_index("videox"), None);
        assert_eq!(parse_video_index("v4l-subdev0"), None);
    }

    #[test]
    fn test_c_field() {
        assert_eq!(c_field(b"uvcvideo\0\0\0\0"), "uvcvideo");
        assert_eq!(c_field(b"full"), "full");
    }
}
