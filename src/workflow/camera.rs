//! Camera declarations passed to recording stages.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 30;

/// One OpenCV camera attached to the rig.
///
/// Parsed from `name:source[:WxH[@fps]]`, where `source` is a device path
/// (`/dev/video6`) or a bare V4L2 index (`6`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraSpec {
    pub name: String,
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl CameraSpec {
    /// Creates a camera with the default 640x480@30 stream.
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
        }
    }

    /// Device node the camera is read from.
    pub fn device_path(&self) -> PathBuf {
        match self.source.parse::<u32>() {
            Ok(index) => PathBuf::from(format!("/dev/video{index}")),
            Err(_) => PathBuf::from(&self.source),
        }
    }

    /// Entry in the toolkit's `--robot.cameras` mapping.
    pub fn toolkit_entry(&self) -> String {
        format!(
            "{}: {{type: opencv, index_or_path: {}, width: {}, height: {}, fps: {}}}",
            self.name, self.source, self.width, self.height, self.fps
        )
    }
}

impl Default for CameraSpec {
    fn default() -> Self {
        Self::new("front", "/dev/video6")
    }
}

impl std::fmt::Display for CameraSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}x{}@{}",
            self.name, self.source, self.width, self.height, self.fps
        )
    }
}

impl FromStr for CameraSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let name = parts.next().unwrap_or_default().trim();
        let source = parts.next().unwrap_or_default().trim();

        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(format!("Invalid camera name in '{}'", s));
        }
        if source.is_empty() {
            return Err(format!("Missing camera source in '{}' (expected name:source)", s));
        }

        let mut camera = CameraSpec::new(name, source);

        if let Some(mode) = parts.next() {
            let (size, fps) = match mode.split_once('@') {
                Some((size, fps)) => (size, Some(fps)),
                None => (mode, None),
            };
            let (width, height) = size
                .split_once('x')
                .ok_or_else(|| format!("Invalid camera resolution '{}' (expected WxH)", size))?;
            camera.width = parse_positive(width, "width")?;
            camera.height = parse_positive(height, "height")?;
            if let Some(fps) = fps {
                camera.fps = parse_positive(fps, "fps")?;
            }
        }

        Ok(camera)
    }
}

fn parse_positive(value: &str, what: &str) -> Result<u32, String> {
    match value.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("Invalid camera {}: '{}'", what, value)),
    }
}

/// Renders the toolkit's `--robot.cameras` mapping for a camera set.
pub fn toolkit_cameras(cameras: &[CameraSpec]) -> String {
    if cameras.is_empty() {
        return "{}".to_string();
    }
    let entries: Vec<String> = cameras.iter().map(CameraSpec::toolkit_entry).collect();
    format!("{{ {}}}", entries.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_spec() {
        let camera: CameraSpec = "wrist:/dev/video2:1280x720@15".parse().unwrap();
        assert_eq!(camera.name, "wrist");
        assert_eq!(camera.source, "/dev/video2");
        assert_eq!((camera.width, camera.height, camera.fps), (1280, 720, 15));
    }

    #[test]
    fn test_parse_defaults_and_index() {
        let camera: CameraSpec = "front:6".parse().unwrap();
        assert_eq!((camera.width, camera.height, camera.fps), (640, 480, 30));
        assert_eq!(camera.device_path(), PathBuf::from("/dev/video6"));
    }

    #[test]
    fn test_parse_errors() {
        assert!("front".parse::<CameraSpec>().is_err());
        assert!(":/dev/video0".parse::<CameraSpec>().is_err());
        assert!("front:/dev/video0:640".parse::<CameraSpec>().is_err());
        assert!("front:/dev/video0:640x0".parse::<CameraSpec>().is_err());
    }

    #[test]
    fn test_toolkit_cameras() {
        let cameras = vec![CameraSpec::default(), CameraSpec::new("wrist", "2")];
        assert_eq!(
            toolkit_cameras(&cameras),
            "{ front: {type: opencv, index_or_path: /dev/video6, width: 640, height: 480, fps: 30}, \
             wrist: {type: opencv, index_or_path: 2, width: 640, height: 480, fps: 30}}"
        );
        assert_eq!(toolkit_cameras(&[]), "{}");
    }

    #[test]
    fn test_display_roundtrips() {
        let camera = CameraSpec::default();
        assert_eq!(camera.to_string().parse::<CameraSpec>().unwrap(), camera);
    }
}
