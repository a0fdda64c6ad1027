//! Hardware abstractions for the dual-view rig.
//!
//! The rig has two fixed views, each made of one camera and one illumination
//! source. Drivers implement the capability traits in [`capabilities`]; the
//! simulated devices in [`mock`] are used by tests and the CLI, and [`rig`]
//! connects everything and decides which views take part in a run.

pub mod capabilities;
pub mod mock;
pub mod rig;

pub use capabilities::{AcquisitionMode, Camera, Illuminator};
pub use rig::{Rig, ViewPair};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the two fixed camera/illuminator positions of the rig.
///
/// The ordering is significant: `Y` is index 0 and `X` is index 1. The index
/// decides the fetch order within a frame and names the `c{index}` dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum View {
    /// View index 0.
    Y,
    /// View index 1.
    X,
}

impl View {
    /// Both views in fetch order.
    pub const ALL: [View; 2] = [View::Y, View::X];

    /// Fixed index of the view.
    pub fn index(self) -> usize {
        match self {
            View::Y => 0,
            View::X => 1,
        }
    }

    /// Short name used in settings and dataset attributes.
    pub fn as_str(self) -> &'static str {
        match self {
            View::Y => "Y",
            View::X => "X",
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for View {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Y" | "y" => Ok(View::Y),
            "X" | "x" => Ok(View::X),
            other => Err(format!("Unknown view '{}'. Must be one of: Y, X", other)),
        }
    }
}

/// A single 16-bit image frame.
///
/// Pixels are stored row-major, `height` rows of `width` pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Width in pixels
    pub width: usize,
    /// Height in pixels
    pub height: usize,
    /// Raw pixel data
    pub pixels: Vec<u16>,
}

impl Frame {
    /// Create a frame, checking the buffer length against the geometry.
    pub fn new(width: usize, height: usize, pixels: Vec<u16>) -> anyhow::Result<Self> {
        if pixels.len() != width * height {
            anyhow::bail!(
                "Frame buffer has {} pixels, expected {}x{} = {}",
                pixels.len(),
                height,
                width,
                width * height
            );
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Frame filled with a single value.
    pub fn filled(width: usize, height: usize, value: u16) -> Self {
        Self {
            width,
            height,
            pixels: vec![value; width * height],
        }
    }

    /// `(height, width)`, the order used for dataset shapes.
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Pixel at column `x`, row `y`.
    pub fn get(&self, x: usize, y: usize) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get(y * self.width + x).copied()
    }

    /// Smallest and largest pixel value, `None` for an empty frame.
    pub fn min_max(&self) -> Option<(u16, u16)> {
        let mut iter = self.pixels.iter().copied();
        let first = iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_order_and_index() {
        assert_eq!(View::Y.index(), 0);
        assert_eq!(View::X.index(), 1);
        assert!(View::Y < View::X);
        assert_eq!(View::ALL, [View::Y, View::X]);
    }

    #[test]
    fn test_view_parse() {
        assert_eq!("Y".parse::<View>().unwrap(), View::Y);
        assert_eq!("x".parse::<View>().unwrap(), View::X);
        assert!("Z".parse::<View>().is_err());
    }

    #[test]
    fn test_frame_new_checks_length() {
        assert!(Frame::new(4, 3, vec![0; 12]).is_ok());
        assert!(Frame::new(4, 3, vec![0; 11]).is_err());
    }

    #[test]
    fn test_frame_accessors() {
        let frame = Frame::new(3, 2, vec![5, 1, 9, 4, 7, 2]).unwrap();
        assert_eq!(frame.shape(), (2, 3));
        assert_eq!(frame.get(2, 0), Some(9));
        assert_eq!(frame.get(0, 1), Some(4));
        assert_eq!(frame.get(3, 0), None);
        assert_eq!(frame.min_max(), Some((1, 9)));
    }
}
