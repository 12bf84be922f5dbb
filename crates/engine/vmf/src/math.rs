//! Vector parsing/formatting and Source-style orientations

use crate::error::{Error, Result};
use glam::{DMat3, DVec3};
use serde::{Deserialize, Serialize};

/// Format a number the way map files expect it
///
/// Values are rounded to 6 decimal places, integers print without a
/// fractional part and negative zero prints as `0`.
pub fn format_num(value: f64) -> String {
    let rounded = (value * 1e6).round() / 1e6;
    if rounded == 0.0 {
        return "0".to_string();
    }
    if rounded.fract() == 0.0 && rounded.abs() < 1e15 {
        return format!("{}", rounded as i64);
    }
    let text = format!("{rounded:.6}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Format a vector as `x y z`
pub fn format_vec(v: DVec3) -> String {
    format!("{} {} {}", format_num(v.x), format_num(v.y), format_num(v.z))
}

/// Parse `x y z`, optionally wrapped in `()` or `[]`
pub fn parse_vec(text: &str) -> Result<DVec3> {
    let trimmed = text
        .trim()
        .trim_start_matches(['(', '['])
        .trim_end_matches([')', ']']);
    let mut parts = trimmed.split_whitespace().map(str::parse::<f64>);
    let invalid = || Error::InvalidValue {
        kind: "vector",
        value: text.to_string(),
    };
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(Ok(x)), Some(Ok(y)), Some(Ok(z)), None) => Ok(DVec3::new(x, y, z)),
        _ => Err(invalid()),
    }
}

/// Parse a vector, falling back to zero for blank or malformed text
pub fn parse_vec_or_zero(text: &str) -> DVec3 {
    if text.trim().is_empty() {
        return DVec3::ZERO;
    }
    match parse_vec(text) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("{e}, using 0 0 0");
            DVec3::ZERO
        }
    }
}

fn snap(value: f64) -> f64 {
    let nearest = value.round();
    if (value - nearest).abs() < 1e-6 {
        nearest + 0.0
    } else {
        value
    }
}

fn snap_vec(v: DVec3) -> DVec3 {
    DVec3::new(snap(v.x), snap(v.y), snap(v.z))
}

/// Rotation expressed as forward/left/up basis columns
///
/// Local `x` maps to forward, `y` to left and `z` to up, matching how the
/// game interprets entity `angles` (pitch, yaw, roll in degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    mat: DMat3,
}

impl Default for Orientation {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Orientation {
    pub const IDENTITY: Orientation = Orientation {
        mat: DMat3::IDENTITY,
    };

    /// Build from basis vectors
    pub fn from_axes(forward: DVec3, left: DVec3, up: DVec3) -> Self {
        Orientation {
            mat: DMat3::from_cols(forward, left, up),
        }
    }

    /// Build from Source angles in degrees
    pub fn from_angles(pitch: f64, yaw: f64, roll: f64) -> Self {
        let (sin_p, cos_p) = pitch.to_radians().sin_cos();
        let (sin_y, cos_y) = yaw.to_radians().sin_cos();
        let (sin_r, cos_r) = roll.to_radians().sin_cos();

        let forward = DVec3::new(cos_p * cos_y, cos_p * sin_y, -sin_p);
        let left = DVec3::new(
            sin_p * sin_r * cos_y - cos_r * sin_y,
            sin_p * sin_r * sin_y + cos_r * cos_y,
            sin_r * cos_p,
        );
        let up = DVec3::new(
            sin_p * cos_r * cos_y + sin_r * sin_y,
            sin_p * cos_r * sin_y - sin_r * cos_y,
            cos_r * cos_p,
        );
        Self::from_axes(snap_vec(forward), snap_vec(left), snap_vec(up))
    }

    /// Parse an `angles` keyvalue (`pitch yaw roll`)
    pub fn parse(text: &str) -> Result<Self> {
        let v = parse_vec(text)?;
        Ok(Self::from_angles(v.x, v.y, v.z))
    }

    pub fn forward(&self) -> DVec3 {
        self.mat.x_axis
    }

    pub fn left(&self) -> DVec3 {
        self.mat.y_axis
    }

    pub fn up(&self) -> DVec3 {
        self.mat.z_axis
    }

    /// Rotate a local vector into the parent frame
    pub fn rotate(&self, v: DVec3) -> DVec3 {
        snap_vec(self.mat * v)
    }

    /// Rotate back from the parent frame into local space
    pub fn unrotate(&self, v: DVec3) -> DVec3 {
        snap_vec(self.mat.transpose() * v)
    }

    /// Apply `self` first, then `outer`
    pub fn then(&self, outer: &Orientation) -> Orientation {
        Orientation {
            mat: outer.mat * self.mat,
        }
    }

    pub fn inverse(&self) -> Orientation {
        Orientation {
            mat: self.mat.transpose(),
        }
    }

    /// Convert back into `(pitch, yaw, roll)` degrees in `[0, 360)`
    pub fn to_angles(&self) -> DVec3 {
        let forward = self.forward();
        let left = self.left();
        let up = self.up();
        let horiz = (forward.x * forward.x + forward.y * forward.y).sqrt();

        let (pitch, yaw, roll) = if horiz > 0.001 {
            (
                (-forward.z).atan2(horiz),
                forward.y.atan2(forward.x),
                left.z.atan2(up.z),
            )
        } else {
            ((-forward.z).atan2(horiz), (-left.x).atan2(left.y), 0.0)
        };
        let wrap = |rad: f64| {
            let deg = snap(rad.to_degrees()).rem_euclid(360.0);
            snap(deg) % 360.0
        };
        DVec3::new(wrap(pitch), wrap(yaw), wrap(roll))
    }

    /// Format as an `angles` keyvalue
    pub fn to_angles_str(&self) -> String {
        format_vec(self.to_angles())
    }

    /// True if every basis vector points along a world axis
    pub fn is_axis_aligned(&self) -> bool {
        [self.forward(), self.left(), self.up()]
            .iter()
            .all(|v| v.abs().max_element() == 1.0 && v.abs().element_sum() == 1.0)
    }
}

/// Round each component to the nearest multiple of `grid`
pub fn round_grid(v: DVec3, grid: f64) -> DVec3 {
    (v / grid).round() * grid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_num() {
        assert_eq!(format_num(12.0), "12");
        assert_eq!(format_num(-0.0), "0");
        assert_eq!(format_num(-0.0000001), "0");
        assert_eq!(format_num(0.25), "0.25");
        assert_eq!(format_num(-1.5), "-1.5");
        assert_eq!(format_num(1.0 / 3.0), "0.333333");
    }

    #[test]
    fn test_parse_vec() {
        assert_eq!(parse_vec("1 2 3").unwrap(), DVec3::new(1.0, 2.0, 3.0));
        assert_eq!(parse_vec("(1 -2 3.5)").unwrap(), DVec3::new(1.0, -2.0, 3.5));
        assert!(parse_vec("1 2").is_err());
        assert!(parse_vec("1 2 3 4").is_err());
        assert_eq!(parse_vec_or_zero(""), DVec3::ZERO);
    }

    #[test]
    fn test_yaw_rotation() {
        let orient = Orientation::from_angles(0.0, 90.0, 0.0);
        assert_eq!(orient.forward(), DVec3::Y);
        assert_eq!(orient.left(), DVec3::NEG_X);
        assert_eq!(orient.up(), DVec3::Z);
        assert_eq!(orient.rotate(DVec3::new(64.0, 0.0, 0.0)), DVec3::new(0.0, 64.0, 0.0));
    }

    #[test]
    fn test_pitch_points_down() {
        let orient = Orientation::from_angles(90.0, 0.0, 0.0);
        assert_eq!(orient.forward(), DVec3::NEG_Z);
        assert!(orient.is_axis_aligned());
    }

    #[test]
    fn test_angles_round_trip() {
        for (p, y, r) in [(0.0, 0.0, 0.0), (0.0, 270.0, 0.0), (90.0, 180.0, 0.0), (0.0, 90.0, 90.0)] {
            let orient = Orientation::from_angles(p, y, r);
            let back = orient.to_angles();
            let again = Orientation::from_angles(back.x, back.y, back.z);
            assert_eq!(orient, again, "angles {p} {y} {r} gave {back}");
        }
    }

    #[test]
    fn test_inverse_undoes_rotation() {
        let orient = Orientation::from_angles(0.0, 90.0, 90.0);
        let v = DVec3::new(1.0, 2.0, 3.0);
        assert_eq!(orient.unrotate(orient.rotate(v)), v);
        assert_eq!(orient.then(&orient.inverse()), Orientation::IDENTITY);
    }
}
