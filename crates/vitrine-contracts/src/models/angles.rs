use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Camera presets for catalog shots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraAngle {
    #[default]
    Front,
    FrontThreeQuarterLeft,
    FrontThreeQuarterRight,
    LeftProfile,
    RightProfile,
    Back,
}

impl CameraAngle {
    pub const ALL: [CameraAngle; 6] = [
        CameraAngle::Front,
        CameraAngle::FrontThreeQuarterLeft,
        CameraAngle::FrontThreeQuarterRight,
        CameraAngle::LeftProfile,
        CameraAngle::RightProfile,
        CameraAngle::Back,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Front => "front",
            Self::FrontThreeQuarterLeft => "front_three_quarter_left",
            Self::FrontThreeQuarterRight => "front_three_quarter_right",
            Self::LeftProfile => "left_profile",
            Self::RightProfile => "right_profile",
            Self::Back => "back",
        }
    }

    pub fn instruction(self) -> &'static str {
        match self {
            Self::Front => "Camera faces the garment straight on at chest height, body square to the lens.",
            Self::FrontThreeQuarterLeft => "Camera is rotated 45 degrees to the subject's left, showing the front and left side of the garment.",
            Self::FrontThreeQuarterRight => "Camera is rotated 45 degrees to the subject's right, showing the front and right side of the garment.",
            Self::LeftProfile => "Pure left side profile, 90 degrees from the front; the left seam line runs through the center of the frame.",
            Self::RightProfile => "Pure right side profile, 90 degrees from the front; the right seam line runs through the center of the frame.",
            Self::Back => "Camera faces the back of the garment straight on; no front details are visible.",
        }
    }
}

impl fmt::Display for CameraAngle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CameraAngle {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw
            .trim()
            .to_ascii_lowercase()
            .replace(['-', ' ', '/'], "_");
        let angle = match normalized.as_str() {
            "" | "front" => Self::Front,
            "front_three_quarter_left" | "front_3_4_left" | "three_quarter_left" => {
                Self::FrontThreeQuarterLeft
            }
            "front_three_quarter_right" | "front_3_4_right" | "three_quarter_right" => {
                Self::FrontThreeQuarterRight
            }
            "left_profile" | "left" | "profile_left" => Self::LeftProfile,
            "right_profile" | "right" | "profile_right" => Self::RightProfile,
            "back" | "rear" => Self::Back,
            _ => return Err(format!("unknown camera angle '{raw}'")),
        };
        Ok(angle)
    }
}
