//! Global output settings
//!
//! Master intensity and tint applied to every layer, plus the selected output display.

use serde::{Deserialize, Serialize};

use super::layer::Color;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
    /// Master intensity (0.0 to 1.0)
    pub intensity: f32,
    pub tint: Color,
    /// Display the output surface is shown on, `null` when none is chosen
    #[serde(default)]
    pub output_display_id: Option<String>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            intensity: 1.0,
            tint: Color::WHITE,
            output_display_id: None,
        }
    }
}

impl GlobalSettings {
    /// Tint scaled by intensity, the factor every layer color is multiplied by
    pub fn color_scale(&self) -> [f32; 3] {
        [
            self.tint.r * self.intensity,
            self.tint.g * self.intensity,
            self.tint.b * self.intensity,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_neutral() {
        let global = GlobalSettings::default();
        assert_eq!(global.color_scale(), [1.0, 1.0, 1.0]);
        assert!(global.output_display_id.is_none());

        let json = serde_json::to_value(&global).unwrap();
        assert!(json["outputDisplayId"].is_null());
    }

    #[test]
    fn test_color_scale_applies_intensity() {
        let global = GlobalSettings {
            intensity: 0.5,
            tint: Color::rgb(1.0, 0.5, 0.0),
            output_display_id: None,
        };
        assert_eq!(global.color_scale(), [0.5, 0.25, 0.0]);
    }
}
