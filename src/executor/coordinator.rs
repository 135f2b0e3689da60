// bbox [x0, y0, x1, y1] <-> actuator rectangle {x, y, width, height}.
use serde::{Deserialize, Serialize};

use crate::agent_engine::state::GroundingResult;
use crate::errors::BubbleResult;
use crate::perception::types::BBox;

/// The shape the downstream actuator consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAction {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub icon: u32,
    pub reason: String,
    pub action: String,
}

impl ResolvedAction {
    pub fn to_bbox(&self) -> BubbleResult<BBox> {
        BBox::new(self.x, self.y, self.x + self.width, self.y + self.height)
    }

    /// Center point in image pixels, where a click would land.
    pub fn click_point(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

impl From<&GroundingResult> for ResolvedAction {
    fn from(result: &GroundingResult) -> Self {
        let [x0, y0, _, _] = result.bbox.coords();
        Self {
            x: x0,
            y: y0,
            width: result.bbox.width(),
            height: result.bbox.height(),
            icon: result.icon_id,
            reason: result.reason.clone(),
            action: result.action.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grounding(coords: [f64; 4]) -> GroundingResult {
        GroundingResult {
            icon_id: 3,
            bbox: BBox::try_from(coords).unwrap(),
            reason: "matches Save button".into(),
            action: "Click the Save button".into(),
        }
    }

    #[test]
    fn test_save_button_rectangle() {
        let action = ResolvedAction::from(&grounding([100.0, 200.0, 140.0, 220.0]));
        assert_eq!((action.x, action.y, action.width, action.height), (100.0, 200.0, 40.0, 20.0));
        assert_eq!(action.icon, 3);
        assert_eq!(action.click_point(), (120.0, 210.0));
    }

    #[test]
    fn test_pixel_boxes_round_trip_exactly() {
        for coords in [
            [100.0, 200.0, 140.0, 220.0],
            [0.0, 0.0, 1.0, 1.0],
            [12.5, 7.5, 1919.5, 1079.0],
            [1024.0, 33.0, 2560.0, 1440.0],
        ] {
            let action = ResolvedAction::from(&grounding(coords));
            assert_eq!(action.to_bbox().unwrap().coords(), coords);
        }
    }

    #[test]
    fn test_serializes_actuator_shape() {
        let action = ResolvedAction::from(&grounding([100.0, 200.0, 140.0, 220.0]));
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "x": 100.0, "y": 200.0, "width": 40.0, "height": 20.0, "icon": 3,
                "reason": "matches Save button", "action": "Click the Save button"
            })
        );
    }
}
