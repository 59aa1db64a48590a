use crate::{common::*, unit::OrigPixel};

/// A detected object in original image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub rect: OrigPixel<CyCxHW<f64>>,
    pub class_id: usize,
    /// `objectness * class probability`, in range `[0, 1]`.
    pub confidence: f64,
}

impl Detection {
    pub fn to_record(&self) -> DetectionRecord {
        let [t, l, h, w] = self.rect.tlhw();
        DetectionRecord {
            class_id: self.class_id,
            confidence: self.confidence,
            x: l,
            y: t,
            w,
            h,
        }
    }
}

/// Flat form of a [`Detection`], with top-left `x`, `y`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub class_id: usize,
    pub confidence: f64,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_uses_top_left_corner() {
        let detection = Detection {
            rect: OrigPixel(CyCxHW::try_from_cycxhw([50.0, 40.0, 20.0, 10.0]).unwrap()),
            class_id: 2,
            confidence: 0.75,
        };
        let record = detection.to_record();
        assert_eq!(
            record,
            DetectionRecord {
                class_id: 2,
                confidence: 0.75,
                x: 35.0,
                y: 40.0,
                w: 10.0,
                h: 20.0,
            }
        );

        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"class_id":2,"confidence":0.75,"x":35.0,"y":40.0,"w":10.0,"h":20.0}"#
        );
    }
}
