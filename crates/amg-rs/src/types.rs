use serde::{Deserialize, Serialize};

use crate::error::{AmgError, AmgResult};

/// Crop or image bounds `[x0, y0, x1, y1]` in original-image pixels.
pub type CropBox = [i32; 4];

/// Uncompressed run-length encoding of a binary mask, in the COCO
/// `{"size": [h, w], "counts": [...]}` shape.
///
/// Deserializing rejects objects with keys other than `size` and `counts`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Rle {
    /// `[height, width]` of the encoded mask.
    pub size: [u32; 2],
    /// Run counts: alternating runs of 0s and 1s, starting with 0s, column-major.
    pub counts: Vec<u32>,
}

impl Rle {
    pub fn new(h: u32, w: u32, counts: Vec<u32>) -> Self {
        Rle {
            size: [h, w],
            counts,
        }
    }

    #[inline]
    pub fn h(&self) -> u32 {
        self.size[0]
    }

    #[inline]
    pub fn w(&self) -> u32 {
        self.size[1]
    }

    /// Number of pixels covered by `size`.
    #[inline]
    pub fn pixel_count(&self) -> u64 {
        self.h() as u64 * self.w() as u64
    }

    /// Checks that `counts` covers exactly `h * w` pixels.
    pub fn validate(&self) -> AmgResult<()> {
        let got: u64 = self.counts.iter().map(|&c| c as u64).sum();
        let expected = self.pixel_count();
        if got != expected {
            return Err(AmgError::MalformedRle { expected, got });
        }
        Ok(())
    }
}

/// One item of a sequence field in [`MaskData`](crate::MaskData).
///
/// Objects with exactly the `size` and `counts` keys of an RLE record
/// deserialize as [`Element::Rle`]; anything else is carried through untouched.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Element {
    Rle(Rle),
    Value(serde_json::Value),
}

impl Element {
    pub fn as_rle(&self) -> Option<&Rle> {
        match self {
            Element::Rle(rle) => Some(rle),
            Element::Value(_) => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Element::Rle(rle) => serde_json::json!({ "size": rle.size, "counts": rle.counts }),
            Element::Value(v) => v.clone(),
        }
    }
}

impl From<Rle> for Element {
    fn from(rle: Rle) -> Self {
        Element::Rle(rle)
    }
}

impl From<serde_json::Value> for Element {
    fn from(value: serde_json::Value) -> Self {
        match serde_json::from_value::<Rle>(value.clone()) {
            Ok(rle) => Element::Rle(rle),
            Err(_) => Element::Value(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rle_json_shape() {
        let rle = Rle::new(2, 3, vec![0, 1, 1, 1, 3]);
        let v = serde_json::to_value(&rle).unwrap();
        assert_eq!(v, serde_json::json!({ "size": [2, 3], "counts": [0, 1, 1, 1, 3] }));
        let back: Rle = serde_json::from_value(v).unwrap();
        assert_eq!(back, rle);
    }

    #[test]
    fn test_rle_validate() {
        assert!(Rle::new(2, 3, vec![6]).validate().is_ok());
        let err = Rle::new(2, 3, vec![2, 2]).validate().unwrap_err();
        assert!(matches!(
            err,
            AmgError::MalformedRle {
                expected: 6,
                got: 4
            }
        ));
    }

    #[test]
    fn test_element_from_value() {
        let rle = Element::from(serde_json::json!({ "size": [1, 1], "counts": [1] }));
        assert_eq!(rle.as_rle(), Some(&Rle::new(1, 1, vec![1])));

        let other = Element::from(serde_json::json!({ "label": "cat" }));
        assert!(other.as_rle().is_none());
        assert_eq!(other.to_json(), serde_json::json!({ "label": "cat" }));
    }

    #[test]
    fn test_rle_shaped_object_with_extra_key_stays_opaque() {
        let ann = serde_json::json!({ "size": [1, 1], "counts": [1], "label": "cat" });
        let element = Element::from(ann.clone());
        assert!(element.as_rle().is_none());
        assert_eq!(element.to_json(), ann);

        let untagged: Element = serde_json::from_value(ann.clone()).unwrap();
        assert_eq!(untagged, Element::Value(ann));
    }
}
