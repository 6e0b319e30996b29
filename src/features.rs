// src/features.rs - Per-frame scalar features derived from fingertip positions
use crate::capture::Frame;
use crate::landmarks::{HandObservation, Pixel, MAX_HANDS};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandFeatures {
    pub thumb_index_dist: f64,
    pub index_middle_dist: f64,
    /// Image y grows downwards, so "below" means a larger y.
    pub index_below_thumb: bool,
    pub index_tip: Pixel,
    pub thumb_tip: Pixel,
}

/// Cross-hand features, present only when two hands are visible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairFeatures {
    pub thumb_dist: f64,
    pub index_dist: f64,
    /// Midpoint of the two thumb tips.
    pub center_x: f64,
    /// First hand's index y minus the second's. Positive: first index is lower.
    pub index_offset_y: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    pub frame: Frame,
    pub hands: Vec<HandFeatures>,
    pub pair: Option<PairFeatures>,
}

impl FeatureSet {
    pub fn hand_count(&self) -> usize {
        self.hands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hands.is_empty()
    }

    /// The hand, when exactly one is visible.
    pub fn single(&self) -> Option<&HandFeatures> {
        match self.hands.as_slice() {
            [hand] => Some(hand),
            _ => None,
        }
    }
}

pub fn distance(a: &Pixel, b: &Pixel) -> f64 {
    nalgebra::distance(a, b)
}

fn hand_features(hand: &HandObservation) -> HandFeatures {
    HandFeatures {
        thumb_index_dist: distance(&hand.thumb, &hand.index),
        index_middle_dist: distance(&hand.index, &hand.middle),
        index_below_thumb: hand.index.y > hand.thumb.y,
        index_tip: hand.index,
        thumb_tip: hand.thumb,
    }
}

pub fn extract(frame: &Frame, hands: &[HandObservation]) -> FeatureSet {
    let hands = &hands[..hands.len().min(MAX_HANDS)];

    let pair = match hands {
        [a, b] => Some(PairFeatures {
            thumb_dist: distance(&a.thumb, &b.thumb),
            index_dist: distance(&a.index, &b.index),
            center_x: (a.thumb.x + b.thumb.x) / 2.0,
            index_offset_y: a.index.y - b.index.y,
        }),
        _ => None,
    };

    FeatureSet {
        frame: *frame,
        hands: hands.iter().map(hand_features).collect(),
        pair,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn frame() -> Frame {
        Frame {
            seq: 7,
            captured_at: Instant::now(),
            width: 640,
            height: 480,
        }
    }

    fn hand(thumb: (f64, f64), index: (f64, f64), middle: (f64, f64)) -> HandObservation {
        HandObservation::new(
            Pixel::new(thumb.0, thumb.1),
            Pixel::new(index.0, index.1),
            Pixel::new(middle.0, middle.1),
            Pixel::new(0.0, 0.0),
        )
    }

    #[test]
    fn no_hands_is_empty() {
        let features = extract(&frame(), &[]);
        assert!(features.is_empty());
        assert!(features.pair.is_none());
        assert!(features.single().is_none());
        assert_eq!(features.frame.seq, 7);
    }

    #[test]
    fn single_hand_distances() {
        let features = extract(&frame(), &[hand((0.0, 0.0), (3.0, 4.0), (3.0, 10.0))]);
        let single = features.single().unwrap();
        assert_eq!(single.thumb_index_dist, 5.0);
        assert_eq!(single.index_middle_dist, 6.0);
        assert!(single.index_below_thumb);
        assert!(features.pair.is_none());
    }

    #[test]
    fn two_hand_cross_features() {
        let a = hand((100.0, 200.0), (110.0, 260.0), (0.0, 0.0));
        let b = hand((160.0, 200.0), (110.0, 220.0), (0.0, 0.0));
        let features = extract(&frame(), &[a, b]);

        let pair = features.pair.unwrap();
        assert_eq!(pair.thumb_dist, 60.0);
        assert_eq!(pair.index_dist, 40.0);
        assert_eq!(pair.center_x, 130.0);
        assert_eq!(pair.index_offset_y, 40.0);
        assert_eq!(features.hand_count(), 2);
        assert!(features.single().is_none());
    }

    #[test]
    fn extra_hands_are_ignored() {
        let h = hand((0.0, 0.0), (1.0, 0.0), (2.0, 0.0));
        let features = extract(&frame(), &[h, h, h]);
        assert_eq!(features.hand_count(), 2);
        assert!(features.pair.is_some());
    }
}
