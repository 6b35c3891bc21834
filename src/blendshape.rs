use std::collections::HashMap;
use std::fmt;

use log::debug;

use crate::error::SyncError;

macro_rules! blendshapes {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// A single named facial-expression channel.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Blendshape {
            $($variant),+
        }

        impl Blendshape {
            /// Every channel, in wire order.
            pub const ALL: [Blendshape; BLENDSHAPE_COUNT] = [$(Blendshape::$variant),+];

            const NAMES: [&'static str; BLENDSHAPE_COUNT] = [$($name),+];
        }
    };
}

pub const BLENDSHAPE_COUNT: usize = 52;

blendshapes! {
    EyeBlinkLeft => "eyeBlinkLeft",
    EyeLookDownLeft => "eyeLookDownLeft",
    EyeLookInLeft => "eyeLookInLeft",
    EyeLookOutLeft => "eyeLookOutLeft",
    EyeLookUpLeft => "eyeLookUpLeft",
    EyeSquintLeft => "eyeSquintLeft",
    EyeWideLeft => "eyeWideLeft",
    EyeBlinkRight => "eyeBlinkRight",
    EyeLookDownRight => "eyeLookDownRight",
    EyeLookInRight => "eyeLookInRight",
    EyeLookOutRight => "eyeLookOutRight",
    EyeLookUpRight => "eyeLookUpRight",
    EyeSquintRight => "eyeSquintRight",
    EyeWideRight => "eyeWideRight",
    JawForward => "jawForward",
    JawLeft => "jawLeft",
    JawRight => "jawRight",
    JawOpen => "jawOpen",
    MouthClose => "mouthClose",
    MouthFunnel => "mouthFunnel",
    MouthPucker => "mouthPucker",
    MouthLeft => "mouthLeft",
    MouthRight => "mouthRight",
    MouthSmileLeft => "mouthSmileLeft",
    MouthSmileRight => "mouthSmileRight",
    MouthFrownLeft => "mouthFrownLeft",
    MouthFrownRight => "mouthFrownRight",
    MouthDimpleLeft => "mouthDimpleLeft",
    MouthDimpleRight => "mouthDimpleRight",
    MouthStretchLeft => "mouthStretchLeft",
    MouthStretchRight => "mouthStretchRight",
    MouthRollLower => "mouthRollLower",
    MouthRollUpper => "mouthRollUpper",
    MouthShrugLower => "mouthShrugLower",
    MouthShrugUpper => "mouthShrugUpper",
    MouthPressLeft => "mouthPressLeft",
    MouthPressRight => "mouthPressRight",
    MouthLowerDownLeft => "mouthLowerDownLeft",
    MouthLowerDownRight => "mouthLowerDownRight",
    MouthUpperUpLeft => "mouthUpperUpLeft",
    MouthUpperUpRight => "mouthUpperUpRight",
    BrowDownLeft => "browDownLeft",
    BrowDownRight => "browDownRight",
    BrowInnerUp => "browInnerUp",
    BrowOuterUpLeft => "browOuterUpLeft",
    BrowOuterUpRight => "browOuterUpRight",
    CheekPuff => "cheekPuff",
    CheekSquintLeft => "cheekSquintLeft",
    CheekSquintRight => "cheekSquintRight",
    NoseSneerLeft => "noseSneerLeft",
    NoseSneerRight => "noseSneerRight",
    TongueOut => "tongueOut",
}

impl Blendshape {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        Self::NAMES[self.index()]
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| Self::ALL[i])
    }
}

impl fmt::Display for Blendshape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One full facial pose. Every channel is always present; absent input defaults to 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights([f32; BLENDSHAPE_COUNT]);

impl Default for Weights {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

impl Weights {
    pub const NEUTRAL: Weights = Weights([0.0; BLENDSHAPE_COUNT]);

    pub fn get(&self, shape: Blendshape) -> f32 {
        self.0[shape.index()]
    }

    pub fn set(&mut self, shape: Blendshape, value: f32) {
        self.0[shape.index()] = clamp_unit(value);
    }

    pub fn as_array(&self) -> &[f32; BLENDSHAPE_COUNT] {
        &self.0
    }

    pub fn is_neutral(&self) -> bool {
        self.0.iter().all(|w| *w == 0.0)
    }

    /// Build from a name -> weight map. Unknown names are skipped.
    pub fn from_named(map: &HashMap<String, f32>) -> Self {
        let mut weights = Self::NEUTRAL;
        for (name, value) in map {
            match Blendshape::from_name(name) {
                Some(shape) => weights.set(shape, *value),
                None => debug!("Ignoring unknown blendshape channel '{}'", name),
            }
        }
        weights
    }

    /// Build from a positional vector in wire order.
    pub fn from_slice(values: &[f32]) -> Result<Self, SyncError> {
        if values.len() != BLENDSHAPE_COUNT {
            return Err(SyncError::WeightCount {
                expected: BLENDSHAPE_COUNT,
                got: values.len(),
            });
        }
        let mut weights = Self::NEUTRAL;
        for (slot, value) in weights.0.iter_mut().zip(values) {
            *slot = clamp_unit(*value);
        }
        Ok(weights)
    }

    /// Name -> weight view for the rendering boundary.
    pub fn to_named(&self) -> HashMap<&'static str, f32> {
        Blendshape::ALL
            .iter()
            .map(|shape| (shape.name(), self.get(*shape)))
            .collect()
    }

    /// Linear blend towards `target`; `t = 0` keeps `self`, `t = 1` snaps to `target`.
    pub fn lerp(&self, target: &Weights, t: f32) -> Weights {
        let t = clamp_unit(t);
        let mut out = *self;
        for (o, b) in out.0.iter_mut().zip(target.0.iter()) {
            *o += (*b - *o) * t;
        }
        out
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_table() {
        assert_eq!(Blendshape::ALL.len(), 52);
        assert_eq!(Blendshape::EyeBlinkLeft.index(), 0);
        assert_eq!(Blendshape::TongueOut.index(), 51);
        assert_eq!(Blendshape::JawOpen.name(), "jawOpen");
        assert_eq!(Blendshape::from_name("mouthSmileRight"), Some(Blendshape::MouthSmileRight));
        assert_eq!(Blendshape::from_name("notAChannel"), None);

        for shape in Blendshape::ALL {
            assert_eq!(Blendshape::from_name(shape.name()), Some(shape));
        }
    }

    #[test]
    fn test_from_named_defaults_missing_channels() {
        let mut map = HashMap::new();
        map.insert("jawOpen".to_string(), 0.8);
        map.insert("cheekPuff".to_string(), 1.7);
        map.insert("bogus".to_string(), 0.5);

        let w = Weights::from_named(&map);
        assert_eq!(w.get(Blendshape::JawOpen), 0.8);
        assert_eq!(w.get(Blendshape::CheekPuff), 1.0);
        assert_eq!(w.get(Blendshape::EyeBlinkLeft), 0.0);
        assert_eq!(w.to_named().len(), 52);
    }

    #[test]
    fn test_from_slice_requires_all_channels() {
        assert!(Weights::from_slice(&[0.1; 51]).is_err());
        let w = Weights::from_slice(&[0.25; 52]).unwrap();
        assert_eq!(w.get(Blendshape::NoseSneerLeft), 0.25);
    }

    #[test]
    fn test_lerp() {
        let mut a = Weights::NEUTRAL;
        let mut b = Weights::NEUTRAL;
        a.set(Blendshape::JawOpen, 0.2);
        b.set(Blendshape::JawOpen, 0.6);

        let mid = a.lerp(&b, 0.5);
        assert!((mid.get(Blendshape::JawOpen) - 0.4).abs() < 1e-6);
        assert_eq!(a.lerp(&b, 1.0), b);
        assert!(Weights::NEUTRAL.is_neutral());
        assert!(!b.is_neutral());
    }
}
