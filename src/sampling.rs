//! Choosing how far to subsample an image while decoding it.
use std::fmt;

/// Width and height of an image in pixels.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Size {
        Size { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Everything the second decode pass needs to know.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DecodePlan {
    pub target: Size,
    pub origin: Size,
    pub sampling_factor: u32,
}

impl DecodePlan {
    pub fn new(origin: Size, target: Size) -> DecodePlan {
        DecodePlan {
            target,
            origin,
            sampling_factor: sampling_factor(origin, target),
        }
    }

    /// Dimensions the decoder will produce.
    pub fn decoded_size(&self) -> Size {
        Size::new(
            self.origin.width / self.sampling_factor,
            self.origin.height / self.sampling_factor,
        )
    }
}

/// The largest power of two `f` with `origin / f >= target` in both dimensions.
///
/// Never upscales.  Returns 1 when either size has a zero dimension.
pub fn sampling_factor(origin: Size, target: Size) -> u32 {
    if origin.is_empty() || target.is_empty() {
        return 1;
    }

    let fits = |factor: u64| {
        u64::from(origin.width) >= u64::from(target.width) * factor
            && u64::from(origin.height) >= u64::from(target.height) * factor
    };

    let mut factor: u64 = 1;
    while factor < (1 << 31) && fits(factor * 2) {
        factor *= 2;
    }
    factor as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_known_factors() {
        assert_eq!(sampling_factor(Size::new(1000, 800), Size::new(300, 300)), 2);
        assert_eq!(sampling_factor(Size::new(400, 400), Size::new(100, 100)), 4);
        assert_eq!(sampling_factor(Size::new(399, 400), Size::new(100, 100)), 2);
        // Smaller than the target: never upscale.
        assert_eq!(sampling_factor(Size::new(50, 50), Size::new(100, 100)), 1);
    }

    #[test]
    fn test_zero_sizes_are_neutral() {
        assert_eq!(sampling_factor(Size::new(0, 0), Size::new(100, 100)), 1);
        assert_eq!(sampling_factor(Size::new(400, 400), Size::new(0, 100)), 1);
        assert_eq!(sampling_factor(Size::new(400, 0), Size::new(100, 100)), 1);
    }

    #[test]
    fn test_decoded_size() {
        let plan = DecodePlan::new(Size::new(1000, 800), Size::new(300, 300));
        assert_eq!(plan.sampling_factor, 2);
        assert_eq!(plan.decoded_size(), Size::new(500, 400));
    }

    proptest! {
        #[test]
        fn test_factor_is_largest_valid_power_of_two(
            ow in 1..100_000u32,
            oh in 1..100_000u32,
            tw in 1..10_000u32,
            th in 1..10_000u32,
        ) {
            let origin = Size::new(ow, oh);
            let target = Size::new(tw, th);
            let f = sampling_factor(origin, target);

            prop_assert!(f >= 1);
            prop_assert!(f.is_power_of_two());
            if f > 1 {
                prop_assert!(ow / f >= tw && oh / f >= th);
            }
            let next = u64::from(f) * 2;
            prop_assert!(u64::from(ow) < u64::from(tw) * next || u64::from(oh) < u64::from(th) * next);
        }
    }
}
