//! Compute grid sizing.

use ash::vk;

/// Local workgroup size the compute shaders are compiled with.
pub const WORKGROUP_SIZE: (u32, u32) = (8, 8);

/// Number of workgroups needed to cover `extent` with `local_size` groups.
///
/// Rounds up so edge pixels are covered; shaders must bounds-check against
/// the image size. A zero-sized extent yields zero groups.
///
/// # Panics
///
/// Panics if either local dimension is zero.
pub fn dispatch_group_count(extent: vk::Extent2D, local_size: (u32, u32)) -> (u32, u32) {
    assert!(
        local_size.0 > 0 && local_size.1 > 0,
        "workgroup size must be non-zero"
    );
    (
        extent.width.div_ceil(local_size.0),
        extent.height.div_ceil(local_size.1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_exact_multiple() {
        assert_eq!(
            dispatch_group_count(extent(1920, 1080), WORKGROUP_SIZE),
            (240, 135)
        );
    }

    #[test]
    fn test_rounds_up() {
        assert_eq!(
            dispatch_group_count(extent(1921, 1081), WORKGROUP_SIZE),
            (241, 136)
        );
        assert_eq!(dispatch_group_count(extent(1, 1), WORKGROUP_SIZE), (1, 1));
    }

    #[test]
    fn test_zero_extent() {
        assert_eq!(dispatch_group_count(extent(0, 600), WORKGROUP_SIZE), (0, 75));
    }

    #[test]
    fn test_coverage_and_monotonicity() {
        for (w, h) in [(7, 9), (800, 600), (1023, 767), (3, 4096)] {
            for local in [(8, 8), (16, 4), (1, 1), (32, 32)] {
                let (gx, gy) = dispatch_group_count(extent(w, h), local);
                // Covers every pixel, with less than one spare group per axis
                assert!(gx * local.0 >= w && (gx - 1) * local.0 < w);
                assert!(gy * local.1 >= h && (gy - 1) * local.1 < h);

                let (gx2, gy2) = dispatch_group_count(extent(w + 1, h + 1), local);
                assert!(gx2 >= gx && gy2 >= gy);
            }
        }
    }

    #[test]
    #[should_panic(expected = "workgroup size must be non-zero")]
    fn test_zero_local_size_panics() {
        dispatch_group_count(extent(8, 8), (0, 8));
    }
}
