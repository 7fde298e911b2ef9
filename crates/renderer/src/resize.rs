//! Propagation of surface resizes to size-dependent resources.
//!
//! Order per resize: surface, then storage images, then descriptor
//! overwrite, then the next dispatch. [`ResizeTracker`] notices that the
//! surface moved on; [`ImageBinding`] remembers which image generation a
//! descriptor set was last written with so a dispatch against a stale set
//! is refused. [`resize_slot`] runs the image and descriptor steps for one
//! frame slot.

use ash::vk;
use horizon_rhi::{RhiError, RhiResult};

/// Tracks the surface generation that storage images were last sized for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResizeTracker {
    propagated: u64,
}

impl ResizeTracker {
    /// Starts in sync with `surface_generation`.
    pub fn new(surface_generation: u64) -> Self {
        Self {
            propagated: surface_generation,
        }
    }

    /// True when the surface was rebuilt after the last propagation.
    pub fn is_pending(&self, surface_generation: u64) -> bool {
        surface_generation != self.propagated
    }

    /// Call after images have been resized and their sets overwritten.
    pub fn mark_propagated(&mut self, surface_generation: u64) {
        self.propagated = surface_generation;
    }

    pub fn propagated(&self) -> u64 {
        self.propagated
    }
}

/// The storage-image generation a descriptor set currently references.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImageBinding {
    generation: u64,
}

impl ImageBinding {
    pub fn new(generation: u64) -> Self {
        Self { generation }
    }

    /// Records that the set was overwritten with `generation`.
    pub fn rebind(&mut self, generation: u64) {
        self.generation = generation;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Refuses work against a set written before the image was last recreated.
///
/// # Errors
///
/// Returns [`RhiError::InvalidHandle`] if `bound` is older than `current`.
pub fn ensure_current(bound: ImageBinding, current: u64) -> RhiResult<()> {
    if bound.generation < current {
        return Err(RhiError::InvalidHandle(format!(
            "descriptor set references storage image generation {}, current is {}",
            bound.generation, current
        )));
    }
    Ok(())
}

/// A frame slot whose descriptor sets reference a resizable image.
pub trait SizedSlot {
    /// Recreates the image at `extent` if it differs, returning the image
    /// generation afterwards.
    fn resize_image(&mut self, extent: vk::Extent2D) -> RhiResult<u64>;

    /// Points every set of the slot at the current image.
    fn overwrite_sets(&mut self) -> RhiResult<()>;

    /// Generation the sets were last written with.
    fn binding_mut(&mut self) -> &mut ImageBinding;
}

/// Resizes the slot's image and, if it was recreated, overwrites the sets
/// and records the new generation. Returns whether the sets were rewritten.
///
/// A failed overwrite leaves the binding stale, so [`ensure_current`]
/// keeps refusing the slot.
///
/// # Errors
///
/// Whatever the image resize or the overwrite returns.
pub fn resize_slot<S: SizedSlot + ?Sized>(slot: &mut S, extent: vk::Extent2D) -> RhiResult<bool> {
    let generation = slot.resize_image(extent)?;
    if slot.binding_mut().generation() == generation {
        return Ok(false);
    }

    slot.overwrite_sets()?;
    slot.binding_mut().rebind(generation);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_pending_after_surface_rebuild() {
        let mut tracker = ResizeTracker::new(0);
        assert!(!tracker.is_pending(0));
        assert!(tracker.is_pending(1));
        tracker.mark_propagated(1);
        assert!(!tracker.is_pending(1));
        assert_eq!(tracker.propagated(), 1);
    }

    #[test]
    fn test_stale_binding_refused() {
        let binding = ImageBinding::new(0);
        assert!(ensure_current(binding, 0).is_ok());
        let err = ensure_current(binding, 1).unwrap_err();
        assert!(matches!(err, RhiError::InvalidHandle(_)));
    }

    #[test]
    fn test_rebind_clears_staleness() {
        let mut binding = ImageBinding::new(0);
        binding.rebind(3);
        assert!(ensure_current(binding, 3).is_ok());
        assert_eq!(binding.generation(), 3);
    }

    #[test]
    fn test_resize_sequence() {
        // surface -> images -> overwrite -> dispatch
        let mut tracker = ResizeTracker::new(0);
        let mut image_generation = 0;
        let mut binding = ImageBinding::new(image_generation);

        let surface_generation = 1;
        assert!(tracker.is_pending(surface_generation));

        image_generation += 1;
        assert!(ensure_current(binding, image_generation).is_err());

        binding.rebind(image_generation);
        tracker.mark_propagated(surface_generation);

        assert!(ensure_current(binding, image_generation).is_ok());
        assert!(!tracker.is_pending(surface_generation));
    }
}
