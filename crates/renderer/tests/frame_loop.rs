//! Integration tests for the GPU-free parts of the frame loop: slot
//! cycling, surface classification, resize ordering and dispatch sizing.

use horizon_renderer::orchestrator::{
    AcquiredImage, FrameState, SurfaceStatus, classify_acquire, classify_present,
};
use horizon_renderer::{
    FrameParameters, ImageBinding, PerFrame, ResizeTracker, SimulationVariant, SizedSlot,
    WORKGROUP_SIZE, dispatch_group_count, ensure_current, resize_slot,
};
use horizon_rhi::vk;
use horizon_rhi::{RhiError, RhiResult};

/// Host-side stand-in for a slot: an image that bumps its generation when
/// its extent changes, and a log of set overwrites.
#[derive(Debug, Default)]
struct Slot {
    extent: vk::Extent2D,
    image_generation: u64,
    compute_binding: ImageBinding,
    overwritten_with: Vec<u64>,
    fail_overwrite: bool,
    writes: u32,
}

impl SizedSlot for Slot {
    fn resize_image(&mut self, extent: vk::Extent2D) -> RhiResult<u64> {
        if extent != self.extent {
            self.extent = extent;
            self.image_generation += 1;
        }
        Ok(self.image_generation)
    }

    fn overwrite_sets(&mut self) -> RhiResult<()> {
        if self.fail_overwrite {
            return Err(RhiError::DescriptorError("layout mismatch".to_string()));
        }
        self.overwritten_with.push(self.image_generation);
        Ok(())
    }

    fn binding_mut(&mut self) -> &mut ImageBinding {
        &mut self.compute_binding
    }
}

fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

#[test]
fn test_frames_touch_only_their_slot() {
    let mut state = FrameState::new(2);
    let mut slots = PerFrame::new(2, |_| Slot::default());

    for image_index in [0, 1, 2, 0] {
        state.begin(image_index);
        slots.get_mut(state.frame_index()).writes += 1;
        state.finish();
        state.advance();
    }

    assert_eq!(slots.get(0).writes, 2);
    assert_eq!(slots.get(1).writes, 2);
}

#[test]
fn test_resize_propagates_before_dispatch() {
    let mut state = FrameState::new(2);
    let mut slots = PerFrame::new(2, |_| Slot::default());
    for slot in slots.iter_mut() {
        resize_slot(slot, extent(800, 600)).unwrap();
    }
    let mut tracker = ResizeTracker::new(0);
    let mut surface_generation = 0;

    // Present reports the surface stale; the orchestrator rebuilds it
    let status = classify_present(Ok(true), false).unwrap();
    assert_eq!(status, SurfaceStatus::Stale);
    surface_generation += 1;

    state.begin(0);
    let index = state.frame_index();
    assert!(tracker.is_pending(surface_generation));

    for slot in slots.iter_mut() {
        assert!(resize_slot(slot, extent(1024, 768)).unwrap());
    }
    tracker.mark_propagated(surface_generation);

    let slot = slots.get(index);
    assert_eq!(slot.overwritten_with, vec![1, 2]);
    assert!(ensure_current(slot.compute_binding, slot.image_generation).is_ok());
    assert!(!tracker.is_pending(surface_generation));
    state.finish();
}

#[test]
fn test_resize_to_same_extent_keeps_sets() {
    let mut slot = Slot::default();
    assert!(resize_slot(&mut slot, extent(640, 480)).unwrap());
    assert!(!resize_slot(&mut slot, extent(640, 480)).unwrap());

    assert_eq!(slot.overwritten_with, vec![1]);
    assert_eq!(slot.compute_binding.generation(), 1);
}

#[test]
fn test_failed_overwrite_leaves_slot_refused() {
    let mut slot = Slot::default();
    resize_slot(&mut slot, extent(640, 480)).unwrap();

    slot.fail_overwrite = true;
    assert!(resize_slot(&mut slot, extent(320, 240)).is_err());

    // The image moved on but the sets still point at the old one
    assert_eq!(slot.image_generation, 2);
    assert_eq!(slot.compute_binding.generation(), 1);
    assert!(ensure_current(slot.compute_binding, slot.image_generation).is_err());

    slot.fail_overwrite = false;
    assert!(resize_slot(&mut slot, extent(320, 240)).unwrap());
    assert!(ensure_current(slot.compute_binding, slot.image_generation).is_ok());
}

#[test]
fn test_stale_acquire_skips_frame() {
    let state = FrameState::new(2);
    let acquired = classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap();
    assert_eq!(acquired, AcquiredImage::Stale);
    // Nothing was opened
    assert!(!state.is_in_progress());
    assert_eq!(state.frame_index(), 0);
}

#[test]
fn test_dispatch_covers_parameter_resolution() {
    let extent = vk::Extent2D {
        width: 1921,
        height: 1081,
    };
    let mut params = FrameParameters::default();
    params.set_resolution(extent);
    params.set_variant(SimulationVariant::Kerr);

    let (gx, gy) = dispatch_group_count(extent, WORKGROUP_SIZE);
    assert_eq!((gx, gy), (241, 136));
    assert!((gx * WORKGROUP_SIZE.0) as f32 >= params.resolution[0]);
    assert!((gy * WORKGROUP_SIZE.1) as f32 >= params.resolution[1]);
    assert_eq!(params.variant(), SimulationVariant::Kerr);
}
