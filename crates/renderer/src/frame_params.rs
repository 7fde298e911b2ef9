//! Per-frame data handed to the passes.
//!
//! [`FrameParameters`] is the uniform block the compute shaders read. It is
//! rebuilt by the application every frame and written into the active
//! slot's uniform buffer; nothing about the simulation lives in globals.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

use horizon_rhi::command::CommandBuffer;
use horizon_rhi::sync::Fence;

/// Which metric the compute pass integrates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SimulationVariant {
    /// Non-rotating black hole.
    #[default]
    Schwarzschild,
    /// Rotating black hole; uses [`FrameParameters::spin`].
    Kerr,
}

impl SimulationVariant {
    /// Discriminant stored in the uniform block.
    pub fn as_raw(self) -> u32 {
        match self {
            SimulationVariant::Schwarzschild => 0,
            SimulationVariant::Kerr => 1,
        }
    }

    /// Inverse of [`as_raw`](Self::as_raw).
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(SimulationVariant::Schwarzschild),
            1 => Some(SimulationVariant::Kerr),
            _ => None,
        }
    }

    /// The other variant.
    pub fn toggled(self) -> Self {
        match self {
            SimulationVariant::Schwarzschild => SimulationVariant::Kerr,
            SimulationVariant::Kerr => SimulationVariant::Schwarzschild,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SimulationVariant::Schwarzschild => "Schwarzschild",
            SimulationVariant::Kerr => "Kerr",
        }
    }
}

impl std::fmt::Display for SimulationVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Uniform block read by the init and compute shaders.
///
/// std140 layout: vectors are padded to `vec4`, the struct is a multiple of
/// 16 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct FrameParameters {
    /// Camera position (xyz), w unused.
    pub camera_position: Vec4,
    pub camera_forward: Vec4,
    pub camera_right: Vec4,
    pub camera_up: Vec4,
    /// Storage image size in pixels.
    pub resolution: [f32; 2],
    /// Seconds since start.
    pub time: f32,
    /// Frames rendered so far.
    pub frame: u32,
    /// [`SimulationVariant`] discriminant.
    pub variant: u32,
    /// Black hole mass in geometric units.
    pub mass: f32,
    /// Dimensionless spin `a/M`, only read by the Kerr kernel.
    pub spin: f32,
    /// Affine parameter step for ray integration.
    pub step_size: f32,
    pub max_steps: u32,
    pub _pad: [u32; 3],
}

impl Default for FrameParameters {
    fn default() -> Self {
        Self {
            camera_position: Vec4::new(0.0, 0.0, -20.0, 1.0),
            camera_forward: Vec4::Z,
            camera_right: Vec4::X,
            camera_up: Vec4::Y,
            resolution: [800.0, 600.0],
            time: 0.0,
            frame: 0,
            variant: SimulationVariant::Schwarzschild.as_raw(),
            mass: 1.0,
            spin: 0.6,
            step_size: 0.05,
            max_steps: 2000,
            _pad: [0; 3],
        }
    }
}

impl FrameParameters {
    /// Selected variant. Unknown discriminants fall back to Schwarzschild.
    pub fn variant(&self) -> SimulationVariant {
        SimulationVariant::from_raw(self.variant).unwrap_or_default()
    }

    pub fn set_variant(&mut self, variant: SimulationVariant) {
        self.variant = variant.as_raw();
    }

    /// Sets the camera position and orthonormal basis.
    pub fn set_camera(&mut self, position: Vec3, forward: Vec3, right: Vec3, up: Vec3) {
        self.camera_position = position.extend(1.0);
        self.camera_forward = forward.extend(0.0);
        self.camera_right = right.extend(0.0);
        self.camera_up = up.extend(0.0);
    }

    pub fn set_resolution(&mut self, extent: vk::Extent2D) {
        self.resolution = [extent.width as f32, extent.height as f32];
    }
}

/// One value per frame slot.
///
/// Only the slot being recorded is handed out mutably, so a frame never
/// touches data the GPU may still be reading for another slot.
#[derive(Debug)]
pub struct PerFrame<T> {
    slots: Vec<T>,
}

impl<T> PerFrame<T> {
    /// Builds `count` slots with `make(slot_index)`.
    pub fn new(count: usize, make: impl FnMut(usize) -> T) -> Self {
        Self {
            slots: (0..count).map(make).collect(),
        }
    }

    /// Fallible variant of [`new`](Self::new); stops at the first error.
    pub fn try_new<E>(count: usize, make: impl FnMut(usize) -> Result<T, E>) -> Result<Self, E> {
        Ok(Self {
            slots: (0..count).map(make).collect::<Result<_, _>>()?,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// # Panics
    ///
    /// Panics if `frame_index` is out of range.
    pub fn get(&self, frame_index: usize) -> &T {
        &self.slots[frame_index]
    }

    /// # Panics
    ///
    /// Panics if `frame_index` is out of range.
    pub fn get_mut(&mut self, frame_index: usize) -> &mut T {
        &mut self.slots[frame_index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }

    /// Mutable access to every slot, for resize handling while the device
    /// is idle.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut()
    }
}

/// What a pass needs to record its work for one frame.
#[derive(Clone, Copy)]
pub struct PassContext<'a> {
    pub frame_index: usize,
    pub command_buffer: &'a CommandBuffer,
    pub descriptor_set: vk::DescriptorSet,
    pub extent: vk::Extent2D,
    /// Set for passes that submit on their own.
    pub fence: Option<&'a Fence>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_parameters_layout() {
        assert_eq!(std::mem::size_of::<FrameParameters>() % 16, 0);
        assert_eq!(std::mem::size_of::<FrameParameters>(), 112);
        assert_eq!(std::mem::align_of::<FrameParameters>(), 16);
    }

    #[test]
    fn test_variant_round_trip_and_fallback() {
        let mut params = FrameParameters::default();
        assert_eq!(params.variant(), SimulationVariant::Schwarzschild);
        params.set_variant(SimulationVariant::Kerr);
        assert_eq!(params.variant(), SimulationVariant::Kerr);
        params.variant = 42;
        assert_eq!(params.variant(), SimulationVariant::Schwarzschild);
    }

    #[test]
    fn test_variant_toggle() {
        let v = SimulationVariant::Schwarzschild;
        assert_eq!(v.toggled(), SimulationVariant::Kerr);
        assert_eq!(v.toggled().toggled(), v);
        assert_eq!(SimulationVariant::Kerr.to_string(), "Kerr");
    }

    #[test]
    fn test_set_camera_and_resolution() {
        let mut params = FrameParameters::default();
        params.set_camera(Vec3::new(1.0, 2.0, 3.0), Vec3::Z, Vec3::X, Vec3::Y);
        assert_eq!(params.camera_position, Vec4::new(1.0, 2.0, 3.0, 1.0));
        assert_eq!(params.camera_forward.w, 0.0);
        params.set_resolution(vk::Extent2D {
            width: 1920,
            height: 1080,
        });
        assert_eq!(params.resolution, [1920.0, 1080.0]);
    }

    #[test]
    fn test_per_frame_slot_isolation() {
        let mut slots = PerFrame::new(2, |i| vec![i as u32]);
        slots.get_mut(0).push(7);
        assert_eq!(slots.get(0), &vec![0, 7]);
        assert_eq!(slots.get(1), &vec![1]);
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn test_per_frame_try_new_stops_on_error() {
        let result: Result<PerFrame<usize>, String> =
            PerFrame::try_new(3, |i| if i == 1 { Err(format!("slot {i}")) } else { Ok(i) });
        assert_eq!(result.unwrap_err(), "slot 1");
    }

    #[test]
    #[should_panic]
    fn test_per_frame_out_of_range_panics() {
        let slots = PerFrame::new(2, |i| i);
        let _ = slots.get(2);
    }
}
