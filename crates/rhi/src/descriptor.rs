//! Descriptor layouts, pools and writers.
//!
//! Resources reach shaders through three cooperating pieces:
//! - [`DescriptorSetLayout`] is the contract: binding index → (type,
//!   stages, count). It is immutable once built and shared by every set
//!   created against it.
//! - [`DescriptorPool`] is the capacity: a fixed number of sets and of
//!   descriptors per type. It never grows. Running out is reported as
//!   `Ok(None)` so callers can tell a mis-sized pool from a device failure.
//! - [`DescriptorWriter`] stages buffer/image references and commits them,
//!   either into a freshly allocated set ([`DescriptorWriter::build`]) or
//!   into an existing one ([`DescriptorWriter::overwrite`]).
//!
//! The pool keeps a host-side [`PoolBudget`] mirroring its capacity, so
//! exhaustion is detected deterministically before the driver is asked.
//! Each [`DescriptorSet`] keeps a [`BindingRecord`] of what is currently
//! bound at each slot, and remembers its layout so a writer built for a
//! different layout cannot overwrite it.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use horizon_rhi::device::Device;
//! use horizon_rhi::descriptor::{DescriptorPoolBuilder, DescriptorSetLayoutBuilder, DescriptorWriter};
//!
//! # fn example(device: Arc<Device>, params: vk::DescriptorBufferInfo) -> Result<(), horizon_rhi::RhiError> {
//! let layout = DescriptorSetLayoutBuilder::new(device.clone())
//!     .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::COMPUTE, 1)
//!     .build()?;
//!
//! let pool = DescriptorPoolBuilder::new(device.clone())
//!     .add_pool_size(vk::DescriptorType::UNIFORM_BUFFER, 2)
//!     .set_max_sets(2)
//!     .build()?;
//!
//! let Some(mut set) = DescriptorWriter::new(&layout, &pool)
//!     .write_buffer(0, params)
//!     .build()?
//! else {
//!     panic!("descriptor pool too small");
//! };
//!
//! // Later, rebind in place without touching the pool
//! DescriptorWriter::new(&layout, &pool)
//!     .write_buffer(0, params)
//!     .overwrite(&mut set)?;
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use tracing::{debug, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Number of descriptors of each type a set consumes.
pub type DescriptorDemand = HashMap<vk::DescriptorType, u32>;

/// One slot of a layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutBinding {
    /// Binding index in the shader.
    pub binding: u32,
    /// Kind of resource bound here.
    pub descriptor_type: vk::DescriptorType,
    /// Stages that can see the binding.
    pub stage_flags: vk::ShaderStageFlags,
    /// Array length; 1 for a single resource.
    pub count: u32,
}

impl LayoutBinding {
    fn to_vk(self) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(self.binding)
            .descriptor_type(self.descriptor_type)
            .descriptor_count(self.count)
            .stage_flags(self.stage_flags)
    }
}

/// Ordered, duplicate-free map of layout slots.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LayoutBindings {
    slots: BTreeMap<u32, LayoutBinding>,
}

impl LayoutBindings {
    /// Adds a slot.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::DescriptorError`] if the index is already used
    /// or `count` is zero.
    pub fn insert(&mut self, slot: LayoutBinding) -> RhiResult<()> {
        if slot.count == 0 {
            return Err(RhiError::DescriptorError(format!(
                "binding {} has a descriptor count of zero",
                slot.binding
            )));
        }
        if self.slots.contains_key(&slot.binding) {
            return Err(RhiError::DescriptorError(format!(
                "binding {} is already in use",
                slot.binding
            )));
        }
        self.slots.insert(slot.binding, slot);
        Ok(())
    }

    /// Looks up a slot by binding index.
    pub fn get(&self, binding: u32) -> Option<&LayoutBinding> {
        self.slots.get(&binding)
    }

    /// Iterates slots in binding order.
    pub fn iter(&self) -> impl Iterator<Item = &LayoutBinding> {
        self.slots.values()
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the layout has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Descriptors per type that one set of this layout consumes.
    pub fn demand(&self) -> DescriptorDemand {
        let mut demand = DescriptorDemand::new();
        for slot in self.slots.values() {
            *demand.entry(slot.descriptor_type).or_insert(0) += slot.count;
        }
        demand
    }
}

/// Builder for [`DescriptorSetLayout`].
pub struct DescriptorSetLayoutBuilder {
    device: Arc<Device>,
    bindings: LayoutBindings,
    error: Option<RhiError>,
}

impl DescriptorSetLayoutBuilder {
    /// Starts an empty layout.
    pub fn new(device: Arc<Device>) -> Self {
        Self {
            device,
            bindings: LayoutBindings::default(),
            error: None,
        }
    }

    /// Adds a binding slot. A duplicate index is reported by [`build`](Self::build).
    pub fn add_binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
        count: u32,
    ) -> Self {
        if self.error.is_none() {
            let slot = LayoutBinding {
                binding,
                descriptor_type,
                stage_flags,
                count,
            };
            if let Err(e) = self.bindings.insert(slot) {
                self.error = Some(e);
            }
        }
        self
    }

    /// Creates the Vulkan layout.
    ///
    /// # Errors
    ///
    /// Returns the first error recorded by `add_binding`, or the Vulkan
    /// error from layout creation.
    pub fn build(self) -> RhiResult<DescriptorSetLayout> {
        if let Some(e) = self.error {
            return Err(e);
        }
        DescriptorSetLayout::new(self.device, self.bindings)
    }
}

/// Descriptor set layout wrapper.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
    bindings: LayoutBindings,
}

impl DescriptorSetLayout {
    fn new(device: Arc<Device>, bindings: LayoutBindings) -> RhiResult<Self> {
        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> =
            bindings.iter().map(|slot| slot.to_vk()).collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self {
            device,
            layout,
            bindings,
        })
    }

    /// Returns the Vulkan handle.
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Returns the slot at `binding`, if any.
    pub fn binding(&self, binding: u32) -> Option<&LayoutBinding> {
        self.bindings.get(binding)
    }

    /// Returns every slot.
    pub fn bindings(&self) -> &LayoutBindings {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
        debug!("Destroyed descriptor set layout");
    }
}

/// Host-side accounting of a pool's fixed capacity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolBudget {
    max_sets: u32,
    used_sets: u32,
    capacity: DescriptorDemand,
    used: DescriptorDemand,
}

impl PoolBudget {
    /// Creates a budget. Repeated types are summed.
    pub fn new(max_sets: u32, sizes: &[(vk::DescriptorType, u32)]) -> Self {
        let mut capacity = DescriptorDemand::new();
        for &(ty, count) in sizes {
            *capacity.entry(ty).or_insert(0) += count;
        }
        Self {
            max_sets,
            used_sets: 0,
            capacity,
            used: DescriptorDemand::new(),
        }
    }

    /// Whether one more set with `demand` fits.
    pub fn fits(&self, demand: &DescriptorDemand) -> bool {
        if self.used_sets >= self.max_sets {
            return false;
        }
        demand
            .iter()
            .all(|(ty, &count)| count <= self.remaining(*ty))
    }

    /// Reserves one set. Returns false and changes nothing if it does not fit.
    pub fn try_reserve(&mut self, demand: &DescriptorDemand) -> bool {
        if !self.fits(demand) {
            return false;
        }
        self.used_sets += 1;
        for (ty, &count) in demand {
            *self.used.entry(*ty).or_insert(0) += count;
        }
        true
    }

    /// Returns one set's worth of capacity.
    pub fn release(&mut self, demand: &DescriptorDemand) {
        self.used_sets = self.used_sets.saturating_sub(1);
        for (ty, &count) in demand {
            if let Some(used) = self.used.get_mut(ty) {
                *used = used.saturating_sub(count);
            }
        }
    }

    /// Returns everything to the pool.
    pub fn reset(&mut self) {
        self.used_sets = 0;
        self.used.clear();
    }

    /// Sets that can still be allocated.
    pub fn remaining_sets(&self) -> u32 {
        self.max_sets - self.used_sets
    }

    /// Descriptors of `ty` still available.
    pub fn remaining(&self, ty: vk::DescriptorType) -> u32 {
        let capacity = self.capacity.get(&ty).copied().unwrap_or(0);
        let used = self.used.get(&ty).copied().unwrap_or(0);
        capacity.saturating_sub(used)
    }

    /// Configured set limit.
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

/// Builder for [`DescriptorPool`].
pub struct DescriptorPoolBuilder {
    device: Arc<Device>,
    pool_sizes: Vec<(vk::DescriptorType, u32)>,
    max_sets: u32,
    flags: vk::DescriptorPoolCreateFlags,
}

impl DescriptorPoolBuilder {
    /// Default set limit when `set_max_sets` is not called.
    pub const DEFAULT_MAX_SETS: u32 = 1000;

    /// Starts an empty pool description.
    pub fn new(device: Arc<Device>) -> Self {
        Self {
            device,
            pool_sizes: Vec::new(),
            max_sets: Self::DEFAULT_MAX_SETS,
            flags: vk::DescriptorPoolCreateFlags::empty(),
        }
    }

    /// Adds capacity for `count` descriptors of `descriptor_type`.
    pub fn add_pool_size(mut self, descriptor_type: vk::DescriptorType, count: u32) -> Self {
        self.pool_sizes.push((descriptor_type, count));
        self
    }

    /// Sets creation flags (e.g. `FREE_DESCRIPTOR_SET`).
    pub fn set_pool_flags(mut self, flags: vk::DescriptorPoolCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the maximum number of sets.
    pub fn set_max_sets(mut self, count: u32) -> Self {
        self.max_sets = count;
        self
    }

    /// Creates the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if no sizes were given, `max_sets` is zero, or
    /// pool creation fails.
    pub fn build(self) -> RhiResult<DescriptorPool> {
        if self.pool_sizes.is_empty() || self.max_sets == 0 {
            return Err(RhiError::DescriptorError(
                "descriptor pool needs at least one pool size and one set".to_string(),
            ));
        }
        DescriptorPool::new(self.device, self.max_sets, self.flags, &self.pool_sizes)
    }
}

/// Fixed-capacity descriptor pool.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    flags: vk::DescriptorPoolCreateFlags,
    budget: Mutex<PoolBudget>,
}

impl DescriptorPool {
    fn new(
        device: Arc<Device>,
        max_sets: u32,
        flags: vk::DescriptorPoolCreateFlags,
        sizes: &[(vk::DescriptorType, u32)],
    ) -> RhiResult<Self> {
        let pool_sizes: Vec<vk::DescriptorPoolSize> = sizes
            .iter()
            .map(|&(ty, count)| vk::DescriptorPoolSize::default().ty(ty).descriptor_count(count))
            .collect();

        let create_info = vk::DescriptorPoolCreateInfo::default()
            .flags(flags)
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };

        debug!(
            "Created descriptor pool (max sets: {}, {} pool size(s))",
            max_sets,
            pool_sizes.len()
        );

        Ok(Self {
            device,
            pool,
            flags,
            budget: Mutex::new(PoolBudget::new(max_sets, sizes)),
        })
    }

    /// Returns the Vulkan handle.
    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Sets that can still be allocated.
    pub fn remaining_sets(&self) -> RhiResult<u32> {
        Ok(self.budget()?.remaining_sets())
    }

    /// Allocates one raw set for `layout`.
    ///
    /// Returns `Ok(None)` when the pool's capacity is exhausted, whether the
    /// host budget or the driver detects it.
    ///
    /// # Errors
    ///
    /// Any other allocation failure.
    pub fn allocate_descriptor(
        &self,
        layout: &DescriptorSetLayout,
    ) -> RhiResult<Option<vk::DescriptorSet>> {
        let demand = layout.bindings().demand();
        {
            let mut budget = self.budget()?;
            if !budget.try_reserve(&demand) {
                warn!(
                    "Descriptor pool exhausted ({} of {} sets in use)",
                    budget.max_sets() - budget.remaining_sets(),
                    budget.max_sets()
                );
                return Ok(None);
            }
        }

        let layouts = [layout.handle()];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        match unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => Ok(sets.into_iter().next()),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                self.budget()?.release(&demand);
                warn!("Driver reported descriptor pool exhaustion");
                Ok(None)
            }
            Err(e) => {
                self.budget()?.release(&demand);
                Err(e.into())
            }
        }
    }

    /// Returns sets to the pool. Requires `FREE_DESCRIPTOR_SET`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool was created without the flag or the
    /// free call fails.
    pub fn free_descriptors(&self, sets: Vec<DescriptorSet>) -> RhiResult<()> {
        if !self
            .flags
            .contains(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        {
            return Err(RhiError::DescriptorError(
                "pool was not created with FREE_DESCRIPTOR_SET".to_string(),
            ));
        }
        if sets.is_empty() {
            return Ok(());
        }

        let handles: Vec<vk::DescriptorSet> = sets.iter().map(DescriptorSet::handle).collect();
        unsafe {
            self.device
                .handle()
                .free_descriptor_sets(self.pool, &handles)?;
        }

        let mut budget = self.budget()?;
        for set in &sets {
            budget.release(&set.demand);
        }
        Ok(())
    }

    /// Returns every set to the pool. Sets allocated earlier must not be
    /// used afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset fails.
    pub fn reset_pool(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())?;
        }
        self.budget()?.reset();
        Ok(())
    }

    fn budget(&self) -> RhiResult<MutexGuard<'_, PoolBudget>> {
        self.budget
            .lock()
            .map_err(|_| RhiError::InvalidHandle("descriptor budget mutex poisoned".to_string()))
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool");
    }
}

/// A resource reference bound at one slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundResource {
    /// A buffer range.
    Buffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    /// An image view, optionally with a sampler.
    Image {
        sampler: vk::Sampler,
        view: vk::ImageView,
        layout: vk::ImageLayout,
    },
}

impl BoundResource {
    /// Captures a buffer descriptor.
    pub fn from_buffer_info(info: &vk::DescriptorBufferInfo) -> Self {
        Self::Buffer {
            buffer: info.buffer,
            offset: info.offset,
            range: info.range,
        }
    }

    /// Captures an image descriptor.
    pub fn from_image_info(info: &vk::DescriptorImageInfo) -> Self {
        Self::Image {
            sampler: info.sampler,
            view: info.image_view,
            layout: info.image_layout,
        }
    }

    fn is_buffer(&self) -> bool {
        matches!(self, Self::Buffer { .. })
    }
}

/// A staged write: which slot gets which resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StagedWrite {
    /// Target binding index.
    pub binding: u32,
    /// Resource to bind.
    pub resource: BoundResource,
}

fn is_buffer_type(ty: vk::DescriptorType) -> bool {
    matches!(
        ty,
        vk::DescriptorType::UNIFORM_BUFFER
            | vk::DescriptorType::STORAGE_BUFFER
            | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
            | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
    )
}

fn is_image_type(ty: vk::DescriptorType) -> bool {
    matches!(
        ty,
        vk::DescriptorType::SAMPLER
            | vk::DescriptorType::COMBINED_IMAGE_SAMPLER
            | vk::DescriptorType::SAMPLED_IMAGE
            | vk::DescriptorType::STORAGE_IMAGE
            | vk::DescriptorType::INPUT_ATTACHMENT
    )
}

/// Checks staged writes against a layout.
///
/// Every write must target an existing single-descriptor slot whose type
/// takes the kind of resource given.
///
/// # Errors
///
/// Returns [`RhiError::DescriptorError`] describing the first bad write.
pub fn validate_writes(bindings: &LayoutBindings, writes: &[StagedWrite]) -> RhiResult<()> {
    for write in writes {
        let slot = bindings.get(write.binding).ok_or_else(|| {
            RhiError::DescriptorError(format!("layout has no binding {}", write.binding))
        })?;

        if slot.count != 1 {
            return Err(RhiError::DescriptorError(format!(
                "binding {} expects {} descriptors, a single resource was given",
                write.binding, slot.count
            )));
        }

        let kind_ok = if write.resource.is_buffer() {
            is_buffer_type(slot.descriptor_type)
        } else {
            is_image_type(slot.descriptor_type)
        };
        if !kind_ok {
            return Err(RhiError::DescriptorError(format!(
                "binding {} is {:?}, cannot bind {}",
                write.binding,
                slot.descriptor_type,
                if write.resource.is_buffer() { "a buffer" } else { "an image" }
            )));
        }
    }
    Ok(())
}

/// What a set currently has bound at each slot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BindingRecord {
    bound: BTreeMap<u32, BoundResource>,
}

impl BindingRecord {
    /// Records the writes; slots not mentioned keep their resource.
    pub fn apply(&mut self, writes: &[StagedWrite]) {
        for write in writes {
            self.bound.insert(write.binding, write.resource);
        }
    }

    /// Resource at `binding`, if one was ever written.
    pub fn get(&self, binding: u32) -> Option<&BoundResource> {
        self.bound.get(&binding)
    }

    /// Number of slots with a resource.
    pub fn len(&self) -> usize {
        self.bound.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.bound.is_empty()
    }
}

/// Writes staged for one set, at most one per binding.
///
/// Staging a binding twice keeps only the later resource, moved to the
/// end of the staging order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StagedWrites {
    writes: Vec<StagedWrite>,
}

impl StagedWrites {
    /// Stages `resource` at `binding`, replacing an earlier write there.
    pub fn stage(&mut self, binding: u32, resource: BoundResource) {
        self.writes.retain(|w| w.binding != binding);
        self.writes.push(StagedWrite { binding, resource });
    }

    /// Staged writes, in staging order.
    pub fn as_slice(&self) -> &[StagedWrite] {
        &self.writes
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Checks that the writes may go into `set`, a set of `layout` whose
    /// slots are `bindings`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::DescriptorError`] if `set` was allocated against
    /// another layout, or a write does not fit `bindings`.
    pub fn check_target(
        &self,
        layout: vk::DescriptorSetLayout,
        bindings: &LayoutBindings,
        set: &DescriptorSet,
    ) -> RhiResult<()> {
        if set.layout != layout {
            return Err(RhiError::DescriptorError(format!(
                "set was allocated with layout {:?}, writer targets {:?}",
                set.layout, layout
            )));
        }
        validate_writes(bindings, &self.writes)
    }

    /// Records the writes as bound in `set`.
    pub fn record_into(&self, set: &mut DescriptorSet) {
        set.record.apply(&self.writes);
    }
}

/// A descriptor set allocated from a [`DescriptorPool`].
///
/// The Vulkan handle is owned by the pool; dropping this value does not
/// free it. Use [`DescriptorPool::free_descriptors`] to return it early.
#[derive(Debug)]
pub struct DescriptorSet {
    set: vk::DescriptorSet,
    layout: vk::DescriptorSetLayout,
    demand: DescriptorDemand,
    record: BindingRecord,
}

impl DescriptorSet {
    /// Returns the Vulkan handle.
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSet {
        self.set
    }

    /// Layout the set was allocated against.
    #[inline]
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// The resource currently bound at `binding`.
    pub fn bound(&self, binding: u32) -> Option<&BoundResource> {
        self.record.get(binding)
    }

    /// Number of slots that have a resource.
    pub fn binding_count(&self) -> usize {
        self.record.len()
    }

    /// Everything currently bound.
    pub fn record(&self) -> &BindingRecord {
        &self.record
    }
}

/// Stages writes and commits them into a set.
pub struct DescriptorWriter<'a> {
    layout: &'a DescriptorSetLayout,
    pool: &'a DescriptorPool,
    writes: StagedWrites,
}

impl<'a> DescriptorWriter<'a> {
    /// Starts a writer for sets of `layout` drawn from `pool`.
    pub fn new(layout: &'a DescriptorSetLayout, pool: &'a DescriptorPool) -> Self {
        Self {
            layout,
            pool,
            writes: StagedWrites::default(),
        }
    }

    /// Stages a buffer at `binding`. A later write to the same slot wins.
    pub fn write_buffer(mut self, binding: u32, info: vk::DescriptorBufferInfo) -> Self {
        self.writes
            .stage(binding, BoundResource::from_buffer_info(&info));
        self
    }

    /// Stages an image at `binding`. A later write to the same slot wins.
    pub fn write_image(mut self, binding: u32, info: vk::DescriptorImageInfo) -> Self {
        self.writes
            .stage(binding, BoundResource::from_image_info(&info));
        self
    }

    /// Validates, allocates a new set and applies every staged write.
    ///
    /// Returns `Ok(None)` if the pool is exhausted. When validation fails
    /// nothing is allocated.
    ///
    /// # Errors
    ///
    /// Invalid writes or a device-level allocation failure.
    pub fn build(self) -> RhiResult<Option<DescriptorSet>> {
        validate_writes(self.layout.bindings(), self.writes.as_slice())?;

        let Some(raw) = self.pool.allocate_descriptor(self.layout)? else {
            return Ok(None);
        };

        let mut set = DescriptorSet {
            set: raw,
            layout: self.layout.handle(),
            demand: self.layout.bindings().demand(),
            record: BindingRecord::default(),
        };
        self.commit(&mut set);
        Ok(Some(set))
    }

    /// Rewrites only the staged slots of an existing set.
    ///
    /// The set must not be in use by a pending submission.
    ///
    /// # Errors
    ///
    /// Invalid writes, or `set` belongs to a different layout.
    pub fn overwrite(self, set: &mut DescriptorSet) -> RhiResult<()> {
        self.writes
            .check_target(self.layout.handle(), self.layout.bindings(), set)?;
        self.commit(set);
        Ok(())
    }

    fn commit(&self, set: &mut DescriptorSet) {
        let buffer_infos: Vec<vk::DescriptorBufferInfo> = self
            .writes
            .as_slice()
            .iter()
            .filter_map(|w| match w.resource {
                BoundResource::Buffer {
                    buffer,
                    offset,
                    range,
                } => Some(
                    vk::DescriptorBufferInfo::default()
                        .buffer(buffer)
                        .offset(offset)
                        .range(range),
                ),
                BoundResource::Image { .. } => None,
            })
            .collect();
        let image_infos: Vec<vk::DescriptorImageInfo> = self
            .writes
            .as_slice()
            .iter()
            .filter_map(|w| match w.resource {
                BoundResource::Image {
                    sampler,
                    view,
                    layout,
                } => Some(
                    vk::DescriptorImageInfo::default()
                        .sampler(sampler)
                        .image_view(view)
                        .image_layout(layout),
                ),
                BoundResource::Buffer { .. } => None,
            })
            .collect();

        let mut next_buffer = 0;
        let mut next_image = 0;
        let mut vk_writes = Vec::with_capacity(self.writes.len());
        for write in self.writes.as_slice() {
            // validate_writes guarantees the slot exists
            let Some(slot) = self.layout.binding(write.binding) else {
                continue;
            };
            let vk_write = vk::WriteDescriptorSet::default()
                .dst_set(set.set)
                .dst_binding(write.binding)
                .dst_array_element(0)
                .descriptor_type(slot.descriptor_type);
            let vk_write = if write.resource.is_buffer() {
                next_buffer += 1;
                vk_write.buffer_info(&buffer_infos[next_buffer - 1..next_buffer])
            } else {
                next_image += 1;
                vk_write.image_info(&image_infos[next_image - 1..next_image])
            };
            vk_writes.push(vk_write);
        }

        unsafe {
            self.layout
                .device
                .handle()
                .update_descriptor_sets(&vk_writes, &[]);
        }
        self.writes.record_into(set);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(binding: u32, ty: vk::DescriptorType, count: u32) -> LayoutBinding {
        LayoutBinding {
            binding,
            descriptor_type: ty,
            stage_flags: vk::ShaderStageFlags::COMPUTE,
            count,
        }
    }

    fn compute_bindings() -> LayoutBindings {
        let mut bindings = LayoutBindings::default();
        bindings
            .insert(slot(0, vk::DescriptorType::UNIFORM_BUFFER, 1))
            .unwrap();
        bindings
            .insert(slot(1, vk::DescriptorType::STORAGE_IMAGE, 1))
            .unwrap();
        bindings
    }

    fn buffer(raw: u64) -> BoundResource {
        BoundResource::Buffer {
            buffer: vk::Handle::from_raw(raw),
            offset: 0,
            range: vk::WHOLE_SIZE,
        }
    }

    fn image(raw: u64) -> BoundResource {
        BoundResource::Image {
            sampler: vk::Sampler::null(),
            view: vk::Handle::from_raw(raw),
            layout: vk::ImageLayout::GENERAL,
        }
    }

    #[test]
    fn test_duplicate_binding_rejected() {
        let mut bindings = compute_bindings();
        let err = bindings
            .insert(slot(1, vk::DescriptorType::UNIFORM_BUFFER, 1))
            .unwrap_err();
        assert!(matches!(err, RhiError::DescriptorError(_)));
        assert_eq!(bindings.len(), 2);
        assert_eq!(
            bindings.get(1).unwrap().descriptor_type,
            vk::DescriptorType::STORAGE_IMAGE
        );
    }

    #[test]
    fn test_zero_count_rejected() {
        let mut bindings = LayoutBindings::default();
        assert!(bindings
            .insert(slot(0, vk::DescriptorType::UNIFORM_BUFFER, 0))
            .is_err());
    }

    #[test]
    fn test_bindings_iterate_in_index_order() {
        let mut bindings = LayoutBindings::default();
        for index in [3, 0, 2] {
            bindings
                .insert(slot(index, vk::DescriptorType::UNIFORM_BUFFER, 1))
                .unwrap();
        }
        let order: Vec<u32> = bindings.iter().map(|s| s.binding).collect();
        assert_eq!(order, vec![0, 2, 3]);
    }

    #[test]
    fn test_demand_sums_per_type() {
        let mut bindings = compute_bindings();
        bindings
            .insert(slot(2, vk::DescriptorType::UNIFORM_BUFFER, 2))
            .unwrap();
        let demand = bindings.demand();
        assert_eq!(demand[&vk::DescriptorType::UNIFORM_BUFFER], 3);
        assert_eq!(demand[&vk::DescriptorType::STORAGE_IMAGE], 1);
    }

    #[test]
    fn test_budget_limits_set_count() {
        let frames = 2;
        let mut budget = PoolBudget::new(
            3 * frames,
            &[
                (vk::DescriptorType::UNIFORM_BUFFER, 100),
                (vk::DescriptorType::STORAGE_IMAGE, 100),
            ],
        );
        let demand = compute_bindings().demand();

        for _ in 0..3 * frames {
            assert!(budget.try_reserve(&demand));
        }
        assert_eq!(budget.remaining_sets(), 0);
        assert!(!budget.try_reserve(&demand));
        assert!(!budget.try_reserve(&demand));
    }

    #[test]
    fn test_budget_limits_descriptor_count() {
        let mut budget = PoolBudget::new(
            10,
            &[
                (vk::DescriptorType::UNIFORM_BUFFER, 1),
                (vk::DescriptorType::UNIFORM_BUFFER, 1),
                (vk::DescriptorType::STORAGE_IMAGE, 1),
            ],
        );
        let demand = compute_bindings().demand();

        assert_eq!(budget.remaining(vk::DescriptorType::UNIFORM_BUFFER), 2);
        assert!(budget.try_reserve(&demand));
        // Storage image capacity is gone; a failed reserve changes nothing
        assert!(!budget.try_reserve(&demand));
        assert_eq!(budget.remaining_sets(), 9);
        assert_eq!(budget.remaining(vk::DescriptorType::UNIFORM_BUFFER), 1);
    }

    #[test]
    fn test_budget_release_and_reset() {
        let mut budget = PoolBudget::new(1, &[(vk::DescriptorType::STORAGE_IMAGE, 1)]);
        let mut demand = DescriptorDemand::new();
        demand.insert(vk::DescriptorType::STORAGE_IMAGE, 1);

        assert!(budget.try_reserve(&demand));
        assert!(!budget.try_reserve(&demand));
        budget.release(&demand);
        assert!(budget.try_reserve(&demand));
        budget.reset();
        assert_eq!(budget.remaining_sets(), 1);
        assert_eq!(budget.remaining(vk::DescriptorType::STORAGE_IMAGE), 1);
    }

    #[test]
    fn test_budget_unknown_type_does_not_fit() {
        let budget = PoolBudget::new(4, &[(vk::DescriptorType::UNIFORM_BUFFER, 4)]);
        let mut demand = DescriptorDemand::new();
        demand.insert(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1);
        assert!(!budget.fits(&demand));
    }

    #[test]
    fn test_validate_writes_accepts_matching_kinds() {
        let writes = [
            StagedWrite {
                binding: 0,
                resource: buffer(1),
            },
            StagedWrite {
                binding: 1,
                resource: image(2),
            },
        ];
        assert!(validate_writes(&compute_bindings(), &writes).is_ok());
    }

    #[test]
    fn test_validate_writes_rejects_missing_binding() {
        let writes = [StagedWrite {
            binding: 7,
            resource: buffer(1),
        }];
        assert!(validate_writes(&compute_bindings(), &writes).is_err());
    }

    #[test]
    fn test_validate_writes_rejects_kind_mismatch() {
        let writes = [StagedWrite {
            binding: 1,
            resource: buffer(1),
        }];
        assert!(validate_writes(&compute_bindings(), &writes).is_err());
    }

    #[test]
    fn test_validate_writes_rejects_array_slot() {
        let mut bindings = LayoutBindings::default();
        bindings
            .insert(slot(0, vk::DescriptorType::SAMPLED_IMAGE, 4))
            .unwrap();
        let writes = [StagedWrite {
            binding: 0,
            resource: image(1),
        }];
        assert!(validate_writes(&bindings, &writes).is_err());
    }

    #[test]
    fn test_record_overwrite_is_idempotent() {
        let mut record = BindingRecord::default();
        record.apply(&[
            StagedWrite {
                binding: 0,
                resource: buffer(1),
            },
            StagedWrite {
                binding: 1,
                resource: image(2),
            },
        ]);

        let rebind = [StagedWrite {
            binding: 1,
            resource: image(3),
        }];
        let mut once = record.clone();
        once.apply(&rebind);
        let mut twice = record.clone();
        twice.apply(&rebind);
        twice.apply(&rebind);

        assert_eq!(once, twice);
        assert_eq!(once.get(0), Some(&buffer(1)));
        assert_eq!(once.get(1), Some(&image(3)));
    }

    fn set_of(layout: u64) -> DescriptorSet {
        DescriptorSet {
            set: vk::Handle::from_raw(0x500),
            layout: vk::Handle::from_raw(layout),
            demand: compute_bindings().demand(),
            record: BindingRecord::default(),
        }
    }

    #[test]
    fn test_staging_same_binding_keeps_latest() {
        let mut writes = StagedWrites::default();
        writes.stage(1, image(2));
        writes.stage(0, buffer(1));
        writes.stage(1, image(3));

        assert_eq!(writes.len(), 2);
        assert_eq!(
            writes.as_slice(),
            &[
                StagedWrite {
                    binding: 0,
                    resource: buffer(1),
                },
                StagedWrite {
                    binding: 1,
                    resource: image(3),
                },
            ]
        );
    }

    #[test]
    fn test_overwrite_records_only_staged_slots() {
        let mut set = set_of(0x10);
        let mut initial = StagedWrites::default();
        initial.stage(0, buffer(1));
        initial.stage(1, image(2));
        initial.record_into(&mut set);

        let mut rebind = StagedWrites::default();
        rebind.stage(1, image(3));
        rebind
            .check_target(vk::Handle::from_raw(0x10), &compute_bindings(), &set)
            .unwrap();
        rebind.record_into(&mut set);

        assert_eq!(set.binding_count(), 2);
        assert_eq!(set.bound(0), Some(&buffer(1)));
        assert_eq!(set.bound(1), Some(&image(3)));
    }

    #[test]
    fn test_overwrite_rejects_foreign_layout() {
        let set = set_of(0x10);
        let mut writes = StagedWrites::default();
        writes.stage(1, image(3));

        let err = writes
            .check_target(vk::Handle::from_raw(0x20), &compute_bindings(), &set)
            .unwrap_err();
        assert!(matches!(err, RhiError::DescriptorError(_)));
        assert!(set.record().is_empty());
    }

    #[test]
    fn test_overwrite_validates_against_layout() {
        let set = set_of(0x10);
        let mut writes = StagedWrites::default();
        writes.stage(0, image(3));

        let err = writes
            .check_target(set.layout(), &compute_bindings(), &set)
            .unwrap_err();
        assert!(err.to_string().contains("binding 0"));
    }

    #[test]
    fn test_descriptor_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DescriptorSetLayout>();
        assert_send_sync::<DescriptorPool>();
        assert_send_sync::<DescriptorSet>();
    }
}
