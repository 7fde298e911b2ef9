//! Integration tests for the host-side descriptor bookkeeping, using the
//! same layouts and pool sizing the application builds.

use horizon_rhi::descriptor::{
    BindingRecord, BoundResource, LayoutBinding, LayoutBindings, PoolBudget, StagedWrite,
    validate_writes,
};
use horizon_rhi::vk;
use horizon_rhi::vk::Handle;

const FRAMES: u32 = 2;

fn compute_bindings() -> LayoutBindings {
    let mut bindings = LayoutBindings::default();
    bindings
        .insert(LayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            stage_flags: vk::ShaderStageFlags::COMPUTE,
            count: 1,
        })
        .unwrap();
    bindings
        .insert(LayoutBinding {
            binding: 1,
            descriptor_type: vk::DescriptorType::STORAGE_IMAGE,
            stage_flags: vk::ShaderStageFlags::COMPUTE,
            count: 1,
        })
        .unwrap();
    bindings
}

fn render_bindings() -> LayoutBindings {
    let mut bindings = LayoutBindings::default();
    bindings
        .insert(LayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            count: 1,
        })
        .unwrap();
    bindings
}

fn app_budget() -> PoolBudget {
    PoolBudget::new(
        3 * FRAMES,
        &[
            (vk::DescriptorType::UNIFORM_BUFFER, 2 * FRAMES),
            (vk::DescriptorType::STORAGE_IMAGE, 2 * FRAMES),
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, FRAMES),
        ],
    )
}

fn buffer(raw: u64) -> BoundResource {
    BoundResource::Buffer {
        buffer: vk::Buffer::from_raw(raw),
        offset: 0,
        range: vk::WHOLE_SIZE,
    }
}

fn storage_view(raw: u64) -> BoundResource {
    BoundResource::Image {
        sampler: vk::Sampler::null(),
        view: vk::ImageView::from_raw(raw),
        layout: vk::ImageLayout::GENERAL,
    }
}

#[test]
fn test_app_sets_fit_exactly() {
    let mut budget = app_budget();
    let compute = compute_bindings().demand();
    let render = render_bindings().demand();

    for _ in 0..FRAMES {
        // init, compute, render
        assert!(budget.try_reserve(&compute));
        assert!(budget.try_reserve(&compute));
        assert!(budget.try_reserve(&render));
    }

    assert_eq!(budget.remaining_sets(), 0);
    assert!(!budget.try_reserve(&render));
    assert!(!budget.try_reserve(&compute));
}

#[test]
fn test_resize_overwrite_keeps_untouched_bindings() {
    let bindings = compute_bindings();
    let initial = [
        StagedWrite {
            binding: 0,
            resource: buffer(1),
        },
        StagedWrite {
            binding: 1,
            resource: storage_view(10),
        },
    ];
    validate_writes(&bindings, &initial).unwrap();

    let mut record = BindingRecord::default();
    record.apply(&initial);

    // After a resize only the image changes
    let resize = [StagedWrite {
        binding: 1,
        resource: storage_view(11),
    }];
    validate_writes(&bindings, &resize).unwrap();
    record.apply(&resize);
    let after_first = record.clone();
    record.apply(&resize);

    assert_eq!(record, after_first);
    assert_eq!(record.get(0), Some(&buffer(1)));
    assert_eq!(record.get(1), Some(&storage_view(11)));
}

#[test]
fn test_mismatched_writes_rejected() {
    let render = render_bindings();
    assert!(
        validate_writes(
            &render,
            &[StagedWrite {
                binding: 0,
                resource: buffer(1)
            }]
        )
        .is_err()
    );
    assert!(
        validate_writes(
            &render,
            &[StagedWrite {
                binding: 1,
                resource: storage_view(1)
            }]
        )
        .is_err()
    );
}
