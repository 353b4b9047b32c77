mod common;

use std::sync::Arc;

use ash::vk;
use lumen_renderer::{
    DescriptorManager, DescriptorPoolConfig, DescriptorSetLayoutInfo, INITIAL_LAYOUT_CAPACITY, LayoutBinding,
};
use lumen_rhi::mock::{MockDevice, MockObject};

fn manager(device: &Arc<MockDevice>) -> DescriptorManager {
    common::init_logging();
    DescriptorManager::new(device.clone(), &DescriptorPoolConfig::default()).unwrap()
}

fn material_layout(set: u32) -> DescriptorSetLayoutInfo {
    DescriptorSetLayoutInfo::new(set, vec![
        LayoutBinding::uniform_buffer(0, vk::ShaderStageFlags::VERTEX),
        LayoutBinding::combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT),
    ])
}

#[test]
fn test_equal_layouts_share_one_creation() {
    let device = Arc::new(MockDevice::new());
    let mut descriptors = manager(&device);

    let a = descriptors.get_descriptor_set_layout(&material_layout(0)).unwrap();
    let b = descriptors.get_descriptor_set_layout(&material_layout(0)).unwrap();
    let c = descriptors.get_descriptor_set_layout(&material_layout(1)).unwrap();

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(descriptors.resolve(a).unwrap(), descriptors.resolve(c).unwrap());
    assert_eq!(device.created(MockObject::DescriptorSetLayout), 1);
    assert_eq!(descriptors.layout_count(), 1);
    assert_eq!(descriptors.set_index(c).unwrap(), 1);
    assert_eq!(descriptors.handle_count(), 3);
}

#[test]
fn test_handles_survive_table_growth() {
    let device = Arc::new(MockDevice::new());
    let mut descriptors = manager(&device);
    let count = INITIAL_LAYOUT_CAPACITY * 3;

    let mut issued = Vec::with_capacity(count);
    for binding in 0..count as u32 {
        let info = DescriptorSetLayoutInfo::new(0, vec![LayoutBinding::uniform_buffer(
            binding,
            vk::ShaderStageFlags::VERTEX,
        )]);
        let handle = descriptors.get_descriptor_set_layout(&info).unwrap();
        issued.push((handle, descriptors.resolve(handle).unwrap(), binding));
    }

    assert!(descriptors.layout_capacity() > INITIAL_LAYOUT_CAPACITY);
    assert_eq!(descriptors.layout_count(), count);
    assert_eq!(device.created(MockObject::DescriptorSetLayout), count);
    for (handle, layout, binding) in issued {
        assert_eq!(descriptors.resolve(handle).unwrap(), layout);
        assert_eq!(descriptors.layout_info(handle).unwrap().bindings[0].binding, binding);
    }
}

#[test]
fn test_per_frame_sets_are_distinct() {
    let device = Arc::new(MockDevice::new());
    let mut descriptors = manager(&device);
    let layout = descriptors.get_descriptor_set_layout(&material_layout(0)).unwrap();

    let sets = descriptors.allocate_descriptor_sets(layout, 2).unwrap();
    assert_eq!(sets.len(), 2);
    assert_ne!(sets[0].handle(), sets[1].handle());
    assert_eq!(device.live(MockObject::DescriptorSet), 2);

    drop(sets);
    assert_eq!(device.live(MockObject::DescriptorSet), 0);
}
