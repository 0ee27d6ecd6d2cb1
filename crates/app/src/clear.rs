//! Per-slot command buffers that clear the acquired image.

use std::sync::Arc;

use ash::vk;
use framechain_rhi::device::{SurfaceDevice, VulkanDevice};
use framechain_rhi::{RhiError, RhiResult};
use tracing::info;

/// One command buffer per frame slot, each clearing a swapchain image and
/// leaving it ready for presentation.
///
/// A slot's buffer is re-recorded only after the slot's fence has been
/// waited on, so it is never reset while the GPU still executes it.
pub struct ClearCommands {
    device: Arc<VulkanDevice>,
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
}

impl ClearCommands {
    /// Creates a resettable pool on the graphics family with one buffer
    /// per frame slot.
    pub fn new(device: Arc<VulkanDevice>, frames_in_flight: usize) -> RhiResult<Self> {
        let queue_family_index = device.queue_families().graphics_family;

        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe {
            device
                .handle()
                .create_command_pool(&create_info, None)
                .map_err(RhiError::allocation("command pool"))?
        };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(frames_in_flight as u32);

        let buffers = match unsafe { device.handle().allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers,
            Err(e) => {
                unsafe { device.handle().destroy_command_pool(pool, None) };
                return Err(RhiError::allocation("command buffers")(e));
            }
        };

        info!(
            "Command pool created for queue family {} with {} buffers",
            queue_family_index,
            buffers.len()
        );

        Ok(Self {
            device,
            pool,
            buffers,
        })
    }

    /// Records slot `slot`'s buffer to clear `image` to `color`.
    ///
    /// When `clear` is false (images lack `TRANSFER_DST` usage) the image
    /// is only transitioned for presentation.
    pub fn record(
        &self,
        slot: usize,
        image: vk::Image,
        color: [f32; 4],
        clear: bool,
    ) -> RhiResult<vk::CommandBuffer> {
        let cmd = *self.buffers.get(slot).ok_or_else(|| {
            RhiError::SwapchainError(format!("no command buffer for frame slot {slot}"))
        })?;
        let device = self.device.handle();

        let range = vk::ImageSubresourceRange::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .level_count(1)
            .layer_count(1);

        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(cmd, &begin_info)?;

            if clear {
                let to_transfer = vk::ImageMemoryBarrier::default()
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .image(image)
                    .subresource_range(range);
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_transfer],
                );

                let clear_color = vk::ClearColorValue { float32: color };
                device.cmd_clear_color_image(
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &clear_color,
                    &[range],
                );

                let to_present = vk::ImageMemoryBarrier::default()
                    .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .image(image)
                    .subresource_range(range);
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_present],
                );
            } else {
                let to_present = vk::ImageMemoryBarrier::default()
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(range);
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                    vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_present],
                );
            }

            device.end_command_buffer(cmd)?;
        }

        Ok(cmd)
    }
}

impl Drop for ClearCommands {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        tracing::debug!("Command pool destroyed");
    }
}

/// Slowly cycling clear color for frame `frame`.
pub fn clear_color(frame: u64) -> [f32; 4] {
    let t = (frame % 240) as f32 / 240.0;
    let wave = if t < 0.5 { t * 2.0 } else { 2.0 - t * 2.0 };
    [wave, 0.1, 1.0 - wave, 1.0]
}
