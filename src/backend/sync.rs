// Synchronization primitives
//
// The per-slot semaphore orders acquire -> render on the GPU; the per-slot
// fence keeps the CPU at most `frames_in_flight` frames ahead of it. The
// render -> present semaphores live with the swapchain images (frames.rs).

use ash::vk;

use super::handles::{take, Factory, Releaser};
use crate::error::Result;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &impl Factory) -> Result<Self> {
        let mut sync = Self {
            image_available: vk::Semaphore::null(),
            in_flight_fence: vk::Fence::null(),
        };

        if let Err(e) = sync.create_objects(device) {
            sync.release(device);
            return Err(e);
        }
        Ok(sync)
    }

    fn create_objects(&mut self, device: &impl Factory) -> Result<()> {
        self.image_available = device.create_semaphore()?;
        self.in_flight_fence = device.create_fence(true)?; // Start signaled
        Ok(())
    }

    pub fn release(&mut self, releaser: &impl Releaser) {
        if let Some(semaphore) = take(&mut self.image_available) {
            releaser.destroy_semaphore(semaphore);
        }
        if let Some(fence) = take(&mut self.in_flight_fence) {
            releaser.destroy_fence(fence);
        }
    }
}

/// Rotates through sync slots and remembers which slot's fence last
/// guarded each swapchain image.
pub struct FramePacer {
    current: usize,
    slots: usize,
    images_in_flight: Vec<vk::Fence>,
}

impl FramePacer {
    pub fn new(slots: usize) -> Self {
        Self {
            current: 0,
            slots: slots.max(1),
            images_in_flight: Vec::new(),
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots;
    }

    /// Forget image ownership after the swapchain was rebuilt
    pub fn reset_images(&mut self, image_count: usize) {
        self.images_in_flight.clear();
        self.images_in_flight.resize(image_count, vk::Fence::null());
    }

    /// Claim `image` for `fence`, returning the fence that still guards it
    /// (null when the image is free).
    pub fn claim_image(&mut self, image: usize, fence: vk::Fence) -> vk::Fence {
        match self.images_in_flight.get_mut(image) {
            Some(slot) => std::mem::replace(slot, fence),
            None => vk::Fence::null(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::handles::fake::FakeDevice;
    use ash::vk::Handle;

    #[test]
    fn pacer_cycles_through_slots() {
        let mut pacer = FramePacer::new(2);
        let seen: Vec<_> = (0..5)
            .map(|_| {
                let slot = pacer.current();
                pacer.advance();
                slot
            })
            .collect();
        assert_eq!(seen, [0, 1, 0, 1, 0]);
    }

    #[test]
    fn single_slot_pacer_never_moves() {
        let mut pacer = FramePacer::new(0);
        pacer.advance();
        assert_eq!(pacer.current(), 0);
    }

    #[test]
    fn claiming_an_image_reports_previous_owner() {
        let mut pacer = FramePacer::new(2);
        pacer.reset_images(3);
        let a = vk::Fence::from_raw(1);
        let b = vk::Fence::from_raw(2);

        assert_eq!(pacer.claim_image(1, a), vk::Fence::null());
        assert_eq!(pacer.claim_image(1, b), a);
        assert_eq!(pacer.claim_image(0, b), vk::Fence::null());

        pacer.reset_images(3);
        assert_eq!(pacer.claim_image(1, a), vk::Fence::null());
    }

    #[test]
    fn release_is_idempotent() {
        let releaser = FakeDevice::default();
        let mut sync = FrameSync {
            image_available: vk::Semaphore::from_raw(1),
            in_flight_fence: vk::Fence::from_raw(3),
        };

        sync.release(&releaser);
        sync.release(&releaser);

        assert_eq!(releaser.kinds(), ["semaphore", "fence"]);
    }

    #[test]
    fn failed_fence_releases_the_semaphore() {
        let device = FakeDevice::default();
        device.fail_on.set(Some("fence"));

        assert!(FrameSync::new(&device).is_err());

        assert_eq!(device.kinds(), ["semaphore"]);
        device.assert_all_released();
    }
}
