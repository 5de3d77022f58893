// Resize coordination
//
// Window resizes arrive as events; they are queued here and applied by the
// main loop right before the next frame, so the swapchain is rebuilt at most
// once per frame no matter how many notifications piled up.

use ash::vk;

use crate::error::Result;

/// Something that can tear down and rebuild its size-dependent resources
pub trait Rebuild {
    fn rebuild(&mut self, extent: vk::Extent2D) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct ResizeCoordinator {
    pending: Option<vk::Extent2D>,
    minimized: bool,
}

impl ResizeCoordinator {
    /// Record a resize notification. Zero-sized windows are ignored apart
    /// from pausing rendering; returns whether a rebuild was queued.
    pub fn notify(&mut self, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 {
            log::debug!("Ignoring degenerate resize {}x{}", width, height);
            self.minimized = true;
            return false;
        }

        self.minimized = false;
        self.pending = Some(vk::Extent2D { width, height });
        true
    }

    /// Frames are skipped while the window has no area
    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    /// Run the queued rebuild, if any. Returns whether one happened.
    pub fn apply(&mut self, target: &mut impl Rebuild) -> Result<bool> {
        if self.minimized {
            return Ok(false);
        }
        let Some(extent) = self.pending.take() else {
            return Ok(false);
        };

        log::info!("Rebuilding swapchain for {}x{}", extent.width, extent.height);
        target.rebuild(extent)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;

    #[derive(Default)]
    struct CountingTarget {
        rebuilds: Vec<vk::Extent2D>,
        fail: bool,
    }

    impl Rebuild for CountingTarget {
        fn rebuild(&mut self, extent: vk::Extent2D) -> Result<()> {
            if self.fail {
                return Err(RenderError::ResourceCreationFailure {
                    resource: "swapchain",
                    result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
                });
            }
            self.rebuilds.push(extent);
            Ok(())
        }
    }

    #[test]
    fn zero_width_or_height_does_nothing() {
        let mut coordinator = ResizeCoordinator::default();
        let mut target = CountingTarget::default();

        assert!(!coordinator.notify(0, 600));
        assert!(!coordinator.apply(&mut target).unwrap());
        assert!(!coordinator.notify(800, 0));
        assert!(!coordinator.apply(&mut target).unwrap());

        assert!(target.rebuilds.is_empty());
        assert!(coordinator.is_minimized());
    }

    #[test]
    fn resize_rebuilds_once_with_latest_size() {
        let mut coordinator = ResizeCoordinator::default();
        let mut target = CountingTarget::default();

        coordinator.notify(1024, 768);
        coordinator.notify(1280, 720);
        assert!(coordinator.apply(&mut target).unwrap());
        assert!(!coordinator.apply(&mut target).unwrap());

        assert_eq!(target.rebuilds, [vk::Extent2D { width: 1280, height: 720 }]);
    }

    #[test]
    fn restore_after_minimize_applies_new_size() {
        let mut coordinator = ResizeCoordinator::default();
        let mut target = CountingTarget::default();

        coordinator.notify(0, 0);
        coordinator.notify(640, 480);
        assert!(!coordinator.is_minimized());
        assert!(coordinator.apply(&mut target).unwrap());
        assert_eq!(target.rebuilds, [vk::Extent2D { width: 640, height: 480 }]);
    }

    #[test]
    fn pending_resize_waits_out_a_minimize() {
        let mut coordinator = ResizeCoordinator::default();
        let mut target = CountingTarget::default();

        coordinator.notify(640, 480);
        coordinator.notify(0, 480);
        assert!(!coordinator.apply(&mut target).unwrap());
        assert!(coordinator.pending.is_some());
    }

    #[test]
    fn rebuild_failure_propagates() {
        let mut coordinator = ResizeCoordinator::default();
        let mut target = CountingTarget {
            fail: true,
            ..Default::default()
        };

        coordinator.notify(640, 480);
        assert!(coordinator.apply(&mut target).is_err());
    }
}
