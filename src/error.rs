// Error taxonomy for the rendering session
//
// Every creation step reports which resource failed. There is no retry:
// an error unwinds the whole startup or rebuild and ends the session.

use ash::{prelude::VkResult, vk};
use thiserror::Error;

pub type Result<T, E = RenderError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RenderError {
    /// Windowing or driver context could not be brought up
    #[error("Failed to initialize {what}: {reason}")]
    InitializationFailure { what: &'static str, reason: String },

    /// Capability negotiation found no usable GPU
    #[error("No suitable GPU: {0}")]
    NoSuitableDevice(String),

    /// A single object creation call failed
    #[error("Failed to create {resource}: {result}")]
    ResourceCreationFailure {
        resource: &'static str,
        result: vk::Result,
    },

    /// Command buffer recording or queue submission failed
    #[error("Failed to {operation}: {result}")]
    RecordingFailure {
        operation: &'static str,
        result: vk::Result,
    },
}

impl RenderError {
    pub fn init(what: &'static str, reason: impl ToString) -> Self {
        Self::InitializationFailure {
            what,
            reason: reason.to_string(),
        }
    }
}

/// Attach taxonomy context to raw driver results, `anyhow::Context` style.
pub trait VkResultExt<T> {
    fn creating(self, resource: &'static str) -> Result<T>;
    fn recording(self, operation: &'static str) -> Result<T>;
    fn initializing(self, what: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn creating(self, resource: &'static str) -> Result<T> {
        self.map_err(|result| RenderError::ResourceCreationFailure { resource, result })
    }

    fn recording(self, operation: &'static str) -> Result<T> {
        self.map_err(|result| RenderError::RecordingFailure { operation, result })
    }

    fn initializing(self, what: &'static str) -> Result<T> {
        self.map_err(|result| RenderError::init(what, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_failure_names_the_resource() {
        let err = Err::<(), _>(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
            .creating("render pass")
            .unwrap_err();

        assert!(matches!(
            err,
            RenderError::ResourceCreationFailure { resource: "render pass", .. }
        ));
        assert!(err.to_string().starts_with("Failed to create render pass"));
    }

    #[test]
    fn recording_failure_names_the_operation() {
        let err = Err::<(), _>(vk::Result::ERROR_DEVICE_LOST)
            .recording("submit draw commands")
            .unwrap_err();

        assert!(err.to_string().starts_with("Failed to submit draw commands"));
    }

    #[test]
    fn success_passes_through() {
        let value: VkResult<u32> = Ok(7);
        assert_eq!(value.creating("anything").unwrap(), 7);
    }
}
