// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;
use ignis_core::Diagnostics;
use ignis_render::{RenderError, Result};

/// The two codes that count as success on raw return values.
pub fn is_benign(code: vk::Result) -> bool {
    matches!(code, vk::Result::SUCCESS | vk::Result::INCOMPLETE)
}

/// Any other code is fatal for `op`.
pub(crate) fn check(code: vk::Result, diag: &Diagnostics, op: &str) -> Result<()> {
    if is_benign(code) {
        Ok(())
    } else {
        Err(diag.fail(op, format!("Vulkan error [{code}]")).into())
    }
}

pub(crate) trait VkResultExt<T> {
    fn or_fatal(self, diag: &Diagnostics, op: &str) -> Result<T>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn or_fatal(self, diag: &Diagnostics, op: &str) -> Result<T> {
        self.map_err(|code| RenderError::Fatal(diag.fail(op, format!("Vulkan error [{code}]"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_and_incomplete_are_benign() {
        assert!(is_benign(vk::Result::SUCCESS));
        assert!(is_benign(vk::Result::INCOMPLETE));
        assert!(!is_benign(vk::Result::NOT_READY));
        assert!(!is_benign(vk::Result::ERROR_DEVICE_LOST));
        assert!(!is_benign(vk::Result::ERROR_OUT_OF_DATE_KHR));
    }

    #[test]
    fn check_names_the_failing_operation() {
        let diag = Diagnostics::new(|_, _| {});
        assert!(check(vk::Result::INCOMPLETE, &diag, "enumerate").is_ok());
        match check(vk::Result::ERROR_INITIALIZATION_FAILED, &diag, "create_device") {
            Err(RenderError::Fatal(f)) => assert_eq!(f.op, "create_device"),
            other => panic!("expected fatal, got {other:?}"),
        }
    }

    #[test]
    fn or_fatal_passes_values_through() {
        let diag = Diagnostics::new(|_, _| {});
        let ok: VkResult<u32> = Ok(7);
        assert_eq!(ok.or_fatal(&diag, "x").unwrap(), 7);
        let err: VkResult<u32> = Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        assert!(matches!(err.or_fatal(&diag, "x"), Err(RenderError::Fatal(_))));
    }
}
