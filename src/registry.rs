//! Index-addressed registry of camera handles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::config::CaptureConfig;
use crate::handle::CameraHandle;
use crate::traits::{CameraError, DeviceBackend, Result};

/// Hands out at most one [`CameraHandle`] per device index.
///
/// Handles are created on first request and kept for the registry's lifetime.
/// Creation runs under a single lock, so concurrent first requests for an
/// index always observe the same handle.
pub struct DeviceRegistry<B: DeviceBackend> {
    backend: Arc<B>,
    config: CaptureConfig,
    entries: Mutex<HashMap<u32, Arc<CameraHandle<B>>>>,
}

impl<B: DeviceBackend> DeviceRegistry<B> {
    /// Create a registry with the default configuration.
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, CaptureConfig::default())
    }

    /// Create a registry deriving device paths and limits from `config`.
    pub fn with_config(backend: B, config: CaptureConfig) -> Self {
        Self {
            backend: Arc::new(backend),
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The backend shared by every handle in this registry.
    pub const fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// The registry's configuration.
    pub const fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Handle for `index`, created closed on first request.
    pub fn get_or_create(&self, index: i32) -> Result<Arc<CameraHandle<B>>> {
        let index = u32::try_from(index).map_err(|_| {
            CameraError::invalid_argument(format!("device index must be non-negative, got {index}"))
        })?;

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = entries.entry(index).or_insert_with(|| {
            let path = self.config.device_path(index);
            debug!(index, path = %path, "creating camera handle");
            Arc::new(
                CameraHandle::new(Arc::clone(&self.backend), path)
                    .with_frame_size_limit(self.config.max_frame_sizes),
            )
        });
        Ok(Arc::clone(handle))
    }

    /// Handle for `index`, opened if it was closed.
    pub fn open(&self, index: i32) -> Result<Arc<CameraHandle<B>>> {
        let handle = self.get_or_create(index)?;
        handle.ensure_open()?;
        Ok(handle)
    }

    /// Handle for the first device, opened.
    pub fn open_default(&self) -> Result<Arc<CameraHandle<B>>> {
        self.open(0)
    }

    /// Whether a handle exists for `index`. Always `false` for negative indices.
    pub fn contains(&self, index: i32) -> bool {
        u32::try_from(index).is_ok_and(|index| {
            self.entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(&index)
        })
    }

    /// Number of handles created so far.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no handle has been created yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::LifecycleState;
    use crate::mock::{CallCounts, MockBackend};
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_same_index_same_handle() {
        let registry = DeviceRegistry::new(MockBackend::new());
        let a = registry.get_or_create(0).expect("create");
        let b = registry.get_or_create(0).expect("fetch");

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_distinct_indices() {
        let registry = DeviceRegistry::new(MockBackend::new());
        let a = registry.get_or_create(0).expect("create 0");
        let b = registry.get_or_create(1).expect("create 1");

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.device_path(), "/dev/video0");
        assert_eq!(b.device_path(), "/dev/video1");
        assert!(registry.contains(1));
        assert!(!registry.contains(2));
    }

    #[test]
    fn test_contains_negative_index() {
        let registry = DeviceRegistry::new(MockBackend::new());
        registry.get_or_create(0).expect("create");

        assert!(registry.contains(0));
        assert!(!registry.contains(-1));
        assert!(!registry.contains(i32::MIN));
    }

    #[test]
    fn test_created_handles_are_closed() {
        let registry = DeviceRegistry::new(MockBackend::new());
        let handle = registry.get_or_create(0).expect("create");

        assert_eq!(handle.state(), LifecycleState::Closed);
        assert_eq!(registry.backend().calls().open, 0);
    }

    #[test]
    fn test_negative_index_rejected() {
        let registry = DeviceRegistry::new(MockBackend::new());

        let err = registry.open(-1).expect_err("negative index");
        assert!(matches!(err, CameraError::InvalidArgument(_)));
        assert!(registry.is_empty());
        assert_eq!(registry.backend().calls(), CallCounts::default());
    }

    #[test]
    fn test_open_is_reentrant() {
        let registry = DeviceRegistry::new(MockBackend::new());
        let a = registry.open(0).expect("open");
        let b = registry.open(0).expect("open again");

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.state(), LifecycleState::Opened);
        assert_eq!(registry.backend().calls().open, 1);
    }

    #[test]
    fn test_open_reopens_released_handle() {
        let registry = DeviceRegistry::new(MockBackend::new());
        let handle = registry.open_default().expect("open");
        handle.release();

        let again = registry.open_default().expect("reopen");
        assert!(Arc::ptr_eq(&handle, &again));
        assert_eq!(again.state(), LifecycleState::Opened);
    }

    #[test]
    fn test_config_prefix() {
        let config = CaptureConfig::default().with_device_prefix("/dev/uvc");
        let registry = DeviceRegistry::with_config(MockBackend::new(), config);

        let handle = registry.get_or_create(4).expect("create");
        assert_eq!(handle.device_path(), "/dev/uvc4");
    }

    #[test]
    fn test_concurrent_first_requests_share_one_handle() {
        const THREADS: usize = 16;

        let registry = Arc::new(DeviceRegistry::new(MockBackend::new()));
        let barrier = Arc::new(Barrier::new(THREADS));

        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.open(7).expect("open")
                })
            })
            .collect();

        let handles: Vec<_> = workers
            .into_iter()
            .map(|worker| worker.join().expect("worker panicked"))
            .collect();

        let first = &handles[0];
        assert!(handles.iter().all(|handle| Arc::ptr_eq(first, handle)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.backend().calls().open, 1);
    }
}
