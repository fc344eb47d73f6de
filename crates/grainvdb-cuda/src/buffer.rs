//! Device buffers and the memory ledger.
//!
//! A [`DeviceBuffer`] is an opaque `f32` allocation owned by one backend.
//! Its storage is released exactly once when the buffer is dropped. Host
//! storage optionally carries a [`MemoryLease`] from a [`MemoryLedger`] so
//! the CPU backend can enforce a device-style memory budget.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::{CudaError, CudaResult};

/// Opaque `f32` buffer living in a backend's memory space.
pub struct DeviceBuffer {
    len: usize,
    pub(crate) storage: Storage,
}

pub(crate) enum Storage {
    Host {
        data: Vec<f32>,
        _lease: Option<MemoryLease>,
    },
    #[cfg(feature = "cuda")]
    Cuda(crate::cuda::DeviceAllocation),
}

impl DeviceBuffer {
    pub(crate) fn host(data: Vec<f32>, lease: Option<MemoryLease>) -> Self {
        Self {
            len: data.len(),
            storage: Storage::Host {
                data,
                _lease: lease,
            },
        }
    }

    #[cfg(feature = "cuda")]
    pub(crate) fn cuda(len: usize, allocation: crate::cuda::DeviceAllocation) -> Self {
        Self {
            len,
            storage: Storage::Cuda(allocation),
        }
    }

    /// Number of `f32` elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size in bytes.
    #[inline]
    pub fn size_bytes(&self) -> usize {
        self.len * std::mem::size_of::<f32>()
    }

    /// Name of the memory space this buffer lives in.
    pub fn kind(&self) -> &'static str {
        match &self.storage {
            Storage::Host { .. } => "cpu",
            #[cfg(feature = "cuda")]
            Storage::Cuda(_) => "cuda",
        }
    }

    #[cfg(feature = "cuda")]
    pub(crate) fn as_cuda(&self) -> CudaResult<&crate::cuda::DeviceAllocation> {
        match &self.storage {
            Storage::Cuda(allocation) => Ok(allocation),
            Storage::Host { .. } => Err(CudaError::ForeignBuffer {
                expected: "cuda",
                actual: "cpu",
            }),
        }
    }

    pub(crate) fn as_host(&self) -> CudaResult<&[f32]> {
        match &self.storage {
            Storage::Host { data, .. } => Ok(data),
            #[allow(unreachable_patterns)]
            _ => Err(CudaError::ForeignBuffer {
                expected: "cpu",
                actual: self.kind(),
            }),
        }
    }

    pub(crate) fn as_host_mut(&mut self) -> CudaResult<&mut [f32]> {
        let kind = self.kind();
        match &mut self.storage {
            Storage::Host { data, .. } => Ok(data),
            #[allow(unreachable_patterns)]
            _ => Err(CudaError::ForeignBuffer {
                expected: "cpu",
                actual: kind,
            }),
        }
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("kind", &self.kind())
            .field("len", &self.len)
            .finish()
    }
}

// ============================================================================
// Memory Ledger
// ============================================================================

#[derive(Debug, Default)]
struct LedgerInner {
    budget: usize,
    allocated: usize,
    peak: usize,
    leases: usize,
}

/// Budget tracker shared by every allocation of one backend.
///
/// Cloning the ledger shares the same accounting.
#[derive(Debug, Clone)]
pub struct MemoryLedger {
    inner: Arc<Mutex<LedgerInner>>,
}

/// Snapshot of ledger usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryStats {
    /// Configured budget in bytes.
    pub budget: usize,
    /// Bytes currently leased.
    pub allocated: usize,
    /// Highest number of bytes leased at once.
    pub peak: usize,
    /// Number of live leases.
    pub leases: usize,
}

impl MemoryLedger {
    /// Ledger with an effectively unlimited budget.
    pub fn unbounded() -> Self {
        Self::with_budget(usize::MAX)
    }

    /// Ledger that refuses leases beyond `budget` bytes in total.
    pub fn with_budget(budget: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LedgerInner {
                budget,
                ..LedgerInner::default()
            })),
        }
    }

    /// Reserve `bytes`, failing with [`CudaError::OutOfMemory`] past the budget.
    pub fn reserve(&self, bytes: usize) -> CudaResult<MemoryLease> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| CudaError::DeviceLost("memory ledger lock poisoned".to_string()))?;

        let available = inner.budget.saturating_sub(inner.allocated);
        if bytes > available {
            return Err(CudaError::OutOfMemory {
                requested: bytes,
                available,
            });
        }

        inner.allocated += bytes;
        inner.peak = inner.peak.max(inner.allocated);
        inner.leases += 1;

        Ok(MemoryLease {
            bytes,
            ledger: Arc::clone(&self.inner),
        })
    }

    /// Current usage.
    pub fn stats(&self) -> MemoryStats {
        match self.inner.lock() {
            Ok(inner) => MemoryStats {
                budget: inner.budget,
                allocated: inner.allocated,
                peak: inner.peak,
                leases: inner.leases,
            },
            Err(_) => MemoryStats::default(),
        }
    }
}

/// Bytes reserved from a [`MemoryLedger`]; returned to it on drop.
pub struct MemoryLease {
    bytes: usize,
    ledger: Arc<Mutex<LedgerInner>>,
}

impl MemoryLease {
    /// Leased size in bytes.
    #[inline]
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl fmt::Debug for MemoryLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLease").field("bytes", &self.bytes).finish()
    }
}

impl Drop for MemoryLease {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.ledger.lock() {
            inner.allocated = inner.allocated.saturating_sub(self.bytes);
            inner.leases = inner.leases.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_released_on_drop() {
        let ledger = MemoryLedger::with_budget(1024);
        {
            let lease = ledger.reserve(512).unwrap();
            assert_eq!(lease.bytes(), 512);
            assert_eq!(ledger.stats().allocated, 512);
            assert_eq!(ledger.stats().leases, 1);
        }
        let stats = ledger.stats();
        assert_eq!(stats.allocated, 0);
        assert_eq!(stats.leases, 0);
        assert_eq!(stats.peak, 512);
    }

    #[test]
    fn test_budget_exceeded_reports_available() {
        let ledger = MemoryLedger::with_budget(1000);
        let _held = ledger.reserve(600).unwrap();
        match ledger.reserve(500) {
            Err(CudaError::OutOfMemory {
                requested,
                available,
            }) => {
                assert_eq!(requested, 500);
                assert_eq!(available, 400);
            }
            other => panic!("expected OutOfMemory, got {:?}", other),
        }
        // Failed reservation must not leak accounting.
        assert_eq!(ledger.stats().allocated, 600);
    }

    #[test]
    fn test_host_buffer_accessors() {
        let mut buffer = DeviceBuffer::host(vec![1.0, 2.0, 3.0], None);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.size_bytes(), 12);
        assert_eq!(buffer.kind(), "cpu");
        buffer.as_host_mut().unwrap()[1] = 5.0;
        assert_eq!(buffer.as_host().unwrap(), &[1.0, 5.0, 3.0]);
    }

    #[test]
    fn test_buffer_drop_returns_lease() {
        let ledger = MemoryLedger::with_budget(64);
        let lease = ledger.reserve(16).unwrap();
        let buffer = DeviceBuffer::host(vec![0.0; 4], Some(lease));
        assert_eq!(ledger.stats().allocated, 16);
        drop(buffer);
        assert_eq!(ledger.stats().allocated, 0);
    }
}
