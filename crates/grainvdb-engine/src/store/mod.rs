//! Append-only manifold store.
//!
//! Holds the manifold as one row-major `f32` device buffer owned by a
//! [`ComputeBackend`]. Ids are dense 0-based ingestion indices and never
//! change. Capacity grows geometrically; growth allocates a new buffer,
//! copies the valid prefix, uploads the batch, and only then replaces the old
//! buffer, so a failed ingest leaves the store exactly as it was.


use std::borrow::Cow;
use std::ops::Range;
use std::sync::Arc;

use grainvdb_cuda::{ComputeBackend, DeviceBuffer, ManifoldView};

use crate::config::StoreConfig;
use crate::error::{EngineError, EngineResult};
use crate::fold::FoldTransform;

/// Device-resident, append-only sequence of rank-length vectors.
#[derive(Debug)]
pub struct ManifoldStore {
    rank: usize,
    backend: Arc<dyn ComputeBackend>,
    config: StoreConfig,
    buffer: Option<DeviceBuffer>,
    /// Rows the current buffer can hold.
    capacity: usize,
    /// Rows currently valid.
    len: usize,
}

impl ManifoldStore {
    /// Empty store of fixed `rank`. No device memory is allocated until the
    /// first ingest.
    ///
    /// # Errors
    ///
    /// `InvalidRank` if `rank == 0`.
    pub fn new(
        rank: usize,
        backend: Arc<dyn ComputeBackend>,
        config: StoreConfig,
    ) -> EngineResult<Self> {
        if rank == 0 {
            return Err(EngineError::InvalidRank(rank));
        }
        Ok(Self {
            rank,
            backend,
            config,
            buffer: None,
            capacity: 0,
            len: 0,
        })
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of stored vectors.
    #[inline]
    pub fn size(&self) -> u64 {
        self.len as u64
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Rows the device buffer can hold before the next growth.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn backend(&self) -> &Arc<dyn ComputeBackend> {
        &self.backend
    }

    /// Append `count` vectors read row-major from `data`.
    ///
    /// With `fold`, each vector is transformed before it is stored. Returns
    /// the assigned id range `[old_size, old_size + count)`.
    ///
    /// # Errors
    ///
    /// - `EmptyInput` if `count == 0`
    /// - `BufferTooShort` if `data` holds fewer than `count * rank` values
    /// - `NonFiniteValue` for NaN/infinite input or fold output
    /// - `AllocationFailure` if device memory is exhausted; nothing is stored
    /// - `DispatchFailure` if the transfer fails
    pub fn ingest(
        &mut self,
        data: &[f32],
        count: usize,
        fold: Option<&dyn FoldTransform>,
    ) -> EngineResult<Range<u64>> {
        if count == 0 {
            return Err(EngineError::EmptyInput("count must be greater than 0"));
        }
        let required = count.checked_mul(self.rank).ok_or(EngineError::BufferTooShort {
            required: usize::MAX,
            actual: data.len(),
        })?;
        if data.len() < required {
            return Err(EngineError::BufferTooShort {
                required,
                actual: data.len(),
            });
        }
        let batch = &data[..required];
        check_finite(batch)?;

        let staged = match fold {
            Some(fold) => Cow::Owned(self.fold_batch(batch, fold)?),
            None => Cow::Borrowed(batch),
        };

        let start = self.len;
        let end = start
            .checked_add(count)
            .ok_or_else(|| EngineError::AllocationFailure("manifold size overflows usize".into()))?;
        let offset = start * self.rank;

        if end > self.capacity {
            let new_capacity = self.grown_capacity(end)?;
            let elements = new_capacity.checked_mul(self.rank).ok_or_else(|| {
                EngineError::AllocationFailure(format!(
                    "capacity of {} rows at rank {} overflows",
                    new_capacity, self.rank
                ))
            })?;

            let mut grown = self
                .backend
                .allocate(elements)
                .map_err(|e| EngineError::from_backend("ingest", e))?;
            if let Some(current) = &self.buffer {
                self.backend
                    .copy_prefix(current, &mut grown, offset)
                    .map_err(|e| EngineError::from_backend("ingest", e))?;
            }
            self.backend
                .upload(&mut grown, offset, &staged)
                .map_err(|e| EngineError::from_backend("ingest", e))?;

            tracing::debug!(
                rank = self.rank,
                old_capacity = self.capacity,
                new_capacity,
                bytes = grown.size_bytes(),
                "manifold grown"
            );
            self.buffer = Some(grown);
            self.capacity = new_capacity;
        } else {
            let buffer = self.buffer.as_mut().ok_or_else(|| EngineError::DispatchFailure {
                operation: "ingest",
                reason: "manifold buffer missing".into(),
            })?;
            self.backend
                .upload(buffer, offset, &staged)
                .map_err(|e| EngineError::from_backend("ingest", e))?;
        }

        self.len = end;
        tracing::trace!(count, size = self.len, folded = fold.is_some(), "batch ingested");
        Ok(start as u64..end as u64)
    }

    fn fold_batch(&self, batch: &[f32], fold: &dyn FoldTransform) -> EngineResult<Vec<f32>> {
        let mut staged = Vec::new();
        staged
            .try_reserve_exact(batch.len())
            .map_err(|e| EngineError::AllocationFailure(format!("fold staging: {}", e)))?;
        staged.resize(batch.len(), 0.0);

        for (input, out) in batch
            .chunks_exact(self.rank)
            .zip(staged.chunks_exact_mut(self.rank))
        {
            fold.fold(input, out);
        }
        check_finite(&staged)?;
        Ok(staged)
    }

    /// Capacity for at least `needed` rows under the growth policy.
    fn grown_capacity(&self, needed: usize) -> EngineResult<usize> {
        let scaled = (self.capacity as f64 * self.config.growth_factor).ceil();
        if !scaled.is_finite() || scaled >= usize::MAX as f64 {
            return Err(EngineError::AllocationFailure(format!(
                "capacity growth from {} rows overflows",
                self.capacity
            )));
        }
        Ok(needed
            .max(scaled as usize)
            .max(self.config.initial_capacity))
    }

    /// Download the stored vector with id `id`.
    ///
    /// # Errors
    ///
    /// `InvalidReference` if `id >= size`.
    pub fn vector(&self, id: u64) -> EngineResult<Vec<f32>> {
        let row = self.check_id(id)?;
        let buffer = self.buffer.as_ref().ok_or(EngineError::InvalidReference {
            id,
            size: self.size(),
        })?;
        let mut out = vec![0.0f32; self.rank];
        self.backend
            .download(buffer, row * self.rank, &mut out)
            .map_err(|e| EngineError::from_backend("vector", e))?;
        Ok(out)
    }

    /// Download several vectors, in the order given.
    pub fn vectors(&self, ids: &[u64]) -> EngineResult<Vec<Vec<f32>>> {
        ids.iter().map(|&id| self.vector(id)).collect()
    }

    /// Row index of `id`, or `InvalidReference`.
    pub fn check_id(&self, id: u64) -> EngineResult<usize> {
        usize::try_from(id)
            .ok()
            .filter(|&row| row < self.len)
            .ok_or(EngineError::InvalidReference {
                id,
                size: self.size(),
            })
    }

    /// View of the valid rows, or `None` while the store is empty.
    pub fn view(&self) -> EngineResult<Option<ManifoldView<'_>>> {
        match &self.buffer {
            Some(buffer) if self.len > 0 => ManifoldView::new(buffer, self.len, self.rank)
                .map(Some)
                .map_err(|e| EngineError::from_backend("view", e)),
            _ => Ok(None),
        }
    }
}

fn check_finite(values: &[f32]) -> EngineResult<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(EngineError::NonFiniteValue { index }),
        None => Ok(()),
    }
}
