/// Outcome of a topology audit.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditReport {
    /// Consistency score in `[0, 1]`; 1.0 means the other audited ids are
    /// exactly the anchor's true nearest rows (ties tolerated).
    pub score: f64,
    /// Mean consistency over every audited id taken as the center.
    pub cohesion: f64,
    /// Total density dispatch time, including synchronization. Zero when no
    /// dispatch was needed.
    pub latency_ms: f64,
    /// Fiedler value of the thresholded cosine graph over the audited set.
    /// A single vector is trivially connected and reports 1.0.
    pub connectivity: f64,
    /// The audited id whose own neighborhood best matches the set.
    pub anchor: u64,
    /// Distinct claimed neighbors after collapsing duplicates.
    pub neighbors: usize,
}

impl AuditReport {
    /// Whether the set is fully consistent with the manifold.
    #[inline]
    pub fn is_consistent(&self) -> bool {
        self.score >= 1.0
    }
}
