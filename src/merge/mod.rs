//! Scale-by-scale merge of sibling subgraphs.
//!
//! Every parent block of a scale is in one of three states: `Pending` (some
//! child record is missing), `Ready` or `Merged` (its own record exists).
//! A run walks scales `1..=top` in order; within a scale, parents are merged
//! in parallel and share nothing but the store and the id allocator. Merged
//! parents are skipped, so a run interrupted at any point resumes from what
//! is persisted.

use std::thread;
use std::time::{Duration, Instant};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::blocking::Pyramid;
use crate::error::Result;
use crate::reconcile::{reconcile, IdAllocator, Step};
use crate::store::{BlockKey, SubgraphStore};
use crate::timing::{ScaleTimings, Timer};
use crate::types::BlockId;

/// Conditionally parallel iterator over a slice.
macro_rules! maybe_par_iter {
    ($slice:expr) => {{
        #[cfg(feature = "parallel")]
        {
            $slice.par_iter()
        }
        #[cfg(not(feature = "parallel"))]
        {
            $slice.iter()
        }
    }};
}

/// Readiness of one parent block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockState {
    /// Children still missing from the store.
    Pending { missing: Vec<BlockId> },
    Ready,
    Merged,
}

/// Outcome of one pass over a scale.
#[derive(Debug, Clone, Default)]
pub struct ScaleReport {
    pub scale: u32,
    /// Parents merged by this run.
    pub merged: usize,
    /// Parents found already merged.
    pub skipped: usize,
    /// Parents still waiting for children, ascending.
    pub pending: Vec<BlockId>,
    pub timings: ScaleTimings,
}

impl ScaleReport {
    fn new(scale: u32) -> Self {
        Self {
            scale,
            ..Self::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Whether a run reached its top scale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Complete,
    /// Stopped at `scale` with these records still missing.
    Incomplete { scale: u32, pending: Vec<BlockKey> },
}

impl RunStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, RunStatus::Complete)
    }
}

#[derive(Debug, Clone)]
pub struct MergeReport {
    pub scales: Vec<ScaleReport>,
    pub status: RunStatus,
}

enum Outcome {
    Merged(ScaleTimings),
    Skipped,
    Pending,
}

/// Drives merge steps against a store.
pub struct MergeEngine<'a, S: SubgraphStore + ?Sized> {
    store: &'a S,
    pyramid: &'a Pyramid,
    allocator: &'a dyn IdAllocator,
    threads: Option<usize>,
    wait: Option<Duration>,
    poll_interval: Duration,
}

impl<'a, S: SubgraphStore + ?Sized> MergeEngine<'a, S> {
    pub fn new(store: &'a S, pyramid: &'a Pyramid, allocator: &'a dyn IdAllocator) -> Self {
        Self {
            store,
            pyramid,
            allocator,
            threads: None,
            wait: None,
            poll_interval: Duration::from_millis(500),
        }
    }

    /// Worker threads for parallel merging; `None` uses the global rayon pool.
    pub fn threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads;
        self
    }

    /// Keep polling for missing children for up to `wait` per scale.
    pub fn wait_for_children(mut self, wait: Option<Duration>, poll_interval: Duration) -> Self {
        self.wait = wait;
        self.poll_interval = poll_interval;
        self
    }

    pub fn pyramid(&self) -> &Pyramid {
        self.pyramid
    }

    pub fn state(&self, scale: u32, parent: BlockId) -> Result<BlockState> {
        if self.store.contains(BlockKey::new(scale, parent))? {
            return Ok(BlockState::Merged);
        }
        let children = self.pyramid.children(scale, parent)?;
        let missing = self.store.list_missing(scale - 1, &children)?;
        if missing.is_empty() {
            Ok(BlockState::Ready)
        } else {
            Ok(BlockState::Pending { missing })
        }
    }

    /// Merge the children of `parent` and persist the result.
    ///
    /// `NotFound` if a child is missing; `Ok(false)` if the parent was
    /// already merged.
    pub fn merge_block(&self, scale: u32, parent: BlockId) -> Result<bool> {
        Ok(matches!(self.step(scale, parent)?, Outcome::Merged(_)))
    }

    fn step(&self, scale: u32, parent: BlockId) -> Result<Outcome> {
        if self.store.contains(BlockKey::new(scale, parent))? {
            return Ok(Outcome::Skipped);
        }
        let mut timings = ScaleTimings::default();

        let timer = Timer::start();
        let child_ids = self.pyramid.children(scale, parent)?;
        let mut children = Vec::with_capacity(child_ids.len());
        for child in child_ids {
            children.push((child, self.store.get(scale - 1, child)?));
        }
        timings.add_load(timer.elapsed());

        let timer = Timer::start();
        let merged = reconcile(
            self.pyramid,
            self.allocator,
            Step::Parent {
                scale,
                block: parent,
            },
            &children,
        )?;
        timings.add_reconcile(timer.elapsed());

        let timer = Timer::start();
        self.store.put(scale, parent, &merged)?;
        timings.add_store(timer.elapsed());

        tracing::debug!(
            scale,
            parent,
            nodes = merged.num_nodes(),
            edges = merged.num_edges(),
            "merged block"
        );
        Ok(Outcome::Merged(timings))
    }

    /// One pass over `parents` at `scale`.
    fn pass(&self, scale: u32, parents: &[BlockId]) -> Result<ScaleReport> {
        let outcomes: Vec<Result<Outcome>> = maybe_par_iter!(parents)
            .map(|&parent| match self.step(scale, parent) {
                Err(e) if e.is_recoverable() => Ok(Outcome::Pending),
                other => other,
            })
            .collect();

        let mut report = ScaleReport::new(scale);
        for (&parent, outcome) in parents.iter().zip(outcomes) {
            match outcome? {
                Outcome::Merged(t) => {
                    report.merged += 1;
                    report.timings.merge(&t);
                }
                Outcome::Skipped => report.skipped += 1,
                Outcome::Pending => report.pending.push(parent),
            }
        }
        Ok(report)
    }

    /// Merge every parent at `scale`, polling for missing children until the
    /// wait deadline.
    pub fn run_scale(&self, scale: u32) -> Result<ScaleReport> {
        let deadline = self.wait.map(|w| Instant::now() + w);
        let mut todo: Vec<BlockId> = (0..self.pyramid.num_blocks(scale)?).collect();
        let mut report = ScaleReport::new(scale);
        loop {
            let pass = self.pass(scale, &todo)?;
            report.merged += pass.merged;
            report.skipped += pass.skipped;
            report.timings.merge(&pass.timings);
            todo = pass.pending;
            if todo.is_empty() || deadline.is_none_or(|d| Instant::now() >= d) {
                break;
            }
            tracing::warn!(scale, pending = todo.len(), "waiting for child subgraphs");
            thread::sleep(self.poll_interval);
        }
        report.pending = todo;
        Ok(report)
    }

    /// Block until every block in `blocks` at `scale` exists or the wait
    /// deadline passes. Returns the blocks still missing.
    pub fn wait_for(&self, scale: u32, blocks: &[BlockId]) -> Result<Vec<BlockId>> {
        let deadline = self.wait.map(|w| Instant::now() + w);
        loop {
            let missing = self.store.list_missing(scale, blocks)?;
            if missing.is_empty() || deadline.is_none_or(|d| Instant::now() >= d) {
                return Ok(missing);
            }
            tracing::warn!(scale, missing = missing.len(), "waiting for subgraphs");
            thread::sleep(self.poll_interval);
        }
    }

    /// Run scales `1..=top_scale` in order.
    pub fn run(&self) -> Result<MergeReport> {
        match self.threads {
            #[cfg(feature = "parallel")]
            Some(n) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| {
                        crate::error::GraphError::invalid_config(format!("thread pool: {e}"))
                    })?;
                pool.install(|| self.run_scales())
            }
            _ => self.run_scales(),
        }
    }

    fn run_scales(&self) -> Result<MergeReport> {
        let top = self.pyramid.top_scale();
        let mut scales = Vec::with_capacity(top as usize);
        for scale in 1..=top {
            let report = self.run_scale(scale)?;
            tracing::info!(
                scale,
                merged = report.merged,
                skipped = report.skipped,
                pending = report.pending.len(),
                "scale finished"
            );
            report.timings.report(scale);
            if !report.is_complete() {
                let pending = report
                    .pending
                    .iter()
                    .map(|&b| BlockKey::new(scale, b))
                    .collect();
                scales.push(report);
                return Ok(MergeReport {
                    scales,
                    status: RunStatus::Incomplete { scale, pending },
                });
            }
            scales.push(report);
        }
        Ok(MergeReport {
            scales,
            status: RunStatus::Complete,
        })
    }
}
