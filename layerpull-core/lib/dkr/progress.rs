//! Progress accounting for one pull.
//!
//! Each protocol phase owns a fixed slice of the 0..=100 range; per-request
//! byte progress moves the needle inside the current slice. Emitted values are
//! clamped monotone for the lifetime of a pull.

use std::sync::Mutex;

use tokio::sync::watch;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The protocol phase a pull is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PullPhase {
    /// Asking the index for the repository and its registry endpoints.
    Search,
    /// Resolving the tag to an image id.
    Resolve,
    /// Fetching ancestry and image metadata.
    Metadata,
    /// Materializing layers.
    Download,
    /// Producing the optional local alias.
    Copy,
}

/// The request kinds a pull issues; at most one of each is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobKind {
    Images,
    Tags,
    Ancestry,
    Json,
    Layer,
}

#[derive(Debug)]
struct ProgressState {
    phase: PullPhase,
    images: u8,
    tags: u8,
    ancestry: u8,
    json: u8,
    layer: u8,
    layers_done: usize,
    layers_total: usize,
    last: u8,
}

/// Maps phase and sub-progress to a single percentage and emits it.
#[derive(Debug)]
pub(crate) struct ProgressReporter {
    tx: watch::Sender<u8>,
    state: Mutex<ProgressState>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ProgressReporter {
    pub(crate) fn new(tx: watch::Sender<u8>) -> Self {
        Self {
            tx,
            state: Mutex::new(ProgressState {
                phase: PullPhase::Search,
                images: 0,
                tags: 0,
                ancestry: 0,
                json: 0,
                layer: 0,
                layers_done: 0,
                layers_total: 0,
                last: 0,
            }),
        }
    }

    /// Enters a new phase. Phase slices are arranged so that entering the next
    /// phase never reports less than the previous phase's ceiling.
    pub(crate) fn enter_phase(&self, phase: PullPhase) {
        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        state.phase = phase;
        self.emit(&mut state);
    }

    /// Records sub-progress (0..=100) for one request kind.
    pub(crate) fn job(&self, kind: JobKind, percent: u8) {
        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        let slot = match kind {
            JobKind::Images => &mut state.images,
            JobKind::Tags => &mut state.tags,
            JobKind::Ancestry => &mut state.ancestry,
            JobKind::Json => &mut state.json,
            JobKind::Layer => &mut state.layer,
        };
        *slot = (*slot).max(percent.min(100));
        self.emit(&mut state);
    }

    /// Records how many layers are done out of how many, resetting the
    /// per-layer sub-progress for the next one.
    pub(crate) fn layer_counts(&self, done: usize, total: usize) {
        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        state.layers_done = done;
        state.layers_total = total;
        state.layer = 0;
        self.emit(&mut state);
    }

    /// Marks the pull complete.
    pub(crate) fn finish(&self) {
        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        state.last = 100;
        self.tx.send_replace(100);
    }

    fn emit(&self, state: &mut ProgressState) {
        let percent = Self::percent(state);
        if percent > state.last {
            state.last = percent;
            self.tx.send_replace(percent);
        }
    }

    fn percent(state: &ProgressState) -> u8 {
        let percent = match state.phase {
            PullPhase::Search => (5 * state.images as usize) / 100,
            PullPhase::Resolve => 5 + (5 * state.tags as usize) / 100,
            PullPhase::Metadata => {
                10 + (5 * state.ancestry as usize) / 100 + (5 * state.json as usize) / 100
            }
            PullPhase::Download => {
                let total = state.layers_total.max(1);
                20 + (75 * state.layers_done) / total
                    + (75 * state.layer as usize) / (100 * total)
            }
            PullPhase::Copy => 95,
        };

        percent.min(100) as u8
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn reporter() -> (ProgressReporter, watch::Receiver<u8>) {
        let (tx, rx) = watch::channel(0);
        (ProgressReporter::new(tx), rx)
    }

    #[test]
    fn phases_cover_their_documented_slices() {
        let (reporter, rx) = reporter();

        reporter.job(JobKind::Images, 100);
        assert_eq!(*rx.borrow(), 5);

        reporter.enter_phase(PullPhase::Resolve);
        reporter.job(JobKind::Tags, 100);
        assert_eq!(*rx.borrow(), 10);

        reporter.enter_phase(PullPhase::Metadata);
        reporter.job(JobKind::Ancestry, 100);
        reporter.job(JobKind::Json, 100);
        assert_eq!(*rx.borrow(), 20);

        reporter.enter_phase(PullPhase::Download);
        reporter.layer_counts(0, 2);
        reporter.job(JobKind::Layer, 100);
        assert_eq!(*rx.borrow(), 57);

        reporter.layer_counts(2, 2);
        assert_eq!(*rx.borrow(), 95);

        reporter.enter_phase(PullPhase::Copy);
        assert_eq!(*rx.borrow(), 95);

        reporter.finish();
        assert_eq!(*rx.borrow(), 100);
    }

    #[test]
    fn emitted_percentages_never_decrease() {
        let (reporter, rx) = reporter();

        reporter.enter_phase(PullPhase::Metadata);
        reporter.job(JobKind::Ancestry, 100);
        assert_eq!(*rx.borrow(), 15);

        // A lower sub-progress report must not move the needle backwards.
        reporter.job(JobKind::Ancestry, 10);
        assert_eq!(*rx.borrow(), 15);

        reporter.enter_phase(PullPhase::Download);
        reporter.layer_counts(0, 4);
        assert_eq!(*rx.borrow(), 20);
    }

    #[test]
    fn download_handles_an_empty_chain() {
        let (reporter, rx) = reporter();
        reporter.enter_phase(PullPhase::Download);
        reporter.layer_counts(0, 0);
        assert_eq!(*rx.borrow(), 20);
    }

    #[test]
    fn half_way_through_the_chain_is_mid_range() {
        let (reporter, rx) = reporter();
        reporter.enter_phase(PullPhase::Download);
        reporter.layer_counts(1, 2);
        assert_eq!(*rx.borrow(), 20 + 37);

        reporter.job(JobKind::Layer, 50);
        assert_eq!(*rx.borrow(), 20 + 37 + 18);
    }
}
