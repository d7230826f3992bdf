// SPDX-FileCopyrightText: © 2025 FrameKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Checkpointed box tracking on a worker pool.
//!
//! Every [`BoxTracker::new_box_track`] call starts a track for an object id
//! at a *checkpoint*: the request's time snapped to the closest frame of the
//! cached tracking data. A forward and a backward job then walk the data
//! frame by frame from the checkpoint, storing one box per frame in the
//! id's [`Path`]. Requests for the same id are scheduled in call order, and a
//! new checkpoint replaces every existing checkpoint of that id closer than
//! [`SNAP_DISTANCE_MSEC`].
//!
//! ## Locking
//!
//! `paths` guards stored boxes and `status` guards the per-checkpoint
//! counters, the per-id scheduling gates and the global canceling flag. The
//! two locks are never held at the same time. `status_changed` is signalled
//! on every status transition.
//!
//! Work queued on the pool never blocks waiting for other queued work: a
//! request that has to wait parks in its id's gate and is scheduled again by
//! whoever releases the turn or finishes the last job it waits for.

use crate::backoff::{Backoff, PollOutcome};
use crate::chunk::{
    chunk_file_path, chunk_index_for_msec, read_chunk_file, ChunkCodec, ChunkHandle, FrameMotion,
    JsonChunkCodec, TrackingDataChunk,
};
use crate::error::{Result, TrackerError};
use crate::motion::{MotionBoxState, TrackStep, TranslationTracker};
use crate::options::BoxTrackerOptions;
use crate::path::{Path, PathEntry};
use crate::thread_pool::{PoolHandle, ThreadPool};
use crate::timed_box::TimedBox;
use opentelemetry::metrics::Counter;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Status key counting the new-track requests of an id not yet scheduled.
pub const INIT_CHECKPOINT: i64 = i64::MIN;

/// A new checkpoint replaces existing checkpoints of the same id closer than this.
pub const SNAP_DISTANCE_MSEC: i64 = 1000;

/// Where chunks come from.
pub enum ChunkSource {
    /// One file per chunk index, named by `cache_file_format`. Missing files
    /// are waited for up to `read_chunk_timeout_msec`.
    CacheDir { dir: PathBuf, codec: Arc<dyn ChunkCodec> },
    /// Chunks supplied by the caller; position `i` holds chunk index `i`.
    Memory(Vec<ChunkHandle>),
}

enum ChunkStore {
    Cache { dir: PathBuf, codec: Arc<dyn ChunkCodec> },
    Memory(RwLock<Vec<ChunkHandle>>),
}

struct TrackStatus {
    token: CancellationToken,
    tracks_ongoing: u32,
}

impl TrackStatus {
    fn new() -> Self {
        Self { token: CancellationToken::new(), tracks_ongoing: 0 }
    }
}

/// Serves new-track requests of one id strictly in ticket order.
///
/// Requests that have to wait are parked here instead of occupying a
/// worker, and are handed back to the pool when they can make progress.
#[derive(Default)]
struct IdGate {
    issued: u64,
    serving: u64,
    /// Tickets given up before their turn.
    abandoned: BTreeSet<u64>,
    /// Requests that reached the gate before their turn, by ticket.
    parked: BTreeMap<u64, NewTrackRequest>,
    /// The request being served, while the checkpoints it replaces stop.
    replacing_wait: Option<NewTrackRequest>,
}

impl IdGate {
    fn issue(&mut self) -> u64 {
        let ticket = self.issued;
        self.issued += 1;
        ticket
    }

    /// Gives up `ticket`. Returns the parked request whose turn it is now.
    fn release(&mut self, ticket: u64) -> Option<NewTrackRequest> {
        if ticket != self.serving {
            self.abandoned.insert(ticket);
            return None;
        }
        self.serving += 1;
        while self.abandoned.remove(&self.serving) {
            self.serving += 1;
        }
        self.parked.remove(&self.serving)
    }
}

#[derive(Default)]
struct StatusState {
    tracks: HashMap<i32, BTreeMap<i64, TrackStatus>>,
    gates: HashMap<i32, IdGate>,
    canceling: bool,
}

impl StatusState {
    fn ongoing(&self, id: i32, checkpoint: i64) -> u32 {
        self.tracks
            .get(&id)
            .and_then(|checkpoints| checkpoints.get(&checkpoint))
            .map_or(0, |track| track.tracks_ongoing)
    }

    fn any_ongoing_for(&self, id: i32) -> bool {
        self.tracks.get(&id).is_some_and(|cps| cps.values().any(|t| t.tracks_ongoing > 0))
    }

    fn any_ongoing(&self) -> bool {
        self.tracks.values().flat_map(BTreeMap::values).any(|t| t.tracks_ongoing > 0)
    }

    fn is_turn(&self, id: i32, ticket: u64) -> bool {
        self.gates.get(&id).is_some_and(|gate| gate.serving == ticket)
    }

    /// Takes every parked request out of the gates.
    fn take_waiting(&mut self) -> Vec<NewTrackRequest> {
        let mut waiting = Vec::new();
        for gate in self.gates.values_mut() {
            waiting.extend(gate.replacing_wait.take());
            waiting.extend(std::mem::take(&mut gate.parked).into_values());
        }
        waiting
    }

    /// Closes one unit of work on `(id, checkpoint)`.
    fn finish(&mut self, id: i32, checkpoint: i64) {
        if let Some(track) = self.tracks.get_mut(&id).and_then(|cps| cps.get_mut(&checkpoint)) {
            track.tracks_ongoing = track.tracks_ongoing.saturating_sub(1);
        }
    }
}

struct TrackerMetrics {
    requests: Counter<u64>,
    refused: Counter<u64>,
    chunks_read: Counter<u64>,
    chunks_failed: Counter<u64>,
    steps: Counter<u64>,
}

impl TrackerMetrics {
    fn new() -> Self {
        let meter = opentelemetry::global::meter("framekit_tracking");
        Self {
            requests: meter
                .u64_counter("tracker.requests")
                .with_description("New box track requests accepted")
                .build(),
            refused: meter
                .u64_counter("tracker.requests.refused")
                .with_description("New box track requests refused while canceling")
                .build(),
            chunks_read: meter
                .u64_counter("tracker.chunks.read")
                .with_description("Tracking data chunks loaded")
                .build(),
            chunks_failed: meter
                .u64_counter("tracker.chunks.failed")
                .with_description("Tracking data chunks missing or unreadable")
                .build(),
            steps: meter
                .u64_counter("tracker.steps")
                .with_description("Frames tracked")
                .build(),
        }
    }
}

struct TrackerInner {
    options: BoxTrackerOptions,
    store: ChunkStore,
    stepper: Arc<dyn TrackStep>,
    paths: Mutex<HashMap<i32, Path>>,
    status: Mutex<StatusState>,
    status_changed: Condvar,
    pool: PoolHandle,
    metrics: TrackerMetrics,
}

impl TrackerInner {
    /// Hands requests back to the pool. Must be called without the status lock.
    fn wake(&self, requests: impl IntoIterator<Item = NewTrackRequest>) {
        for request in requests {
            // A refused task is dropped, which releases the request.
            self.pool.schedule(move || request.run());
        }
    }

    /// Loads chunk `index`, waiting for it to appear. `None` when it never
    /// does, cannot be read, or `token` fires.
    fn load_chunk(&self, index: i64, token: &CancellationToken) -> Option<ChunkHandle> {
        if index < 0 {
            return None;
        }
        let backoff = Backoff::chunk_file(self.options.read_chunk_timeout());

        let loaded = match &self.store {
            ChunkStore::Cache { dir, codec } => {
                let path = match chunk_file_path(dir, &self.options.cache_file_format, index) {
                    Ok(path) => path,
                    Err(e) => {
                        tracing::error!(chunk_idx = index, error = %e, "Invalid chunk file name");
                        return None;
                    },
                };
                match backoff.poll(|| path.exists(), token) {
                    PollOutcome::Ready => match read_chunk_file(&path, codec.as_ref()) {
                        Ok(chunk) => Some(ChunkHandle::Owned(Box::new(chunk))),
                        Err(e) => {
                            tracing::error!(
                                chunk_idx = index,
                                path = %path.display(),
                                error = %e,
                                "Failed to read tracking chunk"
                            );
                            None
                        },
                    },
                    PollOutcome::TimedOut => {
                        tracing::warn!(
                            chunk_idx = index,
                            path = %path.display(),
                            "Timed out waiting for tracking chunk"
                        );
                        None
                    },
                    PollOutcome::Canceled => return None,
                }
            },
            ChunkStore::Memory(chunks) => {
                let position = usize::try_from(index).ok()?;
                match backoff.poll(|| chunks.read().len() > position, token) {
                    PollOutcome::Ready => chunks.read().get(position).map(ChunkHandle::duplicate),
                    PollOutcome::TimedOut => {
                        tracing::warn!(chunk_idx = index, "Timed out waiting for tracking chunk");
                        None
                    },
                    PollOutcome::Canceled => return None,
                }
            },
        };

        if loaded.is_some() {
            self.metrics.chunks_read.add(1, &[]);
        } else {
            self.metrics.chunks_failed.add(1, &[]);
        }
        loaded
    }

    /// Stores a tracked box unless `token` fired. Returns `false` when canceled.
    fn store_box(
        &self,
        id: i32,
        checkpoint: i64,
        time_msec: i64,
        state: &MotionBoxState,
        token: &CancellationToken,
    ) -> bool {
        let mut paths = self.paths.lock();
        if token.is_cancelled() {
            return false;
        }
        let entry = PathEntry {
            timed_box: TimedBox::from_state(state, time_msec, id),
            state: self.options.record_path_states.then(|| state.clone()),
        };
        paths.entry(id).or_default().segment_mut(checkpoint).insert(entry);
        true
    }
}

struct Seed {
    chunk: ChunkHandle,
    chunk_idx: i64,
    frame: usize,
    checkpoint: i64,
}

/// A new-track request on its way to becoming a checkpoint.
///
/// Until it has scheduled its tracking jobs it holds one unit of the id's
/// [`INIT_CHECKPOINT`] count and a ticket of the id's gate; dropping it
/// early gives both back.
struct NewTrackRequest {
    inner: Arc<TrackerInner>,
    id: i32,
    initial: TimedBox,
    min_msec: i64,
    max_msec: i64,
    ticket: u64,
    token: CancellationToken,
    seed: Option<Seed>,
    /// Checkpoints this request replaces, once they have been canceled.
    replacing: Option<Vec<i64>>,
    scheduled: bool,
}

impl NewTrackRequest {
    /// Advances the request as far as it can go. A request that has to
    /// wait parks itself in its id's gate and is run again when woken.
    fn run(mut self) {
        let inner = Arc::clone(&self.inner);
        if self.token.is_cancelled() {
            tracing::debug!(id = self.id, "New track request canceled");
            return;
        }

        if self.seed.is_none() {
            let chunk_idx = chunk_index_for_msec(
                self.initial.time_msec,
                inner.options.caching_chunk_size_msec,
            );
            let Some(chunk) = inner.load_chunk(chunk_idx, &self.token) else {
                tracing::warn!(id = self.id, chunk_idx, "No tracking data for new track");
                return;
            };
            let Some(frame) = chunk.closest_frame_index(self.initial.time_msec) else {
                tracing::warn!(id = self.id, chunk_idx, "Tracking chunk has no frames");
                return;
            };
            let checkpoint = chunk.items[frame].time_msec();
            self.seed = Some(Seed { chunk, chunk_idx, frame, checkpoint });
        }
        let Some(checkpoint) = self.seed.as_ref().map(|seed| seed.checkpoint) else {
            return;
        };

        let mut guard = inner.status.lock();
        let status = &mut *guard;
        if self.token.is_cancelled() {
            drop(guard);
            return;
        }
        let (id, ticket) = (self.id, self.ticket);

        if !status.is_turn(id, ticket) {
            status.gates.entry(id).or_default().parked.insert(ticket, self);
            return;
        }

        if self.replacing.is_none() {
            let mut replacing = Vec::new();
            if let Some(checkpoints) = status.tracks.get(&id) {
                for (&existing, track) in checkpoints {
                    if existing != INIT_CHECKPOINT
                        && existing.abs_diff(checkpoint) < SNAP_DISTANCE_MSEC.unsigned_abs()
                    {
                        track.token.cancel();
                        replacing.push(existing);
                    }
                }
            }
            if !replacing.is_empty() {
                tracing::debug!(id, checkpoint, ?replacing, "Replacing nearby checkpoints");
            }
            self.replacing = Some(replacing);
        }

        let replacing = self.replacing.clone().unwrap_or_default();
        if replacing.iter().any(|&existing| status.ongoing(id, existing) > 0) {
            status.gates.entry(id).or_default().replacing_wait = Some(self);
            return;
        }
        if let Some(checkpoints) = status.tracks.get_mut(&id) {
            for existing in &replacing {
                checkpoints.remove(existing);
            }
        }
        drop(guard);

        self.schedule_tracking(&inner, checkpoint, &replacing);
    }

    fn schedule_tracking(&mut self, inner: &Arc<TrackerInner>, checkpoint: i64, replacing: &[i64]) {
        let Some(seed) = self.seed.take() else {
            return;
        };
        let mut seed_box = self.initial.clone();
        seed_box.time_msec = checkpoint;
        seed_box.id = self.id;
        let seed_state = seed_box.to_state();
        {
            let mut paths = inner.paths.lock();
            let path = paths.entry(self.id).or_default();
            for existing in replacing {
                path.remove(*existing);
            }
            path.segment_mut(checkpoint).insert(PathEntry {
                timed_box: seed_box,
                state: inner.options.record_path_states.then(|| seed_state.clone()),
            });
        }

        // The ongoing count set here is owned by the two jobs below, which
        // always run and close their share on drop, canceled or not.
        let (token, next) = {
            let mut guard = inner.status.lock();
            let status = &mut *guard;
            let canceled = self.token.is_cancelled() || status.canceling;
            let track = if canceled {
                let token = CancellationToken::new();
                token.cancel();
                TrackStatus { token, tracks_ongoing: 0 }
            } else {
                TrackStatus { token: CancellationToken::new(), tracks_ongoing: 2 }
            };
            let token = (!canceled).then(|| track.token.clone());
            status.tracks.entry(self.id).or_default().insert(checkpoint, track);
            status.finish(self.id, INIT_CHECKPOINT);
            let next = status.gates.entry(self.id).or_default().release(self.ticket);
            self.scheduled = true;
            (token, next)
        };
        inner.status_changed.notify_all();
        inner.wake(next);
        let Some(token) = token else {
            tracing::debug!(id = self.id, checkpoint, "Tracking canceled before start");
            return;
        };

        tracing::debug!(
            id = self.id,
            checkpoint,
            min_msec = self.min_msec,
            max_msec = self.max_msec,
            "Starting forward and backward tracking"
        );
        let make_job = |chunk: ChunkHandle, state: MotionBoxState, direction: Direction| TrackingJob {
            inner: Arc::clone(inner),
            id: self.id,
            checkpoint,
            token: token.clone(),
            chunk,
            chunk_idx: seed.chunk_idx,
            frame: seed.frame,
            state,
            min_msec: self.min_msec,
            max_msec: self.max_msec,
            direction,
            steps: 0,
        };
        let forward = make_job(seed.chunk.duplicate(), seed_state.clone(), Direction::Forward);
        let backward = make_job(seed.chunk, seed_state, Direction::Backward);
        for job in [forward, backward] {
            // A refused job is dropped, which closes its share of the checkpoint.
            inner.pool.schedule(move || job.run());
        }
    }
}

impl Drop for NewTrackRequest {
    fn drop(&mut self) {
        if self.scheduled {
            return;
        }
        let next = {
            let mut status = self.inner.status.lock();
            status.finish(self.id, INIT_CHECKPOINT);
            status.gates.entry(self.id).or_default().release(self.ticket)
        };
        self.inner.status_changed.notify_all();
        self.inner.wake(next);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

#[derive(Debug)]
enum WalkEnd {
    Canceled,
    Bound,
    Lost,
    EndOfData,
    MissingChunk,
}

/// Tracks one direction from a checkpoint. Dropping it closes its share of
/// the checkpoint's ongoing count.
struct TrackingJob {
    inner: Arc<TrackerInner>,
    id: i32,
    checkpoint: i64,
    token: CancellationToken,
    chunk: ChunkHandle,
    chunk_idx: i64,
    frame: usize,
    state: MotionBoxState,
    min_msec: i64,
    max_msec: i64,
    direction: Direction,
    steps: u64,
}

impl TrackingJob {
    fn run(mut self) {
        let end = self.walk();
        tracing::debug!(
            id = self.id,
            checkpoint = self.checkpoint,
            direction = ?self.direction,
            steps = self.steps,
            reason = ?end,
            "Tracking stopped"
        );
    }

    fn walk(&mut self) -> WalkEnd {
        loop {
            if self.token.is_cancelled() {
                return WalkEnd::Canceled;
            }
            // The next frame lies past the bound; stop before loading its chunk.
            if let Some(now) = self.chunk.time_msec(self.frame) {
                match self.direction {
                    Direction::Forward if now >= self.max_msec => return WalkEnd::Bound,
                    Direction::Backward if now <= self.min_msec => return WalkEnd::Bound,
                    _ => {},
                }
            }
            let (motion, next_chunk, next_frame) = match self.next_frame() {
                Ok(next) => next,
                Err(end) => return end,
            };
            let Some(time_msec) =
                next_chunk.as_ref().unwrap_or(&self.chunk).time_msec(next_frame)
            else {
                return WalkEnd::EndOfData;
            };
            match self.direction {
                Direction::Forward if time_msec > self.max_msec => return WalkEnd::Bound,
                Direction::Backward if time_msec < self.min_msec => return WalkEnd::Bound,
                _ => {},
            }

            let Some(state) = self.inner.stepper.track_step(&self.state, &motion) else {
                return WalkEnd::Lost;
            };
            self.inner.metrics.steps.add(1, &[]);
            if !self.inner.store_box(self.id, self.checkpoint, time_msec, &state, &self.token) {
                return WalkEnd::Canceled;
            }
            tracing::trace!(id = self.id, checkpoint = self.checkpoint, time_msec, "Tracked frame");

            self.state = state;
            self.frame = next_frame;
            self.steps += 1;
            if let Some(chunk) = next_chunk {
                self.chunk = chunk;
                self.chunk_idx += match self.direction {
                    Direction::Forward => 1,
                    Direction::Backward => -1,
                };
            }
        }
    }

    /// Motion to the next frame in walk order, the chunk holding that frame
    /// if it is not the current one, and its index.
    fn next_frame(&self) -> std::result::Result<(FrameMotion, Option<ChunkHandle>, usize), WalkEnd> {
        match self.direction {
            Direction::Forward => {
                if let Some(item) = self.chunk.items.get(self.frame + 1) {
                    return Ok((item.motion.inverted(), None, self.frame + 1));
                }
                if self.chunk.last_chunk {
                    return Err(WalkEnd::EndOfData);
                }
                let next = self.load(self.chunk_idx + 1)?;
                let motion = next.items.first().ok_or(WalkEnd::EndOfData)?.motion.inverted();
                Ok((motion, Some(next), 0))
            },
            Direction::Backward => {
                if self.frame > 0 {
                    let motion = self.chunk.items[self.frame].motion.clone();
                    return Ok((motion, None, self.frame - 1));
                }
                if self.chunk.first_chunk {
                    return Err(WalkEnd::EndOfData);
                }
                let previous = self.load(self.chunk_idx - 1)?;
                let last = previous.items.len().checked_sub(1).ok_or(WalkEnd::EndOfData)?;
                let motion = self.chunk.items.first().ok_or(WalkEnd::EndOfData)?.motion.clone();
                Ok((motion, Some(previous), last))
            },
        }
    }

    fn load(&self, chunk_idx: i64) -> std::result::Result<ChunkHandle, WalkEnd> {
        self.inner.load_chunk(chunk_idx, &self.token).ok_or_else(|| {
            if self.token.is_cancelled() {
                WalkEnd::Canceled
            } else {
                WalkEnd::MissingChunk
            }
        })
    }
}

impl Drop for TrackingJob {
    fn drop(&mut self) {
        let waiting = {
            let mut guard = self.inner.status.lock();
            let status = &mut *guard;
            status.finish(self.id, self.checkpoint);
            if status.ongoing(self.id, self.checkpoint) == 0 {
                status.gates.get_mut(&self.id).and_then(|gate| gate.replacing_wait.take())
            } else {
                None
            }
        };
        self.inner.status_changed.notify_all();
        self.inner.wake(waiting);
    }
}

/// Multi-object box tracker over cached tracking data.
pub struct BoxTracker {
    inner: Arc<TrackerInner>,
    workers: ThreadPool,
}

impl BoxTracker {
    /// A tracker reading JSON chunk files from `cache_dir`.
    ///
    /// # Errors
    ///
    /// Invalid options or a failure to start the worker threads.
    pub fn new(cache_dir: impl Into<PathBuf>, options: BoxTrackerOptions) -> Result<Self> {
        let stepper = Arc::new(TranslationTracker::new(options.track_step.clone()));
        Self::with_components(
            ChunkSource::CacheDir { dir: cache_dir.into(), codec: Arc::new(JsonChunkCodec) },
            options,
            stepper,
        )
    }

    /// A tracker over caller-owned chunks; chunk `i` covers chunk index `i`.
    ///
    /// # Errors
    ///
    /// Invalid options or a failure to start the worker threads.
    pub fn with_chunks(
        chunks: Vec<Arc<TrackingDataChunk>>,
        options: BoxTrackerOptions,
    ) -> Result<Self> {
        let stepper = Arc::new(TranslationTracker::new(options.track_step.clone()));
        let handles = chunks.into_iter().map(ChunkHandle::External).collect();
        Self::with_components(ChunkSource::Memory(handles), options, stepper)
    }

    /// # Errors
    ///
    /// Invalid options or a failure to start the worker threads.
    pub fn with_components(
        source: ChunkSource,
        options: BoxTrackerOptions,
        stepper: Arc<dyn TrackStep>,
    ) -> Result<Self> {
        options.validate()?;
        let workers = ThreadPool::new("box-tracker", options.num_tracking_workers)?;
        let store = match source {
            ChunkSource::CacheDir { dir, codec } => ChunkStore::Cache { dir, codec },
            ChunkSource::Memory(chunks) => ChunkStore::Memory(RwLock::new(chunks)),
        };
        tracing::debug!(
            workers = options.num_tracking_workers,
            chunk_size_msec = options.caching_chunk_size_msec,
            "Box tracker created"
        );
        let inner = Arc::new(TrackerInner {
            options,
            store,
            stepper,
            paths: Mutex::new(HashMap::new()),
            status: Mutex::new(StatusState::default()),
            status_changed: Condvar::new(),
            pool: workers.handle(),
            metrics: TrackerMetrics::new(),
        });
        Ok(Self { inner, workers })
    }

    pub fn options(&self) -> &BoxTrackerOptions {
        &self.inner.options
    }

    /// Appends a shared chunk to an in-memory tracker.
    ///
    /// # Errors
    ///
    /// `TrackerError::Configuration` for trackers reading from a cache directory.
    pub fn add_tracking_data_chunk(&self, chunk: Arc<TrackingDataChunk>) -> Result<()> {
        self.push_chunk(ChunkHandle::External(chunk))
    }

    /// Appends a private copy of `chunk` to an in-memory tracker.
    ///
    /// # Errors
    ///
    /// `TrackerError::Configuration` for trackers reading from a cache directory.
    pub fn add_tracking_data_chunk_copy(&self, chunk: &TrackingDataChunk) -> Result<()> {
        self.push_chunk(ChunkHandle::Owned(Box::new(chunk.clone())))
    }

    fn push_chunk(&self, chunk: ChunkHandle) -> Result<()> {
        match &self.inner.store {
            ChunkStore::Memory(chunks) => {
                chunks.write().push(chunk);
                Ok(())
            },
            ChunkStore::Cache { .. } => Err(TrackerError::Configuration(
                "tracker reads chunks from its cache directory".to_string(),
            )),
        }
    }

    /// Starts tracking `id` from `initial`, bounded to `[min_msec, max_msec]`.
    ///
    /// Returns immediately. `false` means the request was refused because
    /// tracking is canceled; failures after that point are only logged.
    pub fn new_box_track(&self, initial: &TimedBox, id: i32, min_msec: i64, max_msec: i64) -> bool {
        let (ticket, token) = {
            let mut guard = self.inner.status.lock();
            let status = &mut *guard;
            if status.canceling {
                tracing::warn!(id, time_msec = initial.time_msec, "Tracking canceled; new track refused");
                self.inner.metrics.refused.add(1, &[]);
                return false;
            }
            let init = status
                .tracks
                .entry(id)
                .or_default()
                .entry(INIT_CHECKPOINT)
                .or_insert_with(TrackStatus::new);
            init.tracks_ongoing += 1;
            let token = init.token.clone();
            (status.gates.entry(id).or_default().issue(), token)
        };
        self.inner.metrics.requests.add(1, &[]);
        tracing::debug!(id, time_msec = initial.time_msec, ticket, "New box track requested");

        let request = NewTrackRequest {
            inner: Arc::clone(&self.inner),
            id,
            initial: initial.clone(),
            min_msec,
            max_msec,
            ticket,
            token,
            seed: None,
            replacing: None,
            scheduled: false,
        };
        self.workers.schedule(move || request.run());
        true
    }

    /// The box of `id` at `time_msec`, if one can be determined.
    pub fn get_timed_position(&self, id: i32, time_msec: i64) -> Option<TimedBox> {
        self.get_timed_position_with_states(id, time_msec).map(|(timed_box, _)| timed_box)
    }

    /// Like [`get_timed_position`](Self::get_timed_position), plus the motion
    /// state when path states are recorded.
    pub fn get_timed_position_with_states(
        &self,
        id: i32,
        time_msec: i64,
    ) -> Option<(TimedBox, Option<MotionBoxState>)> {
        let paths = self.inner.paths.lock();
        let (mut timed_box, state) = paths.get(&id)?.timed_position(time_msec)?;
        timed_box.id = id;
        Some((timed_box, state))
    }

    /// Cancels all running work and blocks until it has stopped. New tracks
    /// are refused until [`resume_tracking`](Self::resume_tracking).
    pub fn cancel_all_ongoing_tracks(&self) {
        let mut status = self.inner.status.lock();
        status.canceling = true;

        let mut canceled = Vec::new();
        for (&id, checkpoints) in &status.tracks {
            for (&checkpoint, track) in checkpoints {
                if track.tracks_ongoing > 0 {
                    track.token.cancel();
                    canceled.push((id, checkpoint));
                }
            }
        }
        tracing::debug!(tracks = canceled.len(), "Canceling ongoing tracks");

        // Parked requests hold their id's INIT count; run them so they see
        // the canceled token and let go.
        let waiting = status.take_waiting();
        drop(status);
        self.inner.wake(waiting);
        let mut status = self.inner.status.lock();

        while canceled.iter().any(|&(id, checkpoint)| status.ongoing(id, checkpoint) > 0) {
            self.inner.status_changed.wait(&mut status);
        }
        for (id, checkpoint) in canceled {
            if let Some(track) = status.tracks.get_mut(&id).and_then(|cps| cps.get_mut(&checkpoint)) {
                track.token = CancellationToken::new();
            }
        }
    }

    pub fn resume_tracking(&self) {
        self.inner.status.lock().canceling = false;
        self.inner.status_changed.notify_all();
        tracing::debug!("Tracking resumed");
    }

    /// Blocks until no track is ongoing. Returns `false` if `timeout`
    /// expired first.
    pub fn wait_for_all_ongoing_tracks(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut status = self.inner.status.lock();
        while status.any_ongoing() {
            match deadline {
                Some(deadline) => {
                    if self.inner.status_changed.wait_until(&mut status, deadline).timed_out() {
                        return !status.any_ongoing();
                    }
                },
                None => self.inner.status_changed.wait(&mut status),
            }
        }
        true
    }

    pub fn is_tracking_ongoing(&self) -> bool {
        self.inner.status.lock().any_ongoing()
    }

    pub fn is_tracking_ongoing_for_id(&self, id: i32) -> bool {
        self.inner.status.lock().any_ongoing_for(id)
    }

    /// Motion of the frame closest to `time_msec` and that frame's time.
    /// Blocks while the chunk is not available yet.
    pub fn get_tracking_data(&self, time_msec: i64) -> Option<(i64, FrameMotion)> {
        let chunk_idx = chunk_index_for_msec(time_msec, self.inner.options.caching_chunk_size_msec);
        let chunk = self.inner.load_chunk(chunk_idx, &CancellationToken::new())?;
        let item = &chunk.items[chunk.closest_frame_index(time_msec)?];
        Some((item.time_msec(), item.motion.clone()))
    }

    pub fn checkpoints(&self, id: i32) -> Vec<i64> {
        self.inner.paths.lock().get(&id).map(Path::checkpoints).unwrap_or_default()
    }

    /// Stored boxes of one checkpoint, in time order.
    pub fn segment_boxes(&self, id: i32, checkpoint: i64) -> Vec<TimedBox> {
        self.inner
            .paths
            .lock()
            .get(&id)
            .and_then(|path| path.segment(checkpoint))
            .map(crate::path::PathSegment::boxes)
            .unwrap_or_default()
    }
}

impl Drop for BoxTracker {
    fn drop(&mut self) {
        let waiting = {
            let mut status = self.inner.status.lock();
            status.canceling = true;
            for track in status.tracks.values().flat_map(BTreeMap::values) {
                track.token.cancel();
            }
            status.take_waiting()
        };
        self.inner.status_changed.notify_all();
        // Parked requests hold the tracker state; dropping them releases it.
        drop(waiting);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn gate_serves_in_ticket_order() {
        let mut gate = IdGate::default();
        let first = gate.issue();
        let second = gate.issue();
        let third = gate.issue();
        assert_eq!(gate.serving, first);

        gate.release(second);
        assert_eq!(gate.serving, first);
        gate.release(first);
        assert_eq!(gate.serving, third);
        gate.release(third);
        assert_eq!(gate.serving, 3);
        assert!(gate.abandoned.is_empty());
    }

    #[test]
    fn status_counts() {
        let mut status = StatusState::default();
        let cps = status.tracks.entry(4).or_default();
        cps.insert(100, TrackStatus { token: CancellationToken::new(), tracks_ongoing: 2 });
        cps.insert(INIT_CHECKPOINT, TrackStatus::new());
        assert!(status.any_ongoing());
        assert!(status.any_ongoing_for(4));
        assert!(!status.any_ongoing_for(5));

        status.finish(4, 100);
        status.finish(4, 100);
        status.finish(4, 100);
        assert_eq!(status.ongoing(4, 100), 0);
        assert!(!status.any_ongoing());
    }
}
