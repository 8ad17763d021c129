// Chunked generation around a moving focus, in the foreground or on a
// background thread.
//
// `ChunkDriver` splits the XZ plane into columns of `chunk_size x height x
// chunk_size` slots. Each call to `step` advances generation of the nearest
// not-yet-generated column within `radius` chunks of the focus: distance is
// measured between chunk coordinates, ties broken by `(x, z)`, so the order
// is deterministic. With `batch_size == 0` a column is collapsed in one call;
// otherwise each call runs at most `batch_size` attempts so the caller can
// interleave generation with a frame loop. A focus change takes effect at the
// next column, never mid-column. Backtracking may reach into a column that
// was already reported; its slots are re-collapsed as part of the current
// column, and the world's spawn events carry the change.
//
// `GenerationWorker` moves a `World` and a `ChunkDriver` onto a thread:
//
// - **Commands** (`WorkerCommand`) arrive over an unbounded `mpsc` channel
//   and are drained between batches. When there is nothing left to generate
//   the thread blocks on the command channel.
// - **Results** (`WorkerEvent`) leave over a `sync_channel` bounded by
//   `DriverConfig::event_capacity`; a full channel pauses generation until
//   the consumer catches up.
// - **Shutdown** sets a shared `AtomicBool` that the collapse loop polls
//   between attempts, sends `Stop`, drops the result receiver (unblocking a
//   pending send), and joins. `stop` hands the world back.
//
// The world is owned by exactly one thread at a time; nothing is shared
// except the cancellation flag.
//
// See also: `world.rs` for the session being driven, `map.rs` for
// `collapse_step` and cancellation.

use crate::config::DriverConfig;
use crate::error::GenerationError;
use crate::map::{CollapseOptions, CollapseStatus, box_positions};
use crate::types::{Coord, ModuleIndex};
use crate::world::World;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerCommand {
    /// Generate around this slot position from now on.
    Focus(Coord),
    Stop,
}

/// A finished chunk column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerEvent {
    ChunkCompleted {
        chunk: Coord,
        /// Every collapsed slot of the column.
        slots: Vec<(Coord, ModuleIndex)>,
    },
    ChunkFailed {
        chunk: Coord,
        error: GenerationError,
    },
}

/// Outcome of one `ChunkDriver::step`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriverStep {
    /// Every column within range of the focus is generated.
    Idle,
    /// A column is partly generated.
    Working { chunk: Coord, remaining: usize },
    Finished(WorkerEvent),
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

pub struct ChunkDriver {
    config: DriverConfig,
    height: i32,
    focus: Coord,
    generated: BTreeSet<Coord>,
    current: Option<Coord>,
}

impl ChunkDriver {
    pub fn new(config: DriverConfig, height: i32) -> Self {
        Self {
            config,
            height,
            focus: Coord::ZERO,
            generated: BTreeSet::new(),
            current: None,
        }
    }

    /// A driver for `world`'s configured chunking and height.
    pub fn for_world(world: &World) -> Self {
        Self::new(world.config().driver.clone(), world.map().height())
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn set_focus(&mut self, pos: Coord) {
        self.focus = pos;
    }

    pub fn focus(&self) -> Coord {
        self.focus
    }

    /// Chunk column containing slot `pos`; Y is always 0.
    pub fn chunk_of(&self, pos: Coord) -> Coord {
        let size = self.config.chunk_size.max(1);
        Coord::new(pos.x.div_euclid(size), 0, pos.z.div_euclid(size))
    }

    /// Origin and extent of a chunk column in slot coordinates.
    pub fn footprint(&self, chunk: Coord) -> (Coord, Coord) {
        let size = self.config.chunk_size.max(1);
        (
            Coord::new(chunk.x * size, 0, chunk.z * size),
            Coord::new(size, self.height, size),
        )
    }

    pub fn is_generated(&self, chunk: Coord) -> bool {
        self.generated.contains(&chunk)
    }

    /// Columns within range of the focus still to generate, nearest first.
    pub fn pending_chunks(&self) -> Vec<Coord> {
        let center = self.chunk_of(self.focus);
        let radius = self.config.radius;
        let mut pending = Vec::new();
        for dx in -radius..=radius {
            for dz in -radius..=radius {
                let chunk = Coord::new(center.x + dx, 0, center.z + dz);
                if dx * dx + dz * dz <= radius * radius && !self.generated.contains(&chunk) {
                    pending.push(chunk);
                }
            }
        }
        pending.sort_by_key(|c| {
            let (dx, dz) = (c.x - center.x, c.z - center.z);
            (dx * dx + dz * dz, c.x, c.z)
        });
        pending
    }

    /// Advance generation by one batch.
    pub fn step(&mut self, world: &mut World, options: &mut CollapseOptions<'_>) -> DriverStep {
        let chunk = match self.current {
            Some(chunk) => chunk,
            None => {
                let Some(chunk) = self.pending_chunks().first().copied() else {
                    return DriverStep::Idle;
                };
                let (origin, size) = self.footprint(chunk);
                debug!(chunk = %chunk, "starting chunk");
                world.begin_collapse(box_positions(origin, size));
                self.current = Some(chunk);
                chunk
            }
        };
        let batch = match self.config.batch_size {
            0 => usize::MAX,
            n => n,
        };
        match world.collapse_step(batch, options) {
            Ok(CollapseStatus::InProgress { remaining }) => DriverStep::Working { chunk, remaining },
            Ok(CollapseStatus::Complete(report)) => {
                self.current = None;
                self.generated.insert(chunk);
                info!(
                    chunk = %chunk,
                    collapsed = report.collapsed,
                    backtracks = report.backtracks,
                    "chunk complete"
                );
                DriverStep::Finished(WorkerEvent::ChunkCompleted {
                    chunk,
                    slots: self.chunk_slots(world, chunk),
                })
            }
            Err(error) => {
                self.current = None;
                // A cancelled chunk can be resumed later; anything else is
                // not retried.
                if error != GenerationError::Cancelled {
                    self.generated.insert(chunk);
                    warn!(chunk = %chunk, %error, "chunk failed");
                }
                DriverStep::Finished(WorkerEvent::ChunkFailed { chunk, error })
            }
        }
    }

    /// Run until the current or next column finishes. `None` when idle.
    pub fn generate_next(
        &mut self,
        world: &mut World,
        options: &mut CollapseOptions<'_>,
    ) -> Option<WorkerEvent> {
        loop {
            match self.step(world, options) {
                DriverStep::Idle => return None,
                DriverStep::Working { .. } => {}
                DriverStep::Finished(event) => return Some(event),
            }
        }
    }

    fn chunk_slots(&self, world: &World, chunk: Coord) -> Vec<(Coord, ModuleIndex)> {
        let (origin, size) = self.footprint(chunk);
        box_positions(origin, size)
            .into_iter()
            .filter_map(|pos| world.map().module_at(pos).map(|m| (pos, m)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Background worker
// ---------------------------------------------------------------------------

/// Handle to a generation thread. Dropping it stops the thread and discards
/// the world; call `stop` to get the world back.
pub struct GenerationWorker {
    commands: Sender<WorkerCommand>,
    events: Option<Receiver<WorkerEvent>>,
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<World>>,
}

impl GenerationWorker {
    pub fn spawn(world: World, driver: ChunkDriver) -> Self {
        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::sync_channel(driver.config().event_capacity.max(1));
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_clone = Arc::clone(&cancel);
        let thread = thread::spawn(move || {
            run_worker(world, driver, command_rx, event_tx, cancel_clone)
        });
        Self {
            commands: command_tx,
            events: Some(event_rx),
            cancel,
            thread: Some(thread),
        }
    }

    /// Move the focus. Returns false if the thread has exited.
    pub fn focus(&self, pos: Coord) -> bool {
        self.commands.send(WorkerCommand::Focus(pos)).is_ok()
    }

    pub fn try_recv(&self) -> Option<WorkerEvent> {
        self.events.as_ref()?.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<WorkerEvent> {
        self.events.as_ref()?.recv_timeout(timeout).ok()
    }

    /// Signal the thread to stop, wait for it, and return the world. `None`
    /// if the thread panicked.
    pub fn stop(mut self) -> Option<World> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<World> {
        self.cancel.store(true, Ordering::SeqCst);
        let _ = self.commands.send(WorkerCommand::Stop);
        self.events = None;
        let handle = self.thread.take()?;
        handle.join().ok()
    }
}

impl Drop for GenerationWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker thread body. Returns the world when told to stop or when either
/// channel disconnects.
fn run_worker(
    mut world: World,
    mut driver: ChunkDriver,
    commands: Receiver<WorkerCommand>,
    events: SyncSender<WorkerEvent>,
    cancel: Arc<AtomicBool>,
) -> World {
    debug!("generation worker started");
    loop {
        loop {
            match commands.try_recv() {
                Ok(WorkerCommand::Focus(pos)) => driver.set_focus(pos),
                Ok(WorkerCommand::Stop) | Err(TryRecvError::Disconnected) => return world,
                Err(TryRecvError::Empty) => break,
            }
        }
        if cancel.load(Ordering::SeqCst) {
            return world;
        }
        let mut options = CollapseOptions {
            cancel: Some(Arc::clone(&cancel)),
            ..CollapseOptions::default()
        };
        match driver.step(&mut world, &mut options) {
            DriverStep::Idle => match commands.recv() {
                Ok(WorkerCommand::Focus(pos)) => driver.set_focus(pos),
                Ok(WorkerCommand::Stop) | Err(_) => return world,
            },
            DriverStep::Working { .. } => {}
            DriverStep::Finished(event) => {
                if events.send(event).is_err() {
                    return world;
                }
            }
        }
    }
}
