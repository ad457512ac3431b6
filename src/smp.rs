//! Parallel search: worker pool and communicator.
//!
//! N worker threads search the same position independently and
//! coordinate only through the shared transposition table. Each worker
//! owns its position, evaluator, history and killer tables. The
//! communicator fans the stop signal out, carries per-worker command
//! queues (position, start, stop, quit) and collects best-move reports;
//! worker 0 is the one whose results reach the front-end.
//!
//! An ordered mode serialises workers through a round-robin gate at
//! stop-poll granularity, making multi-threaded searches deterministic
//! for testing. The gate busy-waits and assumes free hardware threads.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::eval::nn::NetData;
use crate::eval::Evaluate;
use crate::position::Position;
use crate::search::{InfoCallback, SearchLimits, SearchResult, Searcher};
use crate::tt::TranspositionTable;

/// Search thread stack size; deep recursion plus the accumulator stack.
const SEARCH_STACK_SIZE: usize = 32 * 1024 * 1024;

/// Round-robin gate for deterministic multi-threaded searches.
///
/// Exactly one worker runs at a time: a worker acquires the turn before
/// its node slice and yields it at the next stop-poll, so slices never
/// overlap and the interleaving of table traffic is identical in every
/// run. The gate busy-waits; it assumes free hardware threads.
pub struct OrderedGate {
    turn: AtomicUsize,
    workers: usize,
    retired: Vec<AtomicBool>,
}

impl OrderedGate {
    #[must_use]
    pub fn new(workers: usize) -> Self {
        OrderedGate {
            turn: AtomicUsize::new(0),
            workers,
            retired: (0..workers).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// Spin until it is `id`'s turn. Retired workers' slots are skipped
    /// on their behalf.
    pub fn acquire(&self, id: usize) {
        loop {
            let t = self.turn.load(Ordering::Acquire);
            let current = t % self.workers;
            if current == id {
                return;
            }
            if self.retired[current].load(Ordering::Acquire) {
                let _ =
                    self.turn
                        .compare_exchange(t, t + 1, Ordering::AcqRel, Ordering::Acquire);
            }
            std::hint::spin_loop();
        }
    }

    /// Hand the turn to the next worker, then wait for the next slice.
    pub fn yield_turn(&self, id: usize) {
        debug_assert_eq!(self.turn.load(Ordering::Acquire) % self.workers, id);
        self.turn.fetch_add(1, Ordering::AcqRel);
        self.acquire(id);
    }

    /// Mark a worker as finished so the rotation skips it.
    pub fn retire(&self, id: usize) {
        self.retired[id].store(true, Ordering::Release);
    }
}

enum WorkerCommand {
    SetPosition(Box<Position>, Vec<u64>),
    Start(Box<SearchLimits>, Option<InfoCallback>, i32, Option<Arc<OrderedGate>>),
    Quit,
}

struct WorkerReport {
    worker_id: usize,
    result: SearchResult,
}

struct WorkerHandle {
    commands: Sender<WorkerCommand>,
    thread: Option<JoinHandle<()>>,
}

/// The communicator: stop fan-out plus the report channel. The receiver
/// sits behind a mutex so the pool can be shared across threads.
struct Communicator {
    stop: Arc<AtomicBool>,
    reports: Mutex<Receiver<WorkerReport>>,
}

/// Pool of persistent search workers sharing one transposition table.
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
    comm: Communicator,
    tt: Arc<TranspositionTable>,
    ordered: bool,
}

impl WorkerPool {
    /// Spawn `n` workers. Worker state (position, history tables) lives
    /// on the worker threads; the pool owns only the channels.
    #[must_use]
    pub fn new(n: usize, tt_mb: usize, net: Arc<NetData>) -> Self {
        let n = n.max(1);
        let tt = Arc::new(TranspositionTable::new(tt_mb));
        let stop = Arc::new(AtomicBool::new(false));
        let (report_tx, report_rx) = channel();

        let mut workers = Vec::with_capacity(n);
        for worker_id in 0..n {
            let (cmd_tx, cmd_rx) = channel();
            let tt = Arc::clone(&tt);
            let stop = Arc::clone(&stop);
            let net = Arc::clone(&net);
            let report_tx = report_tx.clone();
            let thread = std::thread::Builder::new()
                .name(format!("search-{worker_id}"))
                .stack_size(SEARCH_STACK_SIZE)
                .spawn(move || worker_main(worker_id, &cmd_rx, &report_tx, tt, stop, net))
                .expect("failed to spawn search worker");
            workers.push(WorkerHandle {
                commands: cmd_tx,
                thread: Some(thread),
            });
        }

        WorkerPool {
            workers,
            comm: Communicator {
                stop,
                reports: Mutex::new(report_rx),
            },
            tt,
            ordered: false,
        }
    }

    /// Enable the deterministic round-robin mode. Test use only: the
    /// gate busy-waits and assumes enough free hardware threads.
    pub fn set_ordered(&mut self, ordered: bool) {
        self.ordered = ordered;
    }

    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.comm.stop)
    }

    #[must_use]
    pub fn transposition_table(&self) -> Arc<TranspositionTable> {
        Arc::clone(&self.tt)
    }

    pub fn clear_hash(&self) {
        self.tt.clear();
    }

    /// Install the root position and game history on every worker.
    pub fn set_position(&self, pos: &Position, history: &[u64]) {
        for w in &self.workers {
            let _ = w.commands.send(WorkerCommand::SetPosition(
                Box::new(pos.clone()),
                history.to_vec(),
            ));
        }
    }

    /// Run a blocking search across all workers and return worker 0's
    /// result. Helper workers search one ply deeper in alternation to
    /// diversify the shared table.
    pub fn search(
        &self,
        limits: &SearchLimits,
        info_cb: Option<InfoCallback>,
        white_contempt: i32,
    ) -> SearchResult {
        self.comm.stop.store(false, Ordering::Release);
        let gate = if self.ordered && self.workers.len() > 1 {
            Some(Arc::new(OrderedGate::new(self.workers.len())))
        } else {
            None
        };
        for (worker_id, w) in self.workers.iter().enumerate() {
            let cb = if worker_id == 0 { info_cb.clone() } else { None };
            let mut worker_limits = limits.clone();
            if worker_id > 0 {
                // Helpers run without their own clocks; the stop flag
                // fans the driver's deadline out to them.
                worker_limits.soft_time_ms = None;
                worker_limits.hard_time_ms = None;
                if worker_limits.max_depth > 0 && worker_id % 2 == 1 {
                    worker_limits.max_depth += 1;
                }
            }
            let _ = w.commands.send(WorkerCommand::Start(
                Box::new(worker_limits),
                cb,
                white_contempt,
                gate.clone(),
            ));
        }

        // Worker 0 finishing (or an external stop) ends the search for
        // everyone.
        let reports = self.comm.reports.lock();
        let mut main_result = None;
        let mut received = 0usize;
        while received < self.workers.len() {
            let Ok(report) = reports.recv() else {
                break;
            };
            received += 1;
            if report.worker_id == 0 {
                main_result = Some(report.result);
                self.comm.stop.store(true, Ordering::Release);
            }
        }
        main_result.unwrap_or_default()
    }

    /// Request cancellation of the running search.
    pub fn stop(&self) {
        self.comm.stop.store(true, Ordering::Release);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.comm.stop.store(true, Ordering::Release);
        for w in &self.workers {
            let _ = w.commands.send(WorkerCommand::Quit);
        }
        for w in &mut self.workers {
            if let Some(t) = w.thread.take() {
                let _ = t.join();
            }
        }
    }
}

fn worker_main(
    worker_id: usize,
    commands: &Receiver<WorkerCommand>,
    reports: &Sender<WorkerReport>,
    tt: Arc<TranspositionTable>,
    stop: Arc<AtomicBool>,
    net: Arc<NetData>,
) {
    let mut searcher = Searcher::new(Position::start(), Evaluate::new(net), tt);
    searcher.set_stop_flag(stop);

    while let Ok(cmd) = commands.recv() {
        match cmd {
            WorkerCommand::SetPosition(pos, history) => {
                searcher.set_position(*pos, history);
            }
            WorkerCommand::Start(limits, info_cb, white_contempt, gate) => {
                searcher.set_contempt(white_contempt);
                searcher.set_ordered_gate(gate.clone().map(|g| (g, worker_id)));
                let result = searcher.search(&limits, info_cb);
                if let Some(g) = gate {
                    g.retire(worker_id);
                }
                searcher.set_ordered_gate(None);
                let _ = reports.send(WorkerReport { worker_id, result });
            }
            WorkerCommand::Quit => break,
        }
    }
}
