//! Spawning the workers of a run, as processes or as threads.
//!
//! Both runners follow the same shape: allocate the center, let two
//! generators (adults and children) spawn workers at random intervals, wait for
//! every worker, release the center. Any failure on the way tears down what was
//! already started before the center is released.

use std::{
    env, io,
    path::Path,
    process::{Child, Command},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    center::Center,
    config::Config,
    error::{CenterError, Result},
    event::{EventLog, FileLog, Role},
    worker,
};

/// First argument that switches the binary into worker mode.
pub const WORKER_ARG: &str = "--worker";

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Segment name for a run started by this process.
pub fn segment_name() -> String {
    format!("childcare-{}", std::process::id())
}

/// Runs the simulation with one OS process per worker, logging to `log_path`.
pub fn run_processes(config: &Config, log_path: &Path) -> Result<()> {
    FileLog::create(log_path).map_err(CenterError::Log)?;
    let center = Center::create(&segment_name(), config)?;
    let exe = env::current_exe().map_err(|source| CenterError::Spawn {
        what: "worker (current executable unknown)".to_string(),
        source,
    })?;

    let workers = WorkerSet::default();
    let spawned = thread::scope(|scope| {
        let adults = scope.spawn(|| {
            generate(config.adults, config.adult_gen_ms, &workers.failed, |_| {
                workers.spawn(&exe, Role::Adult, center.name(), log_path)
            })
        });
        let children = scope.spawn(|| {
            generate(config.children, config.child_gen_ms, &workers.failed, |_| {
                workers.spawn(&exe, Role::Child, center.name(), log_path)
            })
        });
        join_generator(adults).and(join_generator(children))
    });

    let outcome = spawned.and_then(|()| workers.wait_all());
    if let Err(e) = &outcome {
        tracing::error!(error = %e, "run failed, terminating workers");
        workers.abort();
    }
    center.release_name();
    outcome
}

/// Worker thread body handed to a [`ThreadSpawner`].
pub(crate) type WorkerBody = Box<dyn FnOnce() -> Result<u32> + Send>;

/// Starts a worker thread with the given name.
pub(crate) type ThreadSpawner = fn(String, WorkerBody) -> io::Result<JoinHandle<Result<u32>>>;

fn spawn_thread(name: String, body: WorkerBody) -> io::Result<JoinHandle<Result<u32>>> {
    thread::Builder::new().name(name).spawn(body)
}

/// Runs the simulation with one thread per worker in this process. `name` is
/// the segment to create; `log` receives every event.
pub fn run_threads(config: &Config, name: &str, log: Arc<dyn EventLog>) -> Result<()> {
    run_threads_with(config, name, log, spawn_thread)
}

pub(crate) fn run_threads_with(
    config: &Config,
    name: &str,
    log: Arc<dyn EventLog>,
    spawner: ThreadSpawner,
) -> Result<()> {
    let center = Arc::new(Center::create(name, config)?);
    let failed = AtomicBool::new(false);
    let handles: Mutex<Vec<JoinHandle<Result<u32>>>> = Mutex::new(Vec::new());

    let spawned = thread::scope(|scope| {
        let spawn_for = |role: Role| {
            let center = &center;
            let log = &log;
            let handles = &handles;
            move |seq: u32| -> Result<()> {
                let center = Arc::clone(center);
                let log = Arc::clone(log);
                let handle = spawner(
                    format!("{}-{seq}", role.as_str()),
                    Box::new(move || worker::run(&center, &*log, role)),
                )
                .map_err(|source| CenterError::Spawn {
                    what: format!("{} thread", role.as_str()),
                    source,
                })?;
                lock_handles(handles).push(handle);
                Ok(())
            }
        };
        let adults = scope.spawn({
            let spawn = spawn_for(Role::Adult);
            let failed = &failed;
            move || generate(config.adults, config.adult_gen_ms, failed, spawn)
        });
        let children = scope.spawn({
            let spawn = spawn_for(Role::Child);
            let failed = &failed;
            move || generate(config.children, config.child_gen_ms, failed, spawn)
        });
        join_generator(adults).and(join_generator(children))
    });

    if spawned.is_err() {
        // threads can't be killed; wake them with an error instead
        center.cancel();
    }

    let mut outcome = spawned;
    let mut pending = std::mem::take(&mut *lock_handles(&handles));
    while !pending.is_empty() {
        let (done, running): (Vec<_>, Vec<_>) =
            pending.into_iter().partition(|handle| handle.is_finished());
        pending = running;
        for handle in done {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            let result = match handle.join() {
                Ok(result) => result.map(|_| ()),
                Err(_) => Err(CenterError::WorkerFailed {
                    what: name,
                    status: "panicked".to_string(),
                }),
            };
            if let Err(e) = result {
                if outcome.is_ok() {
                    tracing::error!(error = %e, "worker failed, cancelling run");
                    center.cancel();
                    outcome = Err(e);
                }
            }
        }
        if !pending.is_empty() {
            thread::sleep(POLL_INTERVAL);
        }
    }

    center.release_name();
    outcome
}

/// Spawns `count` workers through `spawn`, sleeping up to `gen_ms` before each.
/// Stops early once `failed` is set, and sets it on its own failure.
pub(crate) fn generate<F>(count: u32, gen_ms: u32, failed: &AtomicBool, mut spawn: F) -> Result<()>
where
    F: FnMut(u32) -> Result<()>,
{
    for seq in 1..=count {
        worker::occupy(gen_ms);
        if failed.load(Ordering::Acquire) {
            return Ok(());
        }
        if let Err(e) = spawn(seq) {
            failed.store(true, Ordering::Release);
            return Err(e);
        }
    }
    Ok(())
}

fn join_generator(handle: thread::ScopedJoinHandle<'_, Result<()>>) -> Result<()> {
    handle.join().unwrap_or_else(|_| {
        Err(CenterError::WorkerFailed {
            what: "generator".to_string(),
            status: "panicked".to_string(),
        })
    })
}

fn lock_handles<T>(handles: &Mutex<Vec<T>>) -> std::sync::MutexGuard<'_, Vec<T>> {
    handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Worker processes spawned so far. Shared by both generators.
#[derive(Default)]
pub(crate) struct WorkerSet {
    children: Mutex<Vec<(String, Child)>>,
    failed: AtomicBool,
}

impl WorkerSet {
    fn spawn(&self, exe: &Path, role: Role, segment: &str, log_path: &Path) -> Result<()> {
        let child = Command::new(exe)
            .arg(WORKER_ARG)
            .arg(role.as_str())
            .arg(segment)
            .arg(log_path)
            .spawn()
            .map_err(|source| CenterError::Spawn {
                what: format!("{} process", role.as_str()),
                source,
            })?;
        tracing::debug!(role = role.as_str(), pid = child.id(), "spawned worker");
        self.push(role.as_str().to_string(), child);
        Ok(())
    }

    pub(crate) fn push(&self, what: String, child: Child) {
        lock_handles(&self.children).push((what, child));
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        lock_handles(&self.children).len()
    }

    /// Reaps every worker, failing on the first unsuccessful exit.
    pub(crate) fn wait_all(&self) -> Result<()> {
        loop {
            let mut children = lock_handles(&self.children);
            let mut i = 0;
            while i < children.len() {
                let (what, child) = &mut children[i];
                match child.try_wait() {
                    Ok(Some(status)) if status.success() => {
                        children.swap_remove(i);
                    }
                    Ok(Some(status)) => {
                        return Err(CenterError::WorkerFailed {
                            what: format!("{what} process {}", child.id()),
                            status: status.to_string(),
                        });
                    }
                    Ok(None) => i += 1,
                    Err(e) => return Err(CenterError::Sync(e)),
                }
            }
            if children.is_empty() {
                return Ok(());
            }
            drop(children);
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Kills and reaps every worker still running.
    pub(crate) fn abort(&self) {
        let mut children = lock_handles(&self.children);
        for (what, child) in children.iter_mut() {
            if let Err(e) = child.kill() {
                tracing::warn!(worker = %what, pid = child.id(), error = %e, "unable to kill worker");
            }
        }
        for (_, child) in children.iter_mut() {
            let _ = child.wait();
        }
        children.clear();
    }
}

/// Body of a worker process: `--worker <adult|child> <segment> <log path>`.
pub fn run_worker_process(role: Role, segment: &str, log_path: &Path) -> Result<u32> {
    let center = Center::attach(segment)?;
    let log = FileLog::append_to(log_path).map_err(CenterError::Log)?;
    worker::run(&center, &log, role)
}
