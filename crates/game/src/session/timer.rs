use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};

/// Runs `work` on a short-lived worker thread every `period`, after
/// `initial_delay`. A tick is skipped while the previous worker is still
/// running, so two runs never overlap.
pub struct PeriodicTask {
    name: String,
    stop: Option<Sender<()>>,
    scheduler: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    pub fn start<F>(
        name: &str,
        initial_delay: Duration,
        period: Duration,
        work: F,
    ) -> io::Result<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let work = Arc::new(work);
        let busy = Arc::new(AtomicBool::new(false));
        let worker_name = format!("{}-worker", name);

        let scheduler = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                if !wait(&stop_rx, &channel::after(initial_delay)) {
                    return;
                }

                let ticker = channel::tick(period);
                loop {
                    dispatch(&worker_name, &work, &busy);
                    if !wait(&stop_rx, &ticker) {
                        return;
                    }
                }
            })?;

        Ok(Self {
            name: name.to_string(),
            stop: Some(stop_tx),
            scheduler: Some(scheduler),
        })
    }

    pub fn is_running(&self) -> bool {
        self.stop.is_some()
    }

    /// Stops scheduling. A worker already running finishes on its own.
    pub fn stop(&mut self) {
        self.stop.take();
        if let Some(handle) = self.scheduler.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
            log::debug!("Stopped periodic task {}", self.name);
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Waits for the next tick. Returns false once the task has been stopped.
fn wait<T>(stop: &Receiver<()>, tick: &Receiver<T>) -> bool {
    crossbeam::select! {
        recv(stop) -> _ => false,
        recv(tick) -> _ => true,
    }
}

fn dispatch<F>(name: &str, work: &Arc<F>, busy: &Arc<AtomicBool>)
where
    F: Fn() + Send + Sync + 'static,
{
    if busy.swap(true, Ordering::SeqCst) {
        log::trace!("{}: previous run still active, skipping tick", name);
        return;
    }

    let work = Arc::clone(work);
    let busy_flag = Arc::clone(busy);
    let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
        work();
        busy_flag.store(false, Ordering::SeqCst);
    });

    if let Err(e) = spawned {
        busy.store(false, Ordering::SeqCst);
        log::warn!("{}: could not spawn worker: {}", name, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn runs_after_initial_delay() {
        let runs = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&runs);
        let mut task = PeriodicTask::start(
            "test-tick",
            Duration::from_millis(100),
            Duration::from_millis(20),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        thread::sleep(Duration::from_millis(50));
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        thread::sleep(Duration::from_millis(200));
        task.stop();
        assert!(runs.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn slow_work_never_overlaps() {
        let active = Arc::new(AtomicU32::new(0));
        let overlapped = Arc::new(AtomicBool::new(false));
        let (a, o) = (Arc::clone(&active), Arc::clone(&overlapped));

        let mut task = PeriodicTask::start(
            "test-slow",
            Duration::ZERO,
            Duration::from_millis(5),
            move || {
                if a.fetch_add(1, Ordering::SeqCst) > 0 {
                    o.store(true, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_millis(30));
                a.fetch_sub(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        thread::sleep(Duration::from_millis(150));
        task.stop();
        assert!(!overlapped.load(Ordering::SeqCst));
    }

    #[test]
    fn stop_before_first_tick() {
        let runs = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&runs);
        let mut task = PeriodicTask::start(
            "test-stop",
            Duration::from_secs(10),
            Duration::from_secs(1),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        task.stop();
        assert!(!task.is_running());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
