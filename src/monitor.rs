//! Change monitor for controller devices.
//!
//! A [`Monitor`] keeps a registry of watched devices, polls them through a
//! [`DeviceReader`] (normally a [`Client`]) and calls a callback with the
//! old and new value whenever a device changes.
//!
//! # Poll cycle
//!
//! 1. The registry is snapshotted and the watched addresses are grouped by
//!    device type (groups in first-registration order) into maximal
//!    contiguous runs, each capped at the per-request point limit.
//! 2. Each run is read with one `read_devices` call. The registry lock is
//!    not held while reading.
//! 3. Read values are compared with each entry's last value. The first
//!    value seen for an entry only sets the baseline; no callback fires.
//! 4. Callbacks fire in address order within a device group, groups in
//!    registration order.
//!
//! If a read fails the rest of the cycle is abandoned: entries in runs that
//! were not read keep their previous value, and the loop carries on at the
//! next interval. Callbacks for runs read before the failure still fire.
//!
//! # Removal
//!
//! Removal is remove-then-suppress. Once [`Monitor::remove_device`]
//! returns, no callback fires for the removed entries, including changes
//! detected by a cycle that was already in flight. A callback may add or
//! remove devices itself.
//!
//! # Example
//!
//! ```no_run
//! use mc_protocol::{Client, ClientConfig, DeviceType, Monitor};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let client = Arc::new(Client::new(ClientConfig::new("192.168.1.10", 5007))?);
//! let monitor = Monitor::new(client);
//!
//! monitor.add_devices(DeviceType::D, 100, 10, |device, number, old, new| {
//!     println!("{device}{number}: {old} -> {new}");
//! })?;
//! monitor.start(Duration::from_millis(500))?;
//! // ...
//! monitor.stop();
//! # Ok::<(), mc_protocol::McError>(())
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, ReentrantMutex};

use crate::client::Client;
use crate::command::max_points;
use crate::device::{check_range, DeviceAddress, DeviceType};
use crate::error::{McError, Result};

/// Source of device values polled by a [`Monitor`].
pub trait DeviceReader {
    /// Reads `count` consecutive devices starting at `start`.
    fn read_devices(&self, device: DeviceType, start: u32, count: usize) -> Result<Vec<i32>>;
}

impl DeviceReader for Client {
    fn read_devices(&self, device: DeviceType, start: u32, count: usize) -> Result<Vec<i32>> {
        Client::read_devices(self, device, start, count)
    }
}

/// Callback fired with `(device, number, old_value, new_value)`.
pub type WatchCallback = Arc<dyn Fn(DeviceType, u32, i32, i32) + Send + Sync>;

/// Error hook fired with `(device, start, error)` of the read that failed.
type ErrorCallback = Arc<dyn Fn(DeviceType, u32, &McError) + Send + Sync>;

struct WatchEntry {
    id: u64,
    address: DeviceAddress,
    last: Option<i32>,
    callback: WatchCallback,
}

#[derive(Default)]
struct Registry {
    /// Registration order.
    entries: Vec<WatchEntry>,
    next_id: u64,
}

impl Registry {
    fn insert(&mut self, address: DeviceAddress, callback: WatchCallback) {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(WatchEntry {
            id,
            address,
            last: None,
            callback,
        });
    }

    fn contains(&self, id: u64) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    /// Diffs one run against the entries still registered.
    fn apply(&mut self, run: &ReadRun, values: &[i32], events: &mut Vec<ChangeEvent>) {
        let mut changed = Vec::new();
        for entry in &mut self.entries {
            let address = entry.address;
            if address.device != run.device || !run.contains(address.number) {
                continue;
            }
            let value = values[(address.number - run.start) as usize];
            match entry.last.replace(value) {
                Some(old) if old != value => changed.push(ChangeEvent {
                    id: entry.id,
                    address,
                    old,
                    new: value,
                    callback: Arc::clone(&entry.callback),
                }),
                _ => {}
            }
        }
        // stable: duplicates of one address keep registration order
        changed.sort_by_key(|event| event.address.number);
        events.extend(changed);
    }
}

struct ChangeEvent {
    id: u64,
    address: DeviceAddress,
    old: i32,
    new: i32,
    callback: WatchCallback,
}

/// One contiguous read issued by a poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReadRun {
    device: DeviceType,
    start: u32,
    count: usize,
}

impl ReadRun {
    fn contains(&self, number: u32) -> bool {
        number >= self.start && u64::from(number) < u64::from(self.start) + self.count as u64
    }
}

/// Groups watched addresses into the reads of one cycle.
fn plan_reads(entries: &[WatchEntry]) -> Vec<ReadRun> {
    let mut groups: Vec<(DeviceType, Vec<u32>)> = Vec::new();
    for entry in entries {
        let DeviceAddress { device, number } = entry.address;
        match groups.iter_mut().find(|(d, _)| *d == device) {
            Some((_, numbers)) => numbers.push(number),
            None => groups.push((device, vec![number])),
        }
    }

    let mut runs = Vec::new();
    for (device, mut numbers) in groups {
        numbers.sort_unstable();
        numbers.dedup();
        let max = max_points(device);

        let mut current: Option<ReadRun> = None;
        for number in numbers {
            if let Some(run) = current.as_mut() {
                let next = u64::from(run.start) + run.count as u64;
                if u64::from(number) == next && run.count < max {
                    run.count += 1;
                    continue;
                }
            }
            runs.extend(current.take());
            current = Some(ReadRun {
                device,
                start: number,
                count: 1,
            });
        }
        runs.extend(current);
    }
    runs
}

struct Shared {
    reader: Arc<dyn DeviceReader + Send + Sync>,
    registry: Mutex<Registry>,
    /// Held while callbacks fire; removal waits on it.
    dispatch: ReentrantMutex<()>,
    /// Serializes poll cycles.
    cycle: Mutex<()>,
    on_error: Mutex<Option<ErrorCallback>>,
}

impl Shared {
    fn poll_cycle(&self) -> Result<usize> {
        let _cycle = self.cycle.lock();
        let plan = plan_reads(&self.registry.lock().entries);

        let mut events = Vec::new();
        let mut failure = None;
        for run in &plan {
            match self.read_run(run) {
                Ok(values) => self.registry.lock().apply(run, &values, &mut events),
                Err(e) => {
                    failure = Some((*run, e));
                    break;
                }
            }
        }

        let fired = self.dispatch(events);

        match failure {
            None => {
                tracing::debug!(reads = plan.len(), fired, "Poll cycle complete");
                Ok(fired)
            }
            Some((run, e)) => {
                tracing::warn!(
                    device = %run.device,
                    start = run.start,
                    error = %e,
                    fired,
                    "Poll cycle failed"
                );
                self.report_error(&run, &e);
                Err(e)
            }
        }
    }

    fn report_error(&self, run: &ReadRun, error: &McError) {
        let Some(hook) = self.on_error.lock().clone() else {
            return;
        };
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| hook(run.device, run.start, error)));
        if outcome.is_err() {
            tracing::warn!(device = %run.device, start = run.start, "Error hook panicked");
        }
    }

    fn read_run(&self, run: &ReadRun) -> Result<Vec<i32>> {
        let values = self.reader.read_devices(run.device, run.start, run.count)?;
        if values.len() != run.count {
            return Err(McError::invalid_frame(format!(
                "read of {}{} returned {} values for {} points",
                run.device,
                run.start,
                values.len(),
                run.count
            )));
        }
        Ok(values)
    }

    fn dispatch(&self, events: Vec<ChangeEvent>) -> usize {
        let _dispatch = self.dispatch.lock();
        let mut fired = 0;
        for event in events {
            // removed since the read
            if !self.registry.lock().contains(event.id) {
                continue;
            }
            let DeviceAddress { device, number } = event.address;
            let callback = &event.callback;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                callback(device, number, event.old, event.new)
            }));
            if outcome.is_err() {
                tracing::warn!(device = %device, number, "Watch callback panicked");
            }
            fired += 1;
        }
        fired
    }

    /// Returns once no callback is being delivered by another thread.
    fn barrier(&self) {
        drop(self.dispatch.lock());
    }

    fn run(&self, interval: Duration, stop: mpsc::Receiver<()>) {
        loop {
            let started = Instant::now();
            // failures are logged and reported to the error hook
            let _ = self.poll_cycle();

            let elapsed = started.elapsed();
            let wait = match interval.checked_sub(elapsed) {
                Some(wait) => wait,
                None => {
                    tracing::warn!(
                        elapsed_ms = elapsed.as_millis() as u64,
                        interval_ms = interval.as_millis() as u64,
                        "Poll cycle overran its interval"
                    );
                    Duration::ZERO
                }
            };

            match stop.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }
}

struct Worker {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Polls watched devices and reports changes.
///
/// The monitor is idle until [`Monitor::start`] spawns its polling thread,
/// and idle again after [`Monitor::stop`]. Devices may be added and removed
/// in either state, from any thread. Dropping the monitor stops it.
pub struct Monitor {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl Monitor {
    /// Creates an idle monitor polling through `reader`.
    ///
    /// The reader is shared, not owned: the same [`Client`] can serve
    /// direct calls and several monitors.
    pub fn new<R>(reader: Arc<R>) -> Self
    where
        R: DeviceReader + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                reader,
                registry: Mutex::new(Registry::default()),
                dispatch: ReentrantMutex::new(()),
                cycle: Mutex::new(()),
                on_error: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Watches one device.
    ///
    /// The first value read only sets the baseline. Adding the same
    /// address twice watches it twice, each with its own callback.
    ///
    /// # Errors
    ///
    /// Returns `McError::AddressOutOfRange` if `number` does not fit the
    /// address field. Nothing is registered in that case.
    pub fn add_device<F>(&self, device: DeviceType, number: u32, callback: F) -> Result<()>
    where
        F: Fn(DeviceType, u32, i32, i32) + Send + Sync + 'static,
    {
        let address = DeviceAddress::new(device, number)?;
        self.shared.registry.lock().insert(address, Arc::new(callback));
        Ok(())
    }

    /// Watches `count` consecutive devices with one shared callback.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a zero count or a range past the
    /// address field. Nothing is registered in that case.
    pub fn add_devices<F>(
        &self,
        device: DeviceType,
        start: u32,
        count: usize,
        callback: F,
    ) -> Result<()>
    where
        F: Fn(DeviceType, u32, i32, i32) + Send + Sync + 'static,
    {
        check_range(device, start, count)?;
        let callback: WatchCallback = Arc::new(callback);
        let mut registry = self.shared.registry.lock();
        for offset in 0..count as u32 {
            let address = DeviceAddress {
                device,
                number: start + offset,
            };
            registry.insert(address, Arc::clone(&callback));
        }
        Ok(())
    }

    /// Stops watching a device and returns how many entries were removed.
    ///
    /// When this returns, no callback for the device is running on another
    /// thread and none will fire later.
    pub fn remove_device(&self, device: DeviceType, number: u32) -> usize {
        self.remove_where(|address| address.device == device && address.number == number)
    }

    /// Stops watching `count` consecutive devices.
    pub fn remove_devices(&self, device: DeviceType, start: u32, count: usize) -> usize {
        let end = u64::from(start) + count as u64;
        self.remove_where(|address| {
            address.device == device
                && address.number >= start
                && u64::from(address.number) < end
        })
    }

    /// Stops watching every device.
    pub fn clear(&self) -> usize {
        self.remove_where(|_| true)
    }

    fn remove_where(&self, matches: impl Fn(&DeviceAddress) -> bool) -> usize {
        let removed = {
            let mut registry = self.shared.registry.lock();
            let before = registry.entries.len();
            registry.entries.retain(|entry| !matches(&entry.address));
            before - registry.entries.len()
        };
        if removed > 0 {
            self.shared.barrier();
        }
        removed
    }

    /// Number of watch entries.
    pub fn len(&self) -> usize {
        self.shared.registry.lock().entries.len()
    }

    /// Returns `true` if nothing is watched.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sets a hook called once per abandoned cycle.
    ///
    /// The hook receives the device type and start number of the read that
    /// failed, then the error. A panicking hook is logged and the loop keeps
    /// running.
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(DeviceType, u32, &McError) + Send + Sync + 'static,
    {
        *self.shared.on_error.lock() = Some(Arc::new(callback));
    }

    /// Runs one poll cycle on the calling thread.
    ///
    /// Returns the number of callbacks fired. Must not be called from a
    /// watch callback.
    ///
    /// # Errors
    ///
    /// Returns the read error that abandoned the cycle. Callbacks for runs
    /// read before the failure have already fired.
    pub fn poll(&self) -> Result<usize> {
        self.shared.poll_cycle()
    }

    /// Starts polling every `interval` on a background thread.
    ///
    /// A cycle that takes longer than `interval` is logged and the next
    /// cycle starts immediately.
    ///
    /// # Errors
    ///
    /// Returns `McError::MonitorRunning` if already running,
    /// `McError::InvalidParameter` for a zero interval, or an I/O error if
    /// the thread cannot be spawned.
    pub fn start(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(McError::invalid_parameter(
                "interval",
                "must be greater than zero",
            ));
        }

        let mut worker = self.worker.lock();
        if let Some(current) = worker.as_ref() {
            if !current.handle.is_finished() {
                return Err(McError::MonitorRunning);
            }
        }
        if let Some(finished) = worker.take() {
            let _ = finished.handle.join();
        }

        let (stop, stop_rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("mc-monitor".to_string())
            .spawn(move || shared.run(interval, stop_rx))?;
        *worker = Some(Worker { stop, handle });

        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            devices = self.len(),
            "Monitor started"
        );
        Ok(())
    }

    /// Stops polling.
    ///
    /// Waits for the in-flight cycle to finish. Called from a watch
    /// callback, it signals the loop and returns without waiting. Stopping
    /// an idle monitor is a no-op.
    pub fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        let _ = worker.stop.send(());

        if worker.handle.thread().id() == thread::current().id() {
            tracing::info!("Monitor stopping");
            return;
        }
        if worker.handle.join().is_err() {
            tracing::warn!("Monitor thread panicked");
        }
        tracing::info!("Monitor stopped");
    }

    /// Returns `true` while the polling thread is running.
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("devices", &self.len())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::MAX_WORD_POINTS;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Event = (DeviceType, u32, i32, i32);

    #[derive(Default)]
    struct ScriptedReader {
        values: Mutex<HashMap<(DeviceType, u32), i32>>,
        calls: Mutex<Vec<(DeviceType, u32, usize)>>,
        failing: Mutex<Option<DeviceType>>,
        fail_all: Mutex<bool>,
    }

    impl ScriptedReader {
        fn set(&self, device: DeviceType, number: u32, value: i32) {
            self.values.lock().insert((device, number), value);
        }

        fn calls(&self) -> Vec<(DeviceType, u32, usize)> {
            self.calls.lock().clone()
        }
    }

    impl DeviceReader for ScriptedReader {
        fn read_devices(&self, device: DeviceType, start: u32, count: usize) -> Result<Vec<i32>> {
            self.calls.lock().push((device, start, count));
            if *self.fail_all.lock() || *self.failing.lock() == Some(device) {
                return Err(McError::Timeout);
            }
            let values = self.values.lock();
            Ok((start..start + count as u32)
                .map(|number| values.get(&(device, number)).copied().unwrap_or(0))
                .collect())
        }
    }

    fn setup() -> (Arc<ScriptedReader>, Monitor, Arc<Mutex<Vec<Event>>>) {
        let reader = Arc::new(ScriptedReader::default());
        let monitor = Monitor::new(Arc::clone(&reader));
        (reader, monitor, Arc::new(Mutex::new(Vec::new())))
    }

    fn recorder(
        events: &Arc<Mutex<Vec<Event>>>,
    ) -> impl Fn(DeviceType, u32, i32, i32) + Send + Sync + 'static {
        let events = Arc::clone(events);
        move |device, number, old, new| events.lock().push((device, number, old, new))
    }

    #[test]
    fn test_baseline_then_single_change() {
        let (reader, monitor, events) = setup();
        reader.set(DeviceType::D, 100, 7);
        monitor.add_device(DeviceType::D, 100, recorder(&events)).unwrap();

        assert_eq!(monitor.poll().unwrap(), 0);
        assert_eq!(monitor.poll().unwrap(), 0);
        reader.set(DeviceType::D, 100, 8);
        assert_eq!(monitor.poll().unwrap(), 1);
        assert_eq!(monitor.poll().unwrap(), 0);

        assert_eq!(*events.lock(), vec![(DeviceType::D, 100, 7, 8)]);
    }

    #[test]
    fn test_baseline_zero_fires_nothing() {
        let (_reader, monitor, events) = setup();
        monitor.add_device(DeviceType::M, 0, recorder(&events)).unwrap();
        monitor.poll().unwrap();
        assert!(events.lock().is_empty());
    }

    #[test]
    fn test_contiguous_entries_read_once() {
        let (reader, monitor, events) = setup();
        for number in [102, 100, 104, 101, 103] {
            monitor.add_device(DeviceType::D, number, recorder(&events)).unwrap();
        }
        monitor.poll().unwrap();
        monitor.poll().unwrap();
        assert_eq!(
            reader.calls(),
            vec![(DeviceType::D, 100, 5), (DeviceType::D, 100, 5)]
        );

        let (reader, monitor, events) = setup();
        monitor.add_devices(DeviceType::D, 100, 5, recorder(&events)).unwrap();
        monitor.poll().unwrap();
        assert_eq!(reader.calls(), vec![(DeviceType::D, 100, 5)]);
    }

    #[test]
    fn test_runs_grouped_by_type_in_registration_order() {
        let (reader, monitor, events) = setup();
        monitor.add_device(DeviceType::M, 1, recorder(&events)).unwrap();
        monitor.add_device(DeviceType::D, 102, recorder(&events)).unwrap();
        monitor.add_device(DeviceType::M, 0, recorder(&events)).unwrap();
        monitor.add_device(DeviceType::D, 100, recorder(&events)).unwrap();
        monitor.poll().unwrap();
        assert_eq!(
            reader.calls(),
            vec![
                (DeviceType::M, 0, 2),
                (DeviceType::D, 100, 1),
                (DeviceType::D, 102, 1),
            ]
        );
    }

    #[test]
    fn test_runs_capped_at_request_limit() {
        let (reader, monitor, events) = setup();
        monitor
            .add_devices(DeviceType::D, 0, MAX_WORD_POINTS + 1, recorder(&events))
            .unwrap();
        monitor.poll().unwrap();
        assert_eq!(
            reader.calls(),
            vec![
                (DeviceType::D, 0, MAX_WORD_POINTS),
                (DeviceType::D, MAX_WORD_POINTS as u32, 1),
            ]
        );
    }

    #[test]
    fn test_callback_order() {
        let (reader, monitor, events) = setup();
        monitor.add_device(DeviceType::D, 102, recorder(&events)).unwrap();
        monitor.add_device(DeviceType::M, 5, recorder(&events)).unwrap();
        monitor.add_device(DeviceType::D, 100, recorder(&events)).unwrap();
        monitor.poll().unwrap();

        reader.set(DeviceType::D, 100, 1);
        reader.set(DeviceType::D, 102, 2);
        reader.set(DeviceType::M, 5, 1);
        assert_eq!(monitor.poll().unwrap(), 3);
        assert_eq!(
            *events.lock(),
            vec![
                (DeviceType::D, 100, 0, 1),
                (DeviceType::D, 102, 0, 2),
                (DeviceType::M, 5, 0, 1),
            ]
        );
    }

    #[test]
    fn test_duplicate_registrations_both_fire() {
        let (reader, monitor, events) = setup();
        monitor.add_device(DeviceType::W, 0, recorder(&events)).unwrap();
        monitor.add_device(DeviceType::W, 0, recorder(&events)).unwrap();
        monitor.poll().unwrap();
        reader.set(DeviceType::W, 0, -5);
        assert_eq!(monitor.poll().unwrap(), 2);
        assert_eq!(reader.calls(), vec![(DeviceType::W, 0, 1), (DeviceType::W, 0, 1)]);
        assert_eq!(monitor.remove_device(DeviceType::W, 0), 2);
        assert!(monitor.is_empty());
    }

    #[test]
    fn test_failed_read_keeps_last_value() {
        let (reader, monitor, events) = setup();
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&errors);
        monitor.on_error(move |device, start, err| {
            assert_eq!((device, start), (DeviceType::D, 0));
            assert!(err.is_transport());
            seen.fetch_add(1, Ordering::SeqCst);
        });

        reader.set(DeviceType::D, 0, 1);
        monitor.add_device(DeviceType::D, 0, recorder(&events)).unwrap();
        monitor.poll().unwrap();

        *reader.fail_all.lock() = true;
        reader.set(DeviceType::D, 0, 2);
        assert!(monitor.poll().unwrap_err().is_transport());
        assert!(monitor.poll().is_err());
        assert_eq!(errors.load(Ordering::SeqCst), 2);

        *reader.fail_all.lock() = false;
        assert_eq!(monitor.poll().unwrap(), 1);
        assert_eq!(*events.lock(), vec![(DeviceType::D, 0, 1, 2)]);
    }

    #[test]
    fn test_failure_abandons_rest_of_cycle() {
        let (reader, monitor, events) = setup();
        monitor.add_device(DeviceType::D, 0, recorder(&events)).unwrap();
        monitor.add_device(DeviceType::M, 0, recorder(&events)).unwrap();
        monitor.poll().unwrap();

        reader.set(DeviceType::D, 0, 10);
        reader.set(DeviceType::M, 0, 1);
        *reader.failing.lock() = Some(DeviceType::M);
        assert!(monitor.poll().is_err());
        assert_eq!(*events.lock(), vec![(DeviceType::D, 0, 0, 10)]);

        *reader.failing.lock() = None;
        assert_eq!(monitor.poll().unwrap(), 1);
        assert_eq!(events.lock().last(), Some(&(DeviceType::M, 0, 0, 1)));
    }

    #[test]
    fn test_removed_device_fires_nothing() {
        let (reader, monitor, events) = setup();
        monitor.add_devices(DeviceType::D, 0, 3, recorder(&events)).unwrap();
        monitor.poll().unwrap();

        assert_eq!(monitor.remove_device(DeviceType::D, 1), 1);
        assert_eq!(monitor.remove_device(DeviceType::D, 1), 0);
        reader.set(DeviceType::D, 0, 1);
        reader.set(DeviceType::D, 1, 1);
        reader.set(DeviceType::D, 2, 1);
        assert_eq!(monitor.poll().unwrap(), 2);
        assert_eq!(
            *events.lock(),
            vec![(DeviceType::D, 0, 0, 1), (DeviceType::D, 2, 0, 1)]
        );
    }

    #[test]
    fn test_removal_from_callback_suppresses_pending_event() {
        let (reader, monitor, events) = setup();
        let monitor = Arc::new(monitor);

        let weak = Arc::downgrade(&monitor);
        let record = recorder(&events);
        monitor
            .add_device(DeviceType::D, 0, move |device, number, old, new| {
                record(device, number, old, new);
                if let Some(monitor) = weak.upgrade() {
                    monitor.remove_device(DeviceType::D, 1);
                }
            })
            .unwrap();
        monitor.add_device(DeviceType::D, 1, recorder(&events)).unwrap();
        monitor.poll().unwrap();

        reader.set(DeviceType::D, 0, 1);
        reader.set(DeviceType::D, 1, 1);
        assert_eq!(monitor.poll().unwrap(), 1);
        assert_eq!(*events.lock(), vec![(DeviceType::D, 0, 0, 1)]);
        assert_eq!(monitor.len(), 1);
    }

    #[test]
    fn test_removal_waits_for_dispatch_on_other_thread() {
        let (reader, monitor, events) = setup();
        let monitor = Arc::new(monitor);
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let entered_tx = Mutex::new(entered_tx);
        let release_rx = Mutex::new(release_rx);

        monitor
            .add_device(DeviceType::D, 0, move |_, _, _, _| {
                let _ = entered_tx.lock().send(());
                let _ = release_rx.lock().recv_timeout(Duration::from_secs(5));
            })
            .unwrap();
        monitor.add_device(DeviceType::D, 1, recorder(&events)).unwrap();
        monitor.poll().unwrap();

        reader.set(DeviceType::D, 0, 1);
        reader.set(DeviceType::D, 1, 1);
        let poller = {
            let monitor = Arc::clone(&monitor);
            thread::spawn(move || monitor.poll())
        };
        entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        let removed = Arc::new(AtomicUsize::new(usize::MAX));
        let remover = {
            let monitor = Arc::clone(&monitor);
            let removed = Arc::clone(&removed);
            thread::spawn(move || {
                removed.store(monitor.remove_device(DeviceType::D, 1), Ordering::SeqCst)
            })
        };

        // entry is gone from the registry but removal has not returned
        let deadline = Instant::now() + Duration::from_secs(2);
        while monitor.len() != 1 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(monitor.len(), 1);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(removed.load(Ordering::SeqCst), usize::MAX);

        release_tx.send(()).unwrap();
        remover.join().unwrap();
        assert_eq!(removed.load(Ordering::SeqCst), 1);
        assert_eq!(poller.join().unwrap().unwrap(), 1);
        assert!(events.lock().is_empty());

        reader.set(DeviceType::D, 1, 2);
        monitor.poll().unwrap();
        assert!(events.lock().is_empty());
    }

    #[test]
    fn test_remove_devices_and_clear() {
        let (_reader, monitor, events) = setup();
        monitor.add_devices(DeviceType::X, 0, 16, recorder(&events)).unwrap();
        monitor.add_device(DeviceType::Y, 0, recorder(&events)).unwrap();
        assert_eq!(monitor.len(), 17);
        assert_eq!(monitor.remove_devices(DeviceType::X, 4, 8), 8);
        assert_eq!(monitor.len(), 9);
        assert_eq!(monitor.clear(), 9);
        assert!(monitor.is_empty());
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let (reader, monitor, events) = setup();
        monitor
            .add_device(DeviceType::D, 0, |_, _, _, _| panic!("callback failure"))
            .unwrap();
        monitor.add_device(DeviceType::D, 1, recorder(&events)).unwrap();
        monitor.poll().unwrap();

        reader.set(DeviceType::D, 0, 1);
        reader.set(DeviceType::D, 1, 1);
        assert_eq!(monitor.poll().unwrap(), 2);
        assert_eq!(*events.lock(), vec![(DeviceType::D, 1, 0, 1)]);
    }

    #[test]
    fn test_add_rejects_bad_ranges() {
        let (_reader, monitor, events) = setup();
        let err = monitor
            .add_device(DeviceType::D, 0x0100_0000, recorder(&events))
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(monitor.add_devices(DeviceType::D, 0, 0, recorder(&events)).is_err());
        assert!(monitor
            .add_devices(DeviceType::D, 0x00FF_FFFF, 2, recorder(&events))
            .is_err());
        assert!(monitor.is_empty());
    }

    #[test]
    fn test_start_and_stop() {
        let (reader, monitor, _events) = setup();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        monitor
            .add_device(DeviceType::D, 0, move |device, number, old, new| {
                let _ = tx.lock().send((device, number, old, new));
            })
            .unwrap();

        assert!(monitor.start(Duration::ZERO).unwrap_err().is_configuration());
        monitor.start(Duration::from_millis(10)).unwrap();
        assert!(monitor.is_running());
        assert!(matches!(
            monitor.start(Duration::from_millis(10)),
            Err(McError::MonitorRunning)
        ));

        let deadline = Instant::now() + Duration::from_secs(2);
        while reader.calls().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        reader.set(DeviceType::D, 0, 42);
        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event, (DeviceType::D, 0, 0, 42));

        monitor.stop();
        assert!(!monitor.is_running());
        let calls = reader.calls().len();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(reader.calls().len(), calls);

        // idle stop is a no-op, and the monitor can be restarted
        monitor.stop();
        monitor.start(Duration::from_millis(10)).unwrap();
        monitor.stop();
    }

    #[test]
    fn test_loop_survives_failures() {
        let (reader, monitor, _events) = setup();
        monitor.add_device(DeviceType::D, 0, |_, _, _, _| {}).unwrap();
        *reader.fail_all.lock() = true;
        monitor.start(Duration::from_millis(5)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while reader.calls().len() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(reader.calls().len() >= 3);
        assert!(monitor.is_running());
        monitor.stop();
    }

    #[test]
    fn test_error_hook_receives_failing_run() {
        let (reader, monitor, events) = setup();
        let failures = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&failures);
        monitor.on_error(move |device, start, err| {
            seen.lock().push((device, start, err.is_transport()));
        });
        monitor.add_device(DeviceType::D, 0, recorder(&events)).unwrap();
        monitor.add_devices(DeviceType::M, 8, 4, recorder(&events)).unwrap();

        *reader.failing.lock() = Some(DeviceType::M);
        assert!(monitor.poll().is_err());
        assert_eq!(*failures.lock(), vec![(DeviceType::M, 8, true)]);
    }

    #[test]
    fn test_panicking_error_hook_is_contained() {
        let (reader, monitor, _events) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        monitor.on_error(move |_, _, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            panic!("hook failure");
        });
        monitor.add_device(DeviceType::D, 0, |_, _, _, _| {}).unwrap();
        *reader.fail_all.lock() = true;

        assert!(monitor.poll().unwrap_err().is_transport());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        monitor.start(Duration::from_millis(5)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while calls.load(Ordering::SeqCst) < 4 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(calls.load(Ordering::SeqCst) >= 4);
        assert!(monitor.is_running());
        monitor.stop();
    }

    #[test]
    fn test_plan_reads_gaps() {
        let callback: WatchCallback = Arc::new(|_, _, _, _| {});
        let entries: Vec<WatchEntry> = [5, 1, 2, 3, 7, 2]
            .iter()
            .enumerate()
            .map(|(id, number)| WatchEntry {
                id: id as u64,
                address: DeviceAddress {
                    device: DeviceType::D,
                    number: *number,
                },
                last: None,
                callback: Arc::clone(&callback),
            })
            .collect();
        let plan = plan_reads(&entries);
        assert_eq!(
            plan,
            vec![
                ReadRun { device: DeviceType::D, start: 1, count: 3 },
                ReadRun { device: DeviceType::D, start: 5, count: 1 },
                ReadRun { device: DeviceType::D, start: 7, count: 1 },
            ]
        );
    }
}
