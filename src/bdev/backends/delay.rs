//! Delay vbdev: injects an artificial latency in front of a base bdev,
//! picking the 99th-percentile latency with 1% probability and the
//! average latency otherwise (spec §4.D "delay backend").
//!
//! Four FIFOs (avg-read, p99-read, avg-write, p99-write) hold queued
//! I/O ordered by the tick it becomes eligible to run, which is also
//! enqueue order within a single bucket since every entry in a bucket
//! shares the same latency. [`DelayBdev::poll`] is the per-channel
//! poller named in the spec; a caller wires it to a reactor poller or,
//! in tests, calls it directly.

use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use snafu::Snafu;

use crate::bdev::{Bdev, BdevIo, BdevOps, IoType, SubmitError};

#[derive(Debug, Snafu)]
pub enum DelayError {
    #[snafu(display("p99 latency ({:?}) must be >= average latency ({:?})", p99, avg))]
    P99BelowAverage { avg: Duration, p99: Duration },
}

enum LatencySource {
    /// Reproducible for tests (spec §9 open question: "reproducible tests
    /// should inject a seed").
    Seeded(Mutex<StdRng>),
    Thread,
}

impl LatencySource {
    fn hits_p99(&self) -> bool {
        match self {
            LatencySource::Seeded(rng) => rng.lock().gen_ratio(1, 100),
            LatencySource::Thread => rand::thread_rng().gen_ratio(1, 100),
        }
    }
}

const READ_AVG: usize = 0;
const READ_P99: usize = 1;
const WRITE_AVG: usize = 2;
const WRITE_P99: usize = 3;

#[derive(Debug, Clone, Copy)]
struct Latencies {
    avg_read: Duration,
    p99_read: Duration,
    avg_write: Duration,
    p99_write: Duration,
}

fn check_latencies(l: &Latencies) -> Result<(), DelayError> {
    if l.p99_read < l.avg_read {
        return P99BelowAverage {
            avg: l.avg_read,
            p99: l.p99_read,
        }
        .fail();
    }
    if l.p99_write < l.avg_write {
        return P99BelowAverage {
            avg: l.avg_write,
            p99: l.p99_write,
        }
        .fail();
    }
    Ok(())
}

pub struct DelayBdev {
    base: Arc<Bdev>,
    latencies: Mutex<Latencies>,
    source: LatencySource,
    queues: Mutex<[VecDeque<(Instant, BdevIo)>; 4]>,
}

impl DelayBdev {
    pub fn new(
        base: Arc<Bdev>,
        avg_read: Duration,
        p99_read: Duration,
        avg_write: Duration,
        p99_write: Duration,
    ) -> Result<Self, DelayError> {
        let latencies = Latencies {
            avg_read,
            p99_read,
            avg_write,
            p99_write,
        };
        check_latencies(&latencies)?;
        Ok(Self {
            base,
            latencies: Mutex::new(latencies),
            source: LatencySource::Thread,
            queues: Mutex::new([VecDeque::new(), VecDeque::new(), VecDeque::new(), VecDeque::new()]),
        })
    }

    /// Construct with a fixed seed so the 1%-p99 coin flip is
    /// deterministic across test runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.source = LatencySource::Seeded(Mutex::new(StdRng::seed_from_u64(seed)));
        self
    }

    /// `bdev_delay_update_latency` (spec §6): replace the four latencies
    /// in place, rejecting the update if it would violate p99 >= average.
    pub fn update_latency(
        &self,
        avg_read: Duration,
        p99_read: Duration,
        avg_write: Duration,
        p99_write: Duration,
    ) -> Result<(), DelayError> {
        let latencies = Latencies {
            avg_read,
            p99_read,
            avg_write,
            p99_write,
        };
        check_latencies(&latencies)?;
        *self.latencies.lock() = latencies;
        Ok(())
    }

    fn enqueue(&self, avg_idx: usize, p99_idx: usize, avg: Duration, p99: Duration, io: BdevIo) {
        let latency = if self.source.hits_p99() {
            p99
        } else {
            avg
        };
        let deadline = Instant::now() + latency;
        let idx = if latency == p99 && p99 != avg {
            p99_idx
        } else {
            avg_idx
        };
        self.queues.lock()[idx].push_back((deadline, io));
    }

    /// Drain every queue whose head has reached its deadline, submitting
    /// each to the base bdev in tick order.
    pub fn poll(&self) {
        let now = Instant::now();
        let mut ready = Vec::new();
        {
            let mut queues = self.queues.lock();
            for queue in queues.iter_mut() {
                while let Some((deadline, _)) = queue.front() {
                    if *deadline > now {
                        break;
                    }
                    ready.push(queue.pop_front().unwrap().1);
                }
            }
        }
        for io in ready {
            let channel = self.base.get_io_channel(0);
            let _ = self.base.submit(&channel, io);
        }
    }
}

impl BdevOps for DelayBdev {
    fn submit_request(&self, io: BdevIo) -> Result<(), (SubmitError, BdevIo)> {
        let l = *self.latencies.lock();
        match io.io_type {
            IoType::Read => self.enqueue(READ_AVG, READ_P99, l.avg_read, l.p99_read, io),
            IoType::Write => self.enqueue(WRITE_AVG, WRITE_P99, l.avg_write, l.p99_write, io),
            _ => {
                let channel = self.base.get_io_channel(0);
                let _ = self.base.submit(&channel, io);
            }
        }
        Ok(())
    }

    fn io_type_supported(&self, io_type: IoType) -> bool {
        self.base.io_type_supported(io_type)
    }
}

/// Wraps an `Arc<DelayBdev>` so it can be boxed into a [`Bdev`]'s ops slot
/// while a second, process-wide handle stays reachable by name for the
/// `bdev_delay_*` RPC methods (spec §6) to reconfigure or tear down.
struct DelayBdevHandle(Arc<DelayBdev>);

impl BdevOps for DelayBdevHandle {
    fn submit_request(&self, io: BdevIo) -> Result<(), (SubmitError, BdevIo)> {
        self.0.submit_request(io)
    }

    fn io_type_supported(&self, io_type: IoType) -> bool {
        self.0.io_type_supported(io_type)
    }
}

/// Process-wide name-keyed table of live delay devices, mirroring
/// [`super::pmem::pools`]'s singleton pattern.
pub fn devices() -> &'static Mutex<std::collections::HashMap<String, Arc<DelayBdev>>> {
    static DEVICES: once_cell::sync::OnceCell<Mutex<std::collections::HashMap<String, Arc<DelayBdev>>>> =
        once_cell::sync::OnceCell::new();
    DEVICES.get_or_init(|| Mutex::new(std::collections::HashMap::new()))
}

/// `bdev_delay_create` (spec §6): wrap `base_name` with injected latency
/// and register both the bdev and its named delay-device handle.
pub fn bdev_delay_create(
    name: impl Into<String>,
    base: Arc<Bdev>,
    avg_read: Duration,
    p99_read: Duration,
    avg_write: Duration,
    p99_write: Duration,
) -> Result<Arc<Bdev>, DelayError> {
    let name = name.into();
    let block_size = base.block_size;
    let block_count = base.block_count;
    let delay = Arc::new(DelayBdev::new(base, avg_read, p99_read, avg_write, p99_write)?);
    devices().lock().insert(name.clone(), delay.clone());
    let bdev = Bdev::new(name, "delay", block_size, block_count, Box::new(DelayBdevHandle(delay)));
    Ok(crate::bdev::registry::global()
        .lock()
        .register(bdev)
        .expect("delay bdev name already validated unique by its own table"))
}

/// `bdev_delay_delete` (spec §6).
pub fn bdev_delay_delete(name: &str) -> Result<(), crate::bdev::BdevError> {
    devices().lock().remove(name);
    crate::bdev::registry::global().lock().unregister(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bdev::{backends::malloc::MallocBdev, registry},
        core::Iovec,
    };
    use std::time::Duration;

    fn base(name: &str) -> Arc<Bdev> {
        let bdev = Bdev::new(name, "malloc", 512, 256, Box::new(MallocBdev::new(512, 256)));
        registry::global().lock().register(bdev).unwrap()
    }

    #[test]
    fn p99_must_not_be_below_average() {
        let base = base("delay-base-a");
        let result = DelayBdev::new(base, Duration::from_micros(1000), Duration::from_micros(500), Duration::ZERO, Duration::ZERO);
        assert!(matches!(result, Err(DelayError::P99BelowAverage { .. })));
    }

    #[test]
    fn completion_never_earlier_than_average_latency() {
        let base = base("delay-base-b");
        let delay = DelayBdev::new(
            base,
            Duration::from_micros(1000),
            Duration::from_micros(1000),
            Duration::ZERO,
            Duration::ZERO,
        )
        .unwrap()
        .with_seed(1);

        let mut buf = vec![0u8; 512];
        let submitted = Instant::now();
        let completed = Arc::new(Mutex::new(None));
        let completed2 = completed.clone();
        delay
            .submit_request(BdevIo::new(IoType::Read, 0, 1, vec![Iovec::new(buf.as_mut_ptr(), 512)], move |_| {
                *completed2.lock() = Some(Instant::now());
            }))
            .unwrap();

        // poller must be driven until the deadline elapses
        loop {
            delay.poll();
            if completed.lock().is_some() {
                break;
            }
            std::thread::sleep(Duration::from_micros(100));
        }
        let elapsed = completed.lock().unwrap() - submitted;
        assert!(elapsed >= Duration::from_micros(1000));
    }
}
