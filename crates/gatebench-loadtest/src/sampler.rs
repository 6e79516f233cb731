//! Periodic memory sampling of the process listening on a target's port

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gatebench_core::MemorySample;
use parking_lot::Mutex;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Finds the process listening on a local TCP port
pub trait PortResolver: Send + Sync {
    fn resolve(&self, port: u16) -> std::io::Result<Option<u32>>;
}

/// Point-in-time memory figures for a process
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessMemory {
    pub rss_bytes: u64,
    pub vms_bytes: u64,
    pub mem_percent: f64,
}

/// Reads memory usage of a process
pub trait MemoryReader: Send + Sync {
    /// `None` when the process is gone or unreadable
    fn read(&self, pid: u32) -> Option<ProcessMemory>;
}

/// Resolves listeners through `/proc/net/tcp{,6}` and `/proc/<pid>/fd`
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcNetResolver;

#[cfg(target_os = "linux")]
impl PortResolver for ProcNetResolver {
    fn resolve(&self, port: u16) -> std::io::Result<Option<u32>> {
        let mut inodes = Vec::new();
        for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
            match std::fs::read_to_string(table) {
                Ok(contents) => inodes.extend(listening_inodes(&contents, port)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        if inodes.is_empty() {
            return Ok(None);
        }

        let mut pids: Vec<u32> = std::fs::read_dir("/proc")?
            .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
            .collect();
        pids.sort_unstable();

        for pid in pids {
            // Processes owned by other users are unreadable; skip them
            let Ok(fds) = std::fs::read_dir(format!("/proc/{}/fd", pid)) else {
                continue;
            };
            for fd in fds.flatten() {
                let Ok(link) = std::fs::read_link(fd.path()) else {
                    continue;
                };
                let link = link.to_string_lossy();
                if let Some(inode) = link
                    .strip_prefix("socket:[")
                    .and_then(|rest| rest.strip_suffix(']'))
                    .and_then(|inode| inode.parse::<u64>().ok())
                {
                    if inodes.contains(&inode) {
                        return Ok(Some(pid));
                    }
                }
            }
        }
        Ok(None)
    }
}

#[cfg(not(target_os = "linux"))]
impl PortResolver for ProcNetResolver {
    fn resolve(&self, _port: u16) -> std::io::Result<Option<u32>> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "port resolution requires /proc",
        ))
    }
}

/// Socket inodes in LISTEN state bound to `port` in a `/proc/net/tcp` table
fn listening_inodes(table: &str, port: u16) -> Vec<u64> {
    const TCP_LISTEN: &str = "0A";

    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let local = fields.get(1)?;
            let state = fields.get(3)?;
            let inode = fields.get(9)?;
            let (_, hex_port) = local.rsplit_once(':')?;
            let local_port = u16::from_str_radix(hex_port, 16).ok()?;
            (local_port == port && *state == TCP_LISTEN)
                .then(|| inode.parse().ok())
                .flatten()
        })
        .filter(|inode| *inode != 0)
        .collect()
}

/// sysinfo-backed reader
pub struct SysinfoReader {
    system: Mutex<System>,
}

impl SysinfoReader {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoReader {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryReader for SysinfoReader {
    fn read(&self, pid: u32) -> Option<ProcessMemory> {
        let pid = Pid::from_u32(pid);
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.refresh_memory();

        let process = system.process(pid)?;
        let total = system.total_memory();
        let rss_bytes = process.memory();
        let mem_percent = if total > 0 {
            rss_bytes as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        Some(ProcessMemory {
            rss_bytes,
            vms_bytes: process.virtual_memory(),
            mem_percent,
        })
    }
}

/// Samples the memory of whatever process listens on a port until stopped
#[derive(Clone)]
pub struct MemorySampler {
    resolver: Arc<dyn PortResolver>,
    reader: Arc<dyn MemoryReader>,
    interval: Duration,
}

impl MemorySampler {
    pub fn new(resolver: Arc<dyn PortResolver>, reader: Arc<dyn MemoryReader>, interval: Duration) -> Self {
        Self {
            resolver,
            reader,
            interval,
        }
    }

    /// Sampler over `/proc` and sysinfo
    pub fn system(interval: Duration) -> Self {
        Self::new(Arc::new(ProcNetResolver), Arc::new(SysinfoReader::new()), interval)
    }

    /// Start sampling in the background.
    ///
    /// If no process is listening on `port`, a warning is logged and the handle yields no
    /// samples. Ticks whose read fails are skipped.
    pub fn start(&self, port: u16) -> SamplerHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let samples = Arc::new(Mutex::new(Vec::new()));

        let resolver = Arc::clone(&self.resolver);
        let reader = Arc::clone(&self.reader);
        let period = self.interval;
        let collected = Arc::clone(&samples);

        let task = tokio::spawn(async move {
            let start = Instant::now();

            let resolved = tokio::task::spawn_blocking(move || resolver.resolve(port)).await;
            let pid = match resolved {
                Ok(Ok(Some(pid))) => pid,
                Ok(Ok(None)) => {
                    warn!(port, "No process listening on port, skipping memory sampling");
                    return;
                }
                Ok(Err(e)) => {
                    warn!(port, "Could not resolve listening process: {}", e);
                    return;
                }
                Err(e) => {
                    warn!(port, "Port resolution task failed: {}", e);
                    return;
                }
            };
            info!(port, pid, interval_ms = period.as_millis() as u64, "Sampling server memory");

            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let offset = start.elapsed();
                        // sysinfo refreshes read /proc synchronously
                        let reader = Arc::clone(&reader);
                        match tokio::task::spawn_blocking(move || reader.read(pid)).await {
                            Ok(Some(memory)) => collected.lock().push(MemorySample {
                                offset,
                                captured_at: Utc::now(),
                                rss_bytes: memory.rss_bytes,
                                vms_bytes: memory.vms_bytes,
                                mem_percent: memory.mem_percent,
                            }),
                            Ok(None) => debug!(pid, "Memory read failed, skipping sample"),
                            Err(e) => warn!(pid, "Memory read task failed: {}", e),
                        }
                    }
                }
            }
        });

        SamplerHandle {
            stop: Some(stop_tx),
            task,
            samples,
        }
    }
}

/// Running sampler; [`SamplerHandle::stop`] ends it and returns what it collected
pub struct SamplerHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    samples: Arc<Mutex<Vec<MemorySample>>>,
}

impl SamplerHandle {
    /// Signal the sampler and wait for it to exit
    pub async fn stop(mut self) -> Vec<MemorySample> {
        if let Some(stop) = self.stop.take() {
            // The task may have already exited when no process was found
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!("Memory sampler task failed: {}", e);
        }
        std::mem::take(&mut *self.samples.lock())
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        if self.stop.is_some() {
            self.task.abort();
        }
    }
}
