use std::{
    fs::{self, File},
    io::{self, Error as IoError, ErrorKind, Write},
    net::TcpListener,
    path::Path,
    process::{Command, Stdio},
    time::Duration,
};

use nix::{
    sys::{
        signal::{kill, Signal},
        wait::{waitpid, WaitPidFlag},
    },
    unistd::Pid,
};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};

use crate::{
    aggregator::{client::Client, AggregatorConfig},
    errors::{Error, Result},
};

pub const DEFAULT_START_RETRIES: usize = 3;
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_READINESS_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Records the aggregator process this tool started.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct RunFile {
    pub pid: i32,
    pub api_port: u16,
    pub config_path: String,
}

impl RunFile {
    pub fn sync(&self, file_path: &str) -> io::Result<()> {
        log::info!("syncing run file to '{}'", file_path);
        let path = Path::new(file_path);
        if let Some(parent_dir) = path.parent() {
            if !parent_dir.as_os_str().is_empty() {
                fs::create_dir_all(parent_dir)?;
            }
        }
        let d = serde_json::to_vec(self).map_err(|e| {
            IoError::new(
                ErrorKind::Other,
                format!("failed to serialize run file {}", e),
            )
        })?;
        let mut f = File::create(file_path)?;
        f.write_all(&d)?;
        Ok(())
    }

    /// Returns None when no run file was written yet.
    pub fn load(file_path: &str) -> io::Result<Option<Self>> {
        if !Path::new(file_path).exists() {
            return Ok(None);
        }
        let f = File::open(file_path).map_err(|e| {
            IoError::new(
                ErrorKind::Other,
                format!("failed to open {} ({})", file_path, e),
            )
        })?;
        let rf = serde_json::from_reader(f)
            .map_err(|e| IoError::new(ErrorKind::InvalidInput, format!("invalid JSON: {}", e)))?;
        Ok(Some(rf))
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub start_retries: usize,
    pub readiness_timeout: Duration,
    pub readiness_poll_interval: Duration,
    pub stop_timeout: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            start_retries: DEFAULT_START_RETRIES,
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            readiness_poll_interval: DEFAULT_READINESS_POLL_INTERVAL,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

/// A ready aggregator and the client to talk to it.
#[derive(Debug, Clone)]
pub struct Handle {
    pub pid: i32,
    pub endpoint: String,
    pub client: Client,
}

/// Starts, probes and stops a local signature-aggregator process.
#[derive(Debug, Clone)]
pub struct Supervisor {
    pub bin_path: String,
    pub config: AggregatorConfig,
    pub config_path: String,
    pub run_file_path: String,
    pub log_path: Option<String>,
    pub opts: SupervisorOptions,
}

impl Supervisor {
    pub fn new(
        bin_path: &str,
        config: AggregatorConfig,
        config_path: &str,
        run_file_path: &str,
    ) -> Self {
        Self {
            bin_path: bin_path.to_string(),
            config,
            config_path: config_path.to_string(),
            run_file_path: run_file_path.to_string(),
            log_path: None,
            opts: SupervisorOptions::default(),
        }
    }

    pub fn with_options(mut self, opts: SupervisorOptions) -> Self {
        self.opts = opts;
        self
    }

    pub fn with_log_path(mut self, log_path: &str) -> Self {
        self.log_path = Some(log_path.to_string());
        self
    }

    /// Starts the aggregator unless the one recorded in the run file already
    /// serves this exact config on the configured port. A recorded process
    /// with another config is stopped first. A port held by anything else
    /// is an error.
    pub async fn start(&self) -> Result<Handle> {
        let client = Client::new(&self.config.endpoint())?;

        if let Some(rf) = RunFile::load(&self.run_file_path)? {
            if rf.api_port == self.config.api_port
                && self.serves_config(&rf)
                && is_alive(rf.pid)
                && runs_aggregator(rf.pid, &self.bin_path, &rf.config_path)
                && client.is_ready().await
            {
                log::info!(
                    "reusing signature aggregator (pid {}) on port {}",
                    rf.pid,
                    rf.api_port
                );
                return Ok(Handle {
                    pid: rf.pid,
                    endpoint: self.config.endpoint(),
                    client,
                });
            }
            log::info!(
                "recorded signature aggregator (pid {}) does not serve the requested config",
                rf.pid
            );
            self.stop().await?;
        }

        self.config.sync(&self.config_path)?;

        let mut last_err = String::new();
        for attempt in 1..=self.opts.start_retries {
            log::info!(
                "starting signature aggregator (attempt {}/{})",
                attempt,
                self.opts.start_retries
            );

            if port_in_use(self.config.api_port) {
                return Err(Error::Aggregator(format!(
                    "port {} is in use by another process",
                    self.config.api_port
                )));
            }

            let pid = match self.spawn() {
                Ok(pid) => pid,
                Err(e) => {
                    log::warn!("failed to spawn {} ({})", self.bin_path, e);
                    last_err = format!("failed to spawn {} ({})", self.bin_path, e);
                    sleep(self.opts.readiness_poll_interval).await;
                    continue;
                }
            };
            RunFile {
                pid,
                api_port: self.config.api_port,
                config_path: self.config_path.clone(),
            }
            .sync(&self.run_file_path)?;

            if self.wait_ready(&client, pid).await {
                log::info!(
                    "signature aggregator (pid {}) ready at {}",
                    pid,
                    self.config.endpoint()
                );
                return Ok(Handle {
                    pid,
                    endpoint: self.config.endpoint(),
                    client,
                });
            }

            last_err = format!(
                "signature aggregator (pid {}) not ready after {:?}",
                pid, self.opts.readiness_timeout
            );
            log::warn!("{}", last_err);
            self.stop().await?;
        }

        Err(Error::Aggregator(format!(
            "failed to start signature aggregator after {} attempts ({})",
            self.opts.start_retries, last_err
        )))
    }

    /// Whether the config the recorded process was started with is the
    /// one requested now (same subnets, peers and endpoints).
    fn serves_config(&self, rf: &RunFile) -> bool {
        match AggregatorConfig::load(&rf.config_path) {
            Ok(running) => running == self.config,
            Err(e) => {
                log::warn!("failed to load running config '{}' ({})", rf.config_path, e);
                false
            }
        }
    }

    pub async fn is_ready(&self) -> Result<bool> {
        let client = Client::new(&self.config.endpoint())?;
        Ok(client.is_ready().await)
    }

    /// Sends SIGTERM to the recorded process, escalating to SIGKILL when it
    /// does not exit in time, then removes the run file. A recorded pid that
    /// is no longer this aggregator is left alone.
    pub async fn stop(&self) -> Result<()> {
        let rf = match RunFile::load(&self.run_file_path)? {
            Some(rf) => rf,
            None => return Ok(()),
        };

        if !is_alive(rf.pid) {
            log::info!("recorded signature aggregator (pid {}) already exited", rf.pid);
        } else if !runs_aggregator(rf.pid, &self.bin_path, &rf.config_path) {
            log::warn!(
                "pid {} is not '{} --config-file {}', not signaling it",
                rf.pid,
                self.bin_path,
                rf.config_path
            );
        } else {
            log::info!("stopping signature aggregator (pid {})", rf.pid);
            let pid = Pid::from_raw(rf.pid);
            if let Err(e) = kill(pid, Signal::SIGTERM) {
                log::warn!("failed to terminate pid {} ({})", rf.pid, e);
            }

            let deadline = Instant::now() + self.opts.stop_timeout;
            while is_alive(rf.pid) && Instant::now() < deadline {
                sleep(Duration::from_millis(100)).await;
            }
            if is_alive(rf.pid) {
                log::warn!("pid {} did not exit, sending SIGKILL", rf.pid);
                kill(pid, Signal::SIGKILL).map_err(|e| {
                    Error::Aggregator(format!("failed to kill pid {} ({})", rf.pid, e))
                })?;
                let deadline = Instant::now() + Duration::from_secs(1);
                while is_alive(rf.pid) && Instant::now() < deadline {
                    sleep(Duration::from_millis(50)).await;
                }
                if is_alive(rf.pid) {
                    return Err(Error::Aggregator(format!(
                        "pid {} still running after SIGKILL",
                        rf.pid
                    )));
                }
            }
        }

        fs::remove_file(&self.run_file_path)?;
        Ok(())
    }

    fn spawn(&self) -> io::Result<i32> {
        let mut cmd = Command::new(&self.bin_path);
        cmd.arg("--config-file").arg(&self.config_path);
        match &self.log_path {
            Some(log_path) => {
                let f = File::create(log_path)?;
                let f2 = f.try_clone()?;
                cmd.stdout(Stdio::from(f)).stderr(Stdio::from(f2));
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }
        let child = cmd.spawn()?;
        let pid = i32::try_from(child.id())
            .map_err(|e| IoError::new(ErrorKind::Other, format!("invalid pid ({})", e)))?;
        log::info!("spawned {} (pid {})", self.bin_path, pid);
        Ok(pid)
    }

    async fn wait_ready(&self, client: &Client, pid: i32) -> bool {
        let deadline = Instant::now() + self.opts.readiness_timeout;
        loop {
            if !is_alive(pid) {
                log::warn!("signature aggregator (pid {}) exited", pid);
                return false;
            }
            if client.is_ready().await {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(self.opts.readiness_poll_interval).await;
        }
    }
}

/// Reaps the process first if it is an exited child of ours.
fn is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    let target = Pid::from_raw(pid);
    let _ = waitpid(target, Some(WaitPidFlag::WNOHANG));
    kill(target, None).is_ok()
}

/// Whether `pid` runs `bin_path` (directly or as a script argument) with
/// `--config-file config_path`. Reads /proc, so always false elsewhere.
fn runs_aggregator(pid: i32, bin_path: &str, config_path: &str) -> bool {
    let raw = match fs::read(format!("/proc/{}/cmdline", pid)) {
        Ok(raw) => raw,
        Err(_) => return false,
    };
    let args: Vec<String> = raw
        .split(|b| *b == 0)
        .filter(|a| !a.is_empty())
        .map(|a| String::from_utf8_lossy(a).into_owned())
        .collect();

    let bin_name = match Path::new(bin_path).file_name() {
        Some(name) => name,
        None => return false,
    };
    let runs_bin = args
        .iter()
        .any(|a| Path::new(a).file_name() == Some(bin_name));
    let uses_config = args
        .windows(2)
        .any(|w| w[0] == "--config-file" && w[1] == config_path);
    runs_bin && uses_config
}

fn port_in_use(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_err()
}
