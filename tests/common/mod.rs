//! In-memory hosts behind the `Transport` trait. Each fake host understands
//! the handful of commands the core modules issue and keeps a log of them.

#![allow(dead_code)]

use async_trait::async_trait;
use rustle_converge::config::RunConfig;
use rustle_converge::execution::{TaskGraph, TaskGraphParser};
use rustle_converge::inventory::InventoryProcessor;
use rustle_converge::modules::ModuleRegistry;
use rustle_converge::runtime::ConvergenceExecutor;
use rustle_converge::secrets::StaticSecretsProvider;
use rustle_converge::transport::{CommandOutput, Transport, TransportError};
use rustle_converge::types::{ConnectionTarget, Host};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEBIAN_RELEASE: &str =
    "PRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\nNAME=\"Debian GNU/Linux\"\nVERSION_ID=\"12\"\nID=debian\n";
pub const ROCKY_RELEASE: &str =
    "NAME=\"Rocky Linux\"\nVERSION_ID=\"9.3\"\nID=\"rocky\"\nID_LIKE=\"rhel centos fedora\"\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeUser {
    pub home: String,
    pub shell: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeFile {
    pub content: String,
    pub mode: u32,
    pub owner: String,
}

#[derive(Debug, Clone, Default)]
pub struct FakeHost {
    pub reachable: bool,
    /// Users allowed to open a session
    pub logins: BTreeSet<String>,
    pub os_release: String,
    pub users: BTreeMap<String, FakeUser>,
    pub packages: BTreeMap<String, String>,
    /// Packages dpkg keeps in state `rc` after `apt-get remove`
    pub removed_packages: BTreeMap<String, String>,
    pub files: BTreeMap<String, FakeFile>,
    /// Connection attempts that time out before the host answers
    pub flaky_connections: usize,
    /// Exact command lines that exit 1
    pub failing_commands: BTreeSet<String>,
    /// Commands that changed host state
    pub mutations: usize,
    /// `(user, command)` in issue order
    pub commands: Vec<(String, String)>,
}

impl FakeHost {
    /// Debian host already managed by `user` with passwordless sudo
    pub fn debian(user: &str) -> Self {
        let mut host = Self::bare(DEBIAN_RELEASE);
        host.add_user(user);
        host.logins.insert(user.to_string());
        host.files.insert(
            format!("/etc/sudoers.d/{user}"),
            FakeFile {
                content: format!("{user} ALL=(ALL) NOPASSWD:ALL\n"),
                mode: 0o440,
                owner: "root".to_string(),
            },
        );
        host.packages
            .insert("coreutils".to_string(), "9.1-1".to_string());
        host
    }

    /// Fresh host reachable only as root
    pub fn bare(os_release: &str) -> Self {
        let mut host = Self {
            reachable: true,
            os_release: os_release.to_string(),
            ..Default::default()
        };
        host.users.insert(
            "root".to_string(),
            FakeUser {
                home: "/root".to_string(),
                shell: "/bin/bash".to_string(),
            },
        );
        host.logins.insert("root".to_string());
        host
    }

    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::bare(DEBIAN_RELEASE)
        }
    }

    pub fn add_user(&mut self, name: &str) {
        self.users.insert(
            name.to_string(),
            FakeUser {
                home: format!("/home/{name}"),
                shell: "/bin/bash".to_string(),
            },
        );
    }

    fn mutate(&mut self) -> CommandOutput {
        self.mutations += 1;
        ok("")
    }

    fn execute(&mut self, user: &str, command: &str) -> CommandOutput {
        if self.failing_commands.contains(command) {
            return fail(1, "input/output error");
        }
        let (sudo, argv) = match split_command(command) {
            Some(parsed) => parsed,
            None => return fail(2, "unparseable command"),
        };
        if sudo && user != "root" && !self.files.contains_key(&format!("/etc/sudoers.d/{user}")) {
            return fail(1, "sudo: a password is required");
        }
        let args: Vec<&str> = argv.iter().map(String::as_str).collect();

        match args.as_slice() {
            ["cat", "/etc/os-release"] => ok(&self.os_release),
            ["cat", path] => match self.files.get(*path) {
                Some(file) => ok(&file.content),
                None => fail(1, &format!("cat: {path}: No such file or directory")),
            },
            ["getent", "passwd"] => {
                let lines: Vec<String> = self
                    .users
                    .iter()
                    .enumerate()
                    .map(|(uid, (name, u))| passwd_line(name, uid, u))
                    .collect();
                ok(&(lines.join("\n") + "\n"))
            }
            ["getent", "passwd", name] => {
                match self.users.iter().enumerate().find(|(_, (n, _))| n == name) {
                    Some((uid, (name, u))) => ok(&(passwd_line(name, uid, u) + "\n")),
                    None => fail(2, ""),
                }
            }
            ["dpkg-query", "-W", _] => {
                let installed = self.packages.iter().map(|(n, v)| format!("ii  {n} {v}"));
                let removed = self
                    .removed_packages
                    .iter()
                    .map(|(n, v)| format!("rc  {n} {v}"));
                let lines: Vec<String> = installed.chain(removed).collect();
                ok(&(lines.join("\n") + "\n"))
            }
            ["dpkg-query", "-W", _, name] => {
                match (self.packages.get(*name), self.removed_packages.get(*name)) {
                    (Some(version), _) => ok(&format!("ii  {version}")),
                    (None, Some(version)) => ok(&format!("rc  {version}")),
                    (None, None) => {
                        fail(1, &format!("dpkg-query: no packages found matching {name}"))
                    }
                }
            }
            ["rpm", "-qa", ..] => {
                let lines: Vec<String> = self
                    .packages
                    .iter()
                    .map(|(n, v)| format!("{n} {v}"))
                    .collect();
                ok(&(lines.join("\n") + "\n"))
            }
            ["rpm", "-q", "--qf", _, name] => match self.packages.get(*name) {
                Some(version) => ok(version),
                None => fail(1, &format!("package {name} is not installed")),
            },
            [manager, "install", "-y", spec]
                if matches!(*manager, "apt-get" | "dnf" | "yum") =>
            {
                let (name, version) = match spec.split_once('=') {
                    Some((name, version)) => (name, version),
                    None => (*spec, "1.0-1"),
                };
                self.removed_packages.remove(name);
                self.packages.insert(name.to_string(), version.to_string());
                self.mutate()
            }
            [manager, "remove", "-y", name] if matches!(*manager, "apt-get" | "dnf" | "yum") => {
                if let Some(version) = self.packages.remove(*name) {
                    if *manager == "apt-get" {
                        self.removed_packages.insert(name.to_string(), version);
                    }
                }
                self.mutate()
            }
            ["useradd", rest @ ..] => {
                let Some(name) = rest.last() else {
                    return fail(2, "useradd: missing name");
                };
                if self.users.contains_key(*name) {
                    return fail(9, &format!("useradd: user '{name}' already exists"));
                }
                let shell = rest
                    .windows(2)
                    .find(|w| w[0] == "-s")
                    .map_or("/bin/sh", |w| w[1]);
                self.users.insert(
                    name.to_string(),
                    FakeUser {
                        home: format!("/home/{name}"),
                        shell: shell.to_string(),
                    },
                );
                self.mutate()
            }
            ["usermod", "-s", shell, name] => match self.users.get_mut(*name) {
                Some(user) => {
                    user.shell = shell.to_string();
                    self.mutate()
                }
                None => fail(6, &format!("usermod: user '{name}' does not exist")),
            },
            ["userdel", "-r", name] => match self.users.remove(*name) {
                Some(_) => {
                    self.logins.remove(*name);
                    self.mutate()
                }
                None => fail(6, &format!("userdel: user '{name}' does not exist")),
            },
            ["sha256sum", path] => match self.files.get(*path) {
                Some(file) => ok(&format!(
                    "{:x}  {path}\n",
                    Sha256::digest(file.content.as_bytes())
                )),
                None => fail(1, &format!("sha256sum: {path}: No such file or directory")),
            },
            ["stat", "-c", _, path] => match self.files.get(*path) {
                Some(file) => ok(&format!("{:o} {}\n", file.mode, file.owner)),
                None => fail(1, &format!("stat: cannot statx '{path}'")),
            },
            ["install", "-d", ..] => ok(""),
            ["install", "-m", mode, "-o", owner, staged, dest] => {
                let Some(file) = self.files.remove(*staged) else {
                    return fail(1, &format!("install: cannot stat '{staged}'"));
                };
                let Ok(mode) = u32::from_str_radix(mode, 8) else {
                    return fail(1, &format!("install: invalid mode '{mode}'"));
                };
                if dest.ends_with("/.ssh/authorized_keys") {
                    self.logins.insert(owner.to_string());
                }
                self.files.insert(
                    dest.to_string(),
                    FakeFile {
                        content: file.content,
                        mode,
                        owner: owner.to_string(),
                    },
                );
                self.mutate()
            }
            ["rm", "-f", path] => {
                self.files.remove(*path);
                ok("")
            }
            ["visudo", "-cf", path] => match self.files.get(*path) {
                Some(file) if file.content.contains("NOPASSWD") => ok("parsed OK\n"),
                _ => fail(1, "visudo: syntax error"),
            },
            ["test", "-e", path] => {
                if self.files.contains_key(*path) {
                    ok("")
                } else {
                    fail(1, "")
                }
            }
            ["false", ..] => fail(1, ""),
            ["touch", path] => {
                self.files.insert(
                    path.to_string(),
                    FakeFile {
                        content: String::new(),
                        mode: 0o644,
                        owner: user.to_string(),
                    },
                );
                self.mutate()
            }
            _ => self.mutate(),
        }
    }
}

fn passwd_line(name: &str, uid: usize, user: &FakeUser) -> String {
    let uid = if name == "root" { 0 } else { 1000 + uid };
    format!("{name}:x:{uid}:{uid}::{}:{}", user.home, user.shell)
}

/// Strips `sudo -n` and `env VAR=value` prefixes
fn split_command(command: &str) -> Option<(bool, Vec<String>)> {
    let mut argv = shell_words::split(command).ok()?;
    let sudo = argv.len() >= 2 && argv[0] == "sudo" && argv[1] == "-n";
    if sudo {
        argv.drain(..2);
    }
    if argv.first().is_some_and(|a| a == "env") {
        argv.remove(0);
        while argv.first().is_some_and(|a| a.contains('=')) {
            argv.remove(0);
        }
    }
    Some((sudo, argv))
}

fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

fn fail(exit_code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

#[derive(Default)]
pub struct FakeTransport {
    hosts: Mutex<HashMap<String, FakeHost>>,
    /// Hosts whose worker crashes on first contact
    crashing: BTreeSet<String>,
    /// Cancelled once a command with this prefix has run
    cancel_after: Option<(String, CancellationToken)>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(self, name: &str, host: FakeHost) -> Self {
        self.hosts
            .lock()
            .unwrap()
            .insert(name.to_string(), host);
        self
    }

    pub fn with_crashing_host(mut self, name: &str) -> Self {
        self.crashing.insert(name.to_string());
        self
    }

    pub fn with_cancel_after(mut self, prefix: &str, cancel: CancellationToken) -> Self {
        self.cancel_after = Some((prefix.to_string(), cancel));
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn host(&self, name: &str) -> FakeHost {
        self.hosts.lock().unwrap()[name].clone()
    }

    pub fn total_mutations(&self) -> usize {
        self.hosts.lock().unwrap().values().map(|h| h.mutations).sum()
    }

    /// Highest number of commands that were ever running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn session<T>(
        &self,
        target: &ConnectionTarget,
        action: impl FnOnce(&mut FakeHost) -> T,
    ) -> Result<T, TransportError> {
        let mut hosts = self.hosts.lock().unwrap();
        let host = hosts
            .get_mut(&target.host)
            .ok_or_else(|| TransportError::Unreachable {
                host: target.host.clone(),
                reason: "Could not resolve hostname".to_string(),
            })?;
        if !host.reachable {
            return Err(TransportError::Unreachable {
                host: target.host.clone(),
                reason: "Connection refused".to_string(),
            });
        }
        if host.flaky_connections > 0 {
            host.flaky_connections -= 1;
            return Err(TransportError::Unreachable {
                host: target.host.clone(),
                reason: "Connection timed out".to_string(),
            });
        }
        if !host.logins.contains(&target.identity.user) {
            return Err(TransportError::AuthenticationFailed {
                host: target.host.clone(),
                user: target.identity.user.clone(),
            });
        }
        Ok(action(host))
    }

    async fn simulate_latency(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn run(
        &self,
        target: &ConnectionTarget,
        command: &str,
    ) -> Result<CommandOutput, TransportError> {
        if self.crashing.contains(&target.host) {
            panic!("connection handler for {} crashed", target.host);
        }
        self.simulate_latency().await;
        let user = target.identity.user.clone();
        let output = self.session(target, |host| {
            host.commands.push((user.clone(), command.to_string()));
            host.execute(&user, command)
        });
        if let Some((prefix, cancel)) = &self.cancel_after {
            if command.starts_with(prefix.as_str()) {
                cancel.cancel();
            }
        }
        output
    }

    async fn copy(
        &self,
        target: &ConnectionTarget,
        content: &[u8],
        remote_path: &str,
    ) -> Result<(), TransportError> {
        self.simulate_latency().await;
        let user = target.identity.user.clone();
        self.session(target, |host| {
            host.commands
                .push((user.clone(), format!("copy {remote_path}")));
            host.files.insert(
                remote_path.to_string(),
                FakeFile {
                    content: String::from_utf8_lossy(content).into_owned(),
                    mode: 0o600,
                    owner: user.clone(),
                },
            );
            host.mutations += 1;
        })
    }
}

pub fn hosts(inventory: &str) -> Vec<Arc<Host>> {
    InventoryProcessor::new()
        .load_str(inventory)
        .expect("inventory should load")
        .hosts
}

pub fn graph(playbook: &str) -> Arc<TaskGraph> {
    let registry = ModuleRegistry::with_core_modules();
    Arc::new(
        TaskGraphParser::new(&registry)
            .parse(playbook)
            .expect("playbook should parse"),
    )
}

pub fn executor(transport: Arc<FakeTransport>, config: RunConfig) -> ConvergenceExecutor {
    ConvergenceExecutor::new(
        config,
        ModuleRegistry::with_core_modules(),
        transport,
        Arc::new(StaticSecretsProvider::new().with_secret("db_password", "s3cret")),
    )
}

/// Log lines captured from a scoped `tracing` subscriber
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// Subscriber at TRACE level writing into this buffer
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        let logs = self.clone();
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || logs.clone())
            .finish()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn config(forks: usize, check_mode: bool) -> RunConfig {
    let mut config = RunConfig {
        forks,
        check_mode,
        ..Default::default()
    };
    config.fact_retry.max_attempts = 1;
    config
}
