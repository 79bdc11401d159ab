use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

/// Snapshot of a worker's process tree.
///
/// The worker leads its own process group, so signals are delivered both to
/// the group and to every descendant found at snapshot time (which also
/// covers descendants that left the group).
#[derive(Debug)]
pub struct ProcessTree {
    root: Pid,
    members: Vec<Pid>,
}

impl ProcessTree {
    /// Takes a snapshot of the tree rooted at `root`.
    ///
    /// `include_root` should be `false` once the root was reaped, since its
    /// PID may have been reused.
    pub fn snapshot(root: u32, include_root: bool) -> Self {
        let root = Pid::from_raw(root as i32);

        let mut members = Vec::new();
        if include_root {
            members.push(root);
        }
        members.extend(descendants(root));

        Self { root, members }
    }

    /// Returns the processes of the tree.
    pub fn members(&self) -> &[Pid] {
        &self.members
    }

    /// Sends a signal to the whole tree.
    ///
    /// Returns the number of successful deliveries.
    pub fn signal(&self, sig: Signal) -> usize {
        let mut delivered = 0;

        match signal::killpg(self.root, sig) {
            Ok(()) => delivered += 1,
            Err(Errno::ESRCH) => (),
            Err(e) => tracing::warn!(error = %e, pgid = self.root.as_raw(), "killpg"),
        }

        for pid in &self.members {
            match signal::kill(*pid, sig) {
                Ok(()) => delivered += 1,
                Err(Errno::ESRCH) => (),
                Err(e) => tracing::warn!(error = %e, pid = pid.as_raw(), "kill"),
            }
        }

        tracing::debug!(signal = %sig, delivered, "process tree signalled");

        delivered
    }

    /// Returns the processes of the tree which are still alive.
    ///
    /// Members of the worker's process group which were reparented before
    /// the snapshot aren't listed, see [is_group_alive](Self::is_group_alive).
    pub fn survivors(&self) -> Vec<Pid> {
        self.members
            .iter()
            .copied()
            .filter(|pid| is_alive(*pid))
            .collect()
    }

    /// Returns whether the worker's process group still has live members.
    pub fn is_group_alive(&self) -> bool {
        #[cfg(target_os = "linux")]
        {
            processes().any(|(_, stat)| stat.pgrp == self.root.as_raw() && stat.is_alive())
        }

        #[cfg(not(target_os = "linux"))]
        {
            signal::killpg(self.root, None).is_ok()
        }
    }

    /// Returns whether every process of the tree is gone, including the
    /// members of the worker's process group.
    pub fn is_terminated(&self) -> bool {
        self.survivors().is_empty() && !self.is_group_alive()
    }
}

/// Returns whether the given process is alive. Zombies are dead.
pub fn is_alive(pid: Pid) -> bool {
    #[cfg(target_os = "linux")]
    {
        proc_stat(pid.as_raw()).is_some_and(|stat| stat.is_alive())
    }

    #[cfg(not(target_os = "linux"))]
    {
        signal::kill(pid, None).is_ok()
    }
}

/// Returns the descendants of `root`, closest first.
#[cfg(target_os = "linux")]
fn descendants(root: Pid) -> Vec<Pid> {
    use std::collections::{HashMap, VecDeque};

    let mut children = HashMap::<i32, Vec<i32>>::new();

    for (pid, stat) in processes() {
        children.entry(stat.ppid).or_default().push(pid);
    }

    let mut found = Vec::new();
    let mut queue = VecDeque::from([root.as_raw()]);

    while let Some(parent) = queue.pop_front() {
        for child in children.remove(&parent).unwrap_or_default() {
            found.push(Pid::from_raw(child));
            queue.push_back(child);
        }
    }

    found
}

#[cfg(not(target_os = "linux"))]
fn descendants(_root: Pid) -> Vec<Pid> {
    Vec::new()
}

#[cfg(target_os = "linux")]
struct ProcStat {
    state: char,
    ppid: i32,
    pgrp: i32,
}

#[cfg(target_os = "linux")]
impl ProcStat {
    fn is_alive(&self) -> bool {
        !matches!(self.state, 'Z' | 'X' | 'x')
    }
}

/// Returns the processes currently listed in `/proc`.
#[cfg(target_os = "linux")]
fn processes() -> impl Iterator<Item = (i32, ProcStat)> {
    std::fs::read_dir("/proc")
        .into_iter()
        .flatten()
        .flatten()
        .filter_map(|entry| entry.file_name().to_str()?.parse::<i32>().ok())
        .filter_map(|pid| Some((pid, proc_stat(pid)?)))
}

#[cfg(target_os = "linux")]
fn proc_stat(pid: i32) -> Option<ProcStat> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;

    // the command name may contain spaces and parentheses
    let (_, rest) = stat.rsplit_once(')')?;
    let mut fields = rest.split_whitespace();

    let state = fields.next()?.chars().next()?;
    let ppid = fields.next()?.parse().ok()?;
    let pgrp = fields.next()?.parse().ok()?;

    Some(ProcStat { state, ppid, pgrp })
}
