//! Process tree inspection.
//!
//! Used to find every descendant of a worker before it is terminated, so no
//! grandchild survives its worker. On Linux the tree is rebuilt from the
//! parent links in `/proc/<pid>/stat`; elsewhere only the worker's process
//! group is available and [`descendants`] returns nothing.

#[cfg(target_os = "linux")]
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;

#[cfg(target_os = "linux")]
const PROC_DIR: &str = "/proc";

/// The parts of `/proc/<pid>/stat` we care about.
#[cfg(target_os = "linux")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProcStat {
    state: char,
    ppid: u32,
    pgrp: u32,
}

/// Read state, parent pid and process group of a process.
///
/// The command name (field 2) may contain spaces and parentheses, so fields
/// are counted from the last `)`.
#[cfg(target_os = "linux")]
fn read_stat(pid: u32) -> Option<ProcStat> {
    let contents = fs::read_to_string(format!("{}/{}/stat", PROC_DIR, pid)).ok()?;
    parse_stat(&contents)
}

#[cfg(target_os = "linux")]
fn parse_stat(contents: &str) -> Option<ProcStat> {
    let (_, rest) = contents.rsplit_once(')')?;
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let ppid = fields.next()?.parse().ok()?;
    let pgrp = fields.next()?.parse().ok()?;
    Some(ProcStat { state, ppid, pgrp })
}

/// Pids listed in `/proc`.
#[cfg(target_os = "linux")]
fn all_pids() -> Vec<u32> {
    let Ok(entries) = fs::read_dir(PROC_DIR) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str().and_then(|s| s.parse().ok()))
        .collect()
}

/// All transitive descendants of `pid`, parents before children.
#[cfg(target_os = "linux")]
pub fn descendants(pid: u32) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for child in all_pids() {
        if let Some(stat) = read_stat(child) {
            children.entry(stat.ppid).or_default().push(child);
        }
    }

    let mut found = Vec::new();
    let mut queue = vec![pid];
    while let Some(parent) = queue.pop() {
        if let Some(kids) = children.remove(&parent) {
            for kid in kids {
                found.push(kid);
                queue.push(kid);
            }
        }
    }
    found
}

#[cfg(not(target_os = "linux"))]
pub fn descendants(_pid: u32) -> Vec<u32> {
    Vec::new()
}

/// Live members of process group `pgid`.
///
/// Used once the group leader has been reaped: its pid, and with it the
/// group id, may then be handed to an unrelated process, so the survivors
/// are signaled one by one instead of through the group.
#[cfg(target_os = "linux")]
pub fn group_members(pgid: u32) -> Vec<u32> {
    all_pids()
        .into_iter()
        .filter(|pid| {
            read_stat(*pid).is_some_and(|stat| {
                stat.pgrp == pgid && !matches!(stat.state, 'Z' | 'X' | 'x')
            })
        })
        .collect()
}

#[cfg(not(target_os = "linux"))]
pub fn group_members(_pgid: u32) -> Vec<u32> {
    Vec::new()
}

/// Whether a process exists and has not exited.
///
/// Zombies count as exited: they hold no resources besides their pid.
#[cfg(target_os = "linux")]
pub fn is_alive(pid: u32) -> bool {
    read_stat(pid).is_some_and(|stat| !matches!(stat.state, 'Z' | 'X' | 'x'))
}

#[cfg(not(target_os = "linux"))]
pub fn is_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}
