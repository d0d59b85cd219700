//! OS-level sweep for broadcast processes this instance does not track

use sysinfo::{Pid, System};
use tracing::{debug, warn};

/// Kill every process with an argument equal to `target`, skipping our own
/// pid and anything in `exclude`. Returns how many kill signals were delivered.
///
/// Arguments are compared whole, so a key that is a prefix of another key
/// never matches the longer one.
pub async fn kill_processes_matching(target: &str, exclude: &[u32]) -> usize {
    let target = target.to_string();
    let exclude = exclude.to_vec();

    let result = tokio::task::spawn_blocking(move || {
        let system = System::new_all();
        let own_pid = sysinfo::get_current_pid().ok();
        let mut killed = 0;

        for (pid, process) in system.processes() {
            if Some(*pid) == own_pid || exclude.iter().any(|p| Pid::from_u32(*p) == *pid) {
                continue;
            }
            let args: Vec<_> = process.cmd().iter().map(|arg| arg.to_string_lossy()).collect();
            if !args.iter().any(|arg| *arg == target) {
                continue;
            }
            let cmdline = args.join(" ");

            debug!("Sweeping pid={} cmd={}", pid, cmdline);
            if process.kill() {
                killed += 1;
            } else {
                warn!("Failed to kill stray process pid={}", pid);
            }
        }
        killed
    })
    .await;

    match result {
        Ok(killed) => killed,
        Err(e) => {
            warn!("Process sweep task failed: {}", e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};
    use std::time::Duration;

    #[tokio::test]
    async fn test_sweep_without_matches_kills_nothing() {
        let target = format!("rtmp://sweep-test.invalid/{}", uuid::Uuid::new_v4());
        assert_eq!(kill_processes_matching(&target, &[]).await, 0);
    }

    #[tokio::test]
    async fn test_sweep_matches_whole_destination_only() {
        let base = format!("rtmp://sweep-{}.invalid/live", uuid::Uuid::new_v4());
        let longer_key = format!("{}/abcd", base);
        // The trailing argument becomes $0. The second command stops the
        // shell from replacing itself with sleep.
        let mut child = Command::new("sh")
            .args(["-c", "sleep 30; true", longer_key.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let prefix_key = format!("{}/abc", base);
        assert_eq!(kill_processes_matching(&prefix_key, &[]).await, 0);
        assert!(child.try_wait().unwrap().is_none());

        assert_eq!(kill_processes_matching(&longer_key, &[]).await, 1);
        child.wait().unwrap();
    }
}
