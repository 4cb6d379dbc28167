/// Multi-window startup: one `window` child process per index
use std::fs::File;
use std::process::Stdio;

use anyhow::Context;
use futures_util::future::join_all;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::cli::{log_file_name, WindowArgs};

/// Arguments for the child that becomes window `index`.
///
/// A terminal can only host one scene view, so unless everything is headless
/// window 0 keeps the terminal and the others run headless.
pub fn child_args(index: u32, args: &WindowArgs) -> Vec<String> {
    let mut child = WindowArgs {
        headless: args.headless || index > 0,
        ..args.clone()
    }
    .to_args();
    child.insert(0, "window".to_string());
    child.push(format!("--window-index={index}"));
    child
}

fn spawn_window(index: u32, args: &WindowArgs) -> anyhow::Result<Child> {
    let exe = std::env::current_exe().context("locating own executable")?;
    let mut command = Command::new(exe);
    command.args(child_args(index, args)).kill_on_drop(true);

    // Background windows log to their own file so they don't draw over window 0.
    if index > 0 && !args.headless {
        let path = log_file_name(index);
        let log = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
        command.stdout(Stdio::null()).stderr(Stdio::from(log));
    }

    command
        .spawn()
        .with_context(|| format!("starting window {index}"))
}

/// Starts `windows` children and waits for all of them. Ctrl-C stops every child.
pub async fn launch(windows: u32, args: &WindowArgs) -> anyhow::Result<()> {
    let mut children = Vec::with_capacity(windows as usize);
    for index in 0..windows {
        let child = spawn_window(index, args)?;
        info!(index, pid = child.id(), "started window process");
        children.push(child);
    }

    let interrupted = tokio::select! {
        statuses = join_all(children.iter_mut().map(Child::wait)) => {
            for (index, status) in statuses.into_iter().enumerate() {
                match status {
                    Ok(status) if status.success() => info!(index, "window exited"),
                    Ok(status) => warn!(index, %status, "window exited with failure"),
                    Err(e) => warn!(index, error = %e, "could not wait for window"),
                }
            }
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };

    if interrupted {
        info!("interrupted, stopping all windows");
        for child in &mut children {
            if let Err(e) = child.start_kill() {
                warn!(pid = child.id(), error = %e, "could not stop window");
            }
        }
        for child in &mut children {
            let _ = child.wait().await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_window_keeps_the_terminal() {
        let args = WindowArgs {
            port: Some(9000),
            ..WindowArgs::default()
        };

        let first = child_args(0, &args);
        assert_eq!(first[0], "window");
        assert!(!first.contains(&"--headless".to_string()));
        assert_eq!(first.last().map(String::as_str), Some("--window-index=0"));

        let second = child_args(1, &args);
        assert!(second.contains(&"--headless".to_string()));
        assert!(second.windows(2).any(|w| w[0] == "--port" && w[1] == "9000"));
        assert_eq!(second.last().map(String::as_str), Some("--window-index=1"));
    }

    #[test]
    fn headless_launch_stays_headless() {
        let args = WindowArgs {
            headless: true,
            ..WindowArgs::default()
        };
        assert!(child_args(0, &args).contains(&"--headless".to_string()));
    }
}
