//! A runtime CLI stand-in that logs commands instead of running them.

use flotilla_runtime::{CommandOutput, ScriptedRunner};
use tracing::info;

/// Invocations a dry-run daemon remembers.
pub const DRY_RUN_HISTORY: usize = 256;

/// Every command succeeds. Launches print `dry-<node name>` as the
/// instance id.
pub fn dry_run_runner() -> ScriptedRunner {
    ScriptedRunner::new(|inv| {
        info!(command = %inv, "dry run");
        if inv.has_arg("run") {
            let name = inv.args.last().cloned().unwrap_or_default();
            Ok(CommandOutput::success(format!("dry-{name}\n")))
        } else {
            Ok(CommandOutput::success(""))
        }
    })
    .with_history_limit(DRY_RUN_HISTORY)
}

#[cfg(test)]
mod tests {
    use flotilla_runtime::{CommandRunner, Invocation};

    use super::*;

    #[tokio::test]
    async fn launch_prints_synthetic_id() {
        let runner = dry_run_runner();
        let out = runner
            .run(&Invocation::new("hyper").args(["run", "-d", "img", "secret", "linux-1"]))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "dry-linux-1");

        let out = runner.run(&Invocation::new("hyper").args(["rm", "-v", "-f", "x"])).await.unwrap();
        assert!(out.is_success());
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn history_stays_bounded() {
        let runner = dry_run_runner();
        for i in 0..DRY_RUN_HISTORY + 10 {
            let id = format!("i{i}");
            runner.run(&Invocation::new("hyper").args(["rm", "-v", "-f", &id])).await.unwrap();
        }
        let calls = runner.calls();
        assert_eq!(calls.len(), DRY_RUN_HISTORY);
        assert_eq!(calls[0].args.last().map(String::as_str), Some("i10"));
    }
}
