use crate::container::{ContainerSpecList, Direction};
use crate::error::{CapitanError, Result};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Which side of a command a hook runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    Before,
    After,
}

/// Hook key as declared in a service's `hooks` table, e.g. `before.up`
pub fn hook_name(point: HookPoint, command: &str) -> String {
    match point {
        HookPoint::Before => format!("before.{}", command),
        HookPoint::After => format!("after.{}", command),
    }
}

/// Runs per-service hook scripts through a shell, blocking until each exits.
pub struct HookRunner {
    shell: String,
    dry_run: bool,
}

impl HookRunner {
    pub fn new(shell: impl Into<String>, dry_run: bool) -> Self {
        Self {
            shell: shell.into(),
            dry_run,
        }
    }

    /// Run `hook` for every container that declares it, in startup order.
    ///
    /// A hook point nothing declares succeeds. The first non-zero exit
    /// aborts the remaining hooks.
    pub async fn run(&self, hook: &str, containers: &ContainerSpecList) -> Result<()> {
        for spec in containers.ordered(Direction::Startup) {
            let Some(script) = spec.hook(hook) else {
                continue;
            };

            info!("Running {} hook for {}", hook, spec.name);
            if self.dry_run {
                debug!("Skipping hook script: {}", script);
                continue;
            }

            let status = Command::new(&self.shell)
                .arg("-c")
                .arg(script)
                .envs(spec.env())
                .stdin(Stdio::null())
                .status()
                .await
                .map_err(|e| CapitanError::hook(hook, &spec.name, e.to_string()))?;

            if !status.success() {
                return Err(CapitanError::hook(
                    hook,
                    &spec.name,
                    format!("exited with {}", status),
                ));
            }
        }
        Ok(())
    }

    pub async fn run_point(
        &self,
        point: HookPoint,
        command: &str,
        containers: &ContainerSpecList,
    ) -> Result<()> {
        self.run(&hook_name(point, command), containers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::tests::spec;
    use crate::container::ContainerSpec;
    use tempfile::TempDir;

    fn with_hook(name: &str, placement: i64, hook: &str, script: &str) -> ContainerSpec {
        let mut spec = spec(name, placement);
        spec.hooks.insert(hook.to_string(), script.to_string());
        spec
    }

    #[test]
    fn test_hook_name() {
        assert_eq!(hook_name(HookPoint::Before, "up"), "before.up");
        assert_eq!(hook_name(HookPoint::After, "rm"), "after.rm");
    }

    #[tokio::test]
    async fn test_missing_hook_succeeds() {
        let containers = ContainerSpecList::new(vec![spec("web", 1)]);
        let runner = HookRunner::new("/bin/sh", false);
        assert!(runner.run("before.up", &containers).await.is_ok());
    }

    #[tokio::test]
    async fn test_hooks_run_in_startup_order_with_container_env() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("hooks.log");
        let script = format!(
            "echo \"$CAPITAN_CONTAINER_NAME $CAPITAN_CONTAINER_INSTANCE_NUMBER $CAPITAN_PROJECT_NAME\" >> {}",
            log.display()
        );
        let containers = ContainerSpecList::new(vec![
            with_hook("late", 5, "after.up", &script),
            with_hook("early", 1, "after.up", &script),
            spec("quiet", 0),
        ]);

        HookRunner::new("/bin/sh", false)
            .run_point(HookPoint::After, "up", &containers)
            .await
            .unwrap();

        let written = std::fs::read_to_string(&log).unwrap();
        assert_eq!(written, "early 1 test\nlate 1 test\n");
    }

    #[tokio::test]
    async fn test_failing_hook_aborts_remaining() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let containers = ContainerSpecList::new(vec![
            with_hook("first", 1, "before.stop", "exit 3"),
            with_hook(
                "second",
                2,
                "before.stop",
                &format!("touch {}", marker.display()),
            ),
        ]);

        let result = HookRunner::new("/bin/sh", false)
            .run("before.stop", &containers)
            .await;
        match result {
            Err(CapitanError::Hook {
                hook, container, ..
            }) => {
                assert_eq!(hook, "before.stop");
                assert_eq!(container, "first");
            }
            other => panic!("expected hook failure, got {:?}", other),
        }
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_dry_run_does_not_execute() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let containers = ContainerSpecList::new(vec![with_hook(
            "web",
            1,
            "before.up",
            &format!("touch {}", marker.display()),
        )]);

        HookRunner::new("/bin/sh", true)
            .run("before.up", &containers)
            .await
            .unwrap();
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_unknown_shell_is_hook_error() {
        let containers =
            ContainerSpecList::new(vec![with_hook("web", 1, "before.up", "true")]);
        let result = HookRunner::new("/nonexistent/shell", false)
            .run("before.up", &containers)
            .await;
        assert!(matches!(result, Err(CapitanError::Hook { .. })));
    }
}
