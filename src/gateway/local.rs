//! 进程内直连网关
//!
//! 绑定项目根目录，所有路径必须落在根目录下（禁止 `..` 与根外绝对路径）；
//! 命令通过 sh -c / cmd /C 在根目录执行，带超时，并拒绝危险子串。

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use walkdir::WalkDir;

use crate::gateway::{ExecOutput, GatewayError, ToolGateway};

/// 禁止的命令子串
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf /",
    "rm -fr /",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    "chmod 777 /",
    "curl | sh",
    "wget -O- | sh",
    ":(){ :|:& };:", // fork bomb
];

/// 列文件时跳过的目录
const SKIP_DIRS: &[&str] = &["target", "node_modules", "__pycache__", "venv", ".venv"];

/// 直连网关：本地文件系统 + 子进程
#[derive(Debug, Clone)]
pub struct LocalGateway {
    root: PathBuf,
}

impl LocalGateway {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let root = root.canonicalize().unwrap_or(root);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 词法校验：相对路径不得含 `..`，绝对路径必须位于根目录内
    fn resolve(&self, path: &str) -> Result<PathBuf, GatewayError> {
        let trimmed = path.trim().trim_start_matches("./");
        if trimmed.is_empty() {
            return Err(GatewayError::NotFound(path.to_string()));
        }
        let candidate = Path::new(trimmed);
        if candidate.is_absolute() {
            return if candidate.starts_with(&self.root) {
                Ok(candidate.to_path_buf())
            } else {
                Err(GatewayError::Permission(format!(
                    "{path} is outside the project root"
                )))
            };
        }
        if candidate
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(GatewayError::Permission(format!(
                "{path} escapes the project root"
            )));
        }
        Ok(self.root.join(candidate))
    }

    fn check_command(command: &str) -> Result<(), GatewayError> {
        let lower = command.to_lowercase();
        if lower.trim().is_empty() {
            return Err(GatewayError::Permission("empty command".to_string()));
        }
        for forbidden in FORBIDDEN_SUBSTR {
            if lower.contains(forbidden) {
                return Err(GatewayError::Permission(format!(
                    "forbidden pattern: {forbidden}"
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ToolGateway for LocalGateway {
    fn name(&self) -> &str {
        "direct"
    }

    async fn read(&self, path: &str) -> Result<String, GatewayError> {
        let full = self.resolve(path)?;
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| GatewayError::from_io(e, path))
    }

    async fn write(&self, path: &str, content: &str) -> Result<(), GatewayError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GatewayError::from_io(e, path))?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| GatewayError::from_io(e, path))
    }

    async fn execute(&self, command: &str, timeout_secs: u64) -> Result<ExecOutput, GatewayError> {
        Self::check_command(command)?;
        tracing::info!(command = %command, "direct execute");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(&self.root).kill_on_drop(true);

        let output = tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output())
            .await
            .map_err(|_| GatewayError::TimedOut { secs: timeout_secs })?
            .map_err(|e| GatewayError::Io(format!("spawn failed: {e}")))?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn list_files(&self) -> Result<Vec<String>, GatewayError> {
        let root = self.root.clone();
        let files = tokio::task::spawn_blocking(move || {
            let mut files: Vec<String> = WalkDir::new(&root)
                .into_iter()
                .filter_entry(|e| {
                    let name = e.file_name().to_string_lossy();
                    e.depth() == 0
                        || !(name.starts_with('.') || SKIP_DIRS.contains(&name.as_ref()))
                })
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
                .filter_map(|e| {
                    e.path().strip_prefix(&root).ok().map(|rel| {
                        rel.components()
                            .map(|c| c.as_os_str().to_string_lossy().to_string())
                            .collect::<Vec<_>>()
                            .join("/")
                    })
                })
                .collect();
            files.sort();
            files
        })
        .await
        .map_err(|e| GatewayError::Io(format!("list task failed: {e}")))?;
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_write_roundtrip_and_not_found() {
        let dir = TempDir::new().unwrap();
        let gw = LocalGateway::new(dir.path());

        gw.write("pkg/a.py", "x = 1\n").await.unwrap();
        assert_eq!(gw.read("pkg/a.py").await.unwrap(), "x = 1\n");
        assert_eq!(gw.read("./pkg/a.py").await.unwrap(), "x = 1\n");

        let err = gw.read("missing.py").await.unwrap_err();
        assert_eq!(err, GatewayError::NotFound("missing.py".to_string()));
    }

    #[tokio::test]
    async fn test_path_escape_rejected() {
        let dir = TempDir::new().unwrap();
        let gw = LocalGateway::new(dir.path());
        assert!(matches!(
            gw.read("../etc/passwd").await,
            Err(GatewayError::Permission(_))
        ));
        assert!(matches!(
            gw.write("/tmp/outside.txt", "x").await,
            Err(GatewayError::Permission(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_exit_code_and_output() {
        let dir = TempDir::new().unwrap();
        let gw = LocalGateway::new(dir.path());
        let out = gw.execute("echo hello; exit 3", 10).await.unwrap();
        assert_eq!(out.exit_code, 3);
        assert!(out.stdout.contains("hello"));
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_execute_timeout() {
        let dir = TempDir::new().unwrap();
        let gw = LocalGateway::new(dir.path());
        let err = gw.execute("sleep 5", 1).await.unwrap_err();
        assert_eq!(err, GatewayError::TimedOut { secs: 1 });
    }

    #[tokio::test]
    async fn test_forbidden_command() {
        let dir = TempDir::new().unwrap();
        let gw = LocalGateway::new(dir.path());
        assert!(matches!(
            gw.execute("rm -rf / --no-preserve-root", 5).await,
            Err(GatewayError::Permission(_))
        ));
    }

    #[tokio::test]
    async fn test_list_files_skips_hidden_and_build_dirs() {
        let dir = TempDir::new().unwrap();
        let gw = LocalGateway::new(dir.path());
        gw.write("main.py", "").await.unwrap();
        gw.write("routes/users.py", "").await.unwrap();
        gw.write(".git/config", "").await.unwrap();
        gw.write("__pycache__/main.pyc", "").await.unwrap();

        let files = gw.list_files().await.unwrap();
        assert_eq!(files, vec!["main.py".to_string(), "routes/users.py".to_string()]);
    }
}
