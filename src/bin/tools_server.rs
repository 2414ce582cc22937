//! codebee-tools - stdio JSON-RPC 工具服务端
//!
//! 供 codebee 的远程工具通道启动：
//! ```bash
//! codebee-tools --root /path/to/project --timeout 30
//! ```
//! stdout 只输出 JSON-RPC 响应，日志写 stderr。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use codebee::gateway::LocalGateway;
use codebee::tools::ToolServer;
use tokio::io::BufReader;

struct Args {
    root: PathBuf,
    timeout_secs: u64,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        root: std::env::current_dir().context("no current directory")?,
        timeout_secs: 30,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--root" => {
                args.root = it.next().map(PathBuf::from).context("--root needs a directory")?;
            }
            "--timeout" => {
                args.timeout_secs = it
                    .next()
                    .context("--timeout needs seconds")?
                    .parse()
                    .context("--timeout must be an integer")?;
            }
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    codebee::observability::init();
    let args = parse_args()?;
    if !args.root.is_dir() {
        bail!("project root {} is not a directory", args.root.display());
    }
    tracing::info!(root = %args.root.display(), "codebee-tools started");

    let server = ToolServer::for_project(Arc::new(LocalGateway::new(&args.root)), args.timeout_secs);
    server
        .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await
        .context("tool server I/O failed")?;
    Ok(())
}
