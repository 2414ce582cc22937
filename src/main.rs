//! codebee - 交互式代码助手
//!
//! 入口：初始化日志、加载配置、组装编排器，然后运行逐行 REPL。
//! 除 approve / reject 外，`stats` 打印运行状态，`exit` / `quit` 退出。

use std::path::PathBuf;

use anyhow::Context;
use codebee::core::builder::create_agent_builder;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const BANNER: &str = "codebee - ask about code, request edits, run tests, 'undo', or set preferences.\n\
Type 'stats' for session state, 'exit' to quit.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    codebee::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let builder = create_agent_builder(config_path);
    tracing::info!(root = %builder.project_root().display(), "project root");
    let mut orchestrator = builder.build().await;

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    stdout.write_all(format!("{BANNER}\n").as_bytes()).await?;

    loop {
        let prompt = if orchestrator.pending_plan().is_some() {
            "approve? > "
        } else {
            "> "
        };
        stdout.write_all(prompt.as_bytes()).await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await.context("failed to read stdin")? else {
            break;
        };
        let input = line.trim();
        match input.to_lowercase().as_str() {
            "" => continue,
            "exit" | "quit" => break,
            "stats" => {
                let stats = serde_json::to_string_pretty(&orchestrator.stats())?;
                stdout.write_all(format!("{stats}\n").as_bytes()).await?;
                continue;
            }
            _ => {}
        }

        let text = match orchestrator.handle_input(input).await {
            Ok(outcome) => outcome.to_string(),
            Err(e) => orchestrator.recovery().user_message(&e),
        };
        stdout.write_all(format!("{text}\n").as_bytes()).await?;
    }

    orchestrator.memory.persist();
    Ok(())
}
