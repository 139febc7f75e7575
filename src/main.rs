//! solar-assistant 命令行入口
//!
//! 逐行读取标准输入并打印回复；`/clear` 清空会话，`/status` 查看凭证状态，`/quit` 退出。

use anyhow::Context;
use solar_assistant::config::load_config;
use solar_assistant::core::TurnEvent;
use solar_assistant::{observability, Agent};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).context("Failed to load configuration")?;
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let agent = Agent::from_config(cfg, Some(event_tx))
        .await
        .context("Failed to create agent")?;

    // 工具调用实时打印到 stderr，不与回复混在一起
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                TurnEvent::ToolCall { tool, args, .. } => eprintln!("  [tool] {} {}", tool, args),
                TurnEvent::Observation {
                    call_id, is_error, ..
                } if is_error => eprintln!("  [tool] {} failed", call_id),
                _ => {}
            }
        }
    });

    let session_id = agent.sessions().default_session_id().to_string();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Solar assistant ready. Commands: /clear, /status, /quit");

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                agent.clear_session(Some(&session_id)).await;
                println!("Session cleared.");
            }
            "/status" => match agent.tokens().status(agent.provider()).await {
                Ok(status) => println!("{}", serde_json::to_string_pretty(&status)?),
                Err(e) => println!("Credential status unavailable: {}", e),
            },
            _ => {
                let reply = agent.post_message(Some(&session_id), input).await;
                println!("{}", reply);
            }
        }
    }

    Ok(())
}
