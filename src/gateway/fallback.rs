//! 网关选择策略：优先远程通道，连接失败时透明回退到直连
//!
//! 回退只影响「哪条路径服务了这次调用」，不改变返回给调用方的语义，也不参与重试计数；
//! 每次调用输出一条 JSON 审计日志并累计路由统计。

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;

use crate::gateway::{ExecOutput, GatewayError, ToolGateway};

/// 服务某次调用的路径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayRoute {
    Remote,
    Direct,
}

/// 路由统计（诊断用）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouteStats {
    pub last: Option<GatewayRoute>,
    pub remote_calls: u64,
    pub direct_calls: u64,
    pub fallbacks: u64,
}

/// 组合网关：持有可选的远程实现与必备的直连实现
pub struct FallbackGateway {
    remote: Option<Arc<dyn ToolGateway>>,
    direct: Arc<dyn ToolGateway>,
    prefer_remote: bool,
    stats: Mutex<RouteStats>,
}

impl FallbackGateway {
    pub fn new(direct: Arc<dyn ToolGateway>) -> Self {
        Self {
            remote: None,
            direct,
            prefer_remote: true,
            stats: Mutex::new(RouteStats::default()),
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn ToolGateway>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_prefer_remote(mut self, prefer: bool) -> Self {
        self.prefer_remote = prefer;
        self
    }

    pub fn stats(&self) -> RouteStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_route(&self) -> Option<GatewayRoute> {
        self.stats().last
    }

    fn record(&self, op: &str, route: GatewayRoute, ok: bool, fell_back: bool, start: Instant, preview: &str) {
        {
            let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            stats.last = Some(route);
            match route {
                GatewayRoute::Remote => stats.remote_calls += 1,
                GatewayRoute::Direct => stats.direct_calls += 1,
            }
            if fell_back {
                stats.fallbacks += 1;
            }
        }
        let audit = serde_json::json!({
            "event": "gateway_audit",
            "op": op,
            "route": route,
            "fallback": fell_back,
            "ok": ok,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit.to_string(), "gateway");
    }

    /// 先远程后直连；只有 `Connection` 错误触发回退
    async fn route<T, F, Fut>(&self, op: &str, preview: String, call: F) -> Result<T, GatewayError>
    where
        F: Fn(Arc<dyn ToolGateway>) -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut fell_back = false;
        if self.prefer_remote {
            if let Some(remote) = &self.remote {
                let start = Instant::now();
                match call(remote.clone()).await {
                    Err(GatewayError::Connection(reason)) => {
                        tracing::warn!(op, reason = %reason, "remote gateway unreachable, falling back to direct");
                        fell_back = true;
                    }
                    other => {
                        self.record(op, GatewayRoute::Remote, other.is_ok(), false, start, &preview);
                        return other;
                    }
                }
            }
        }
        let start = Instant::now();
        let result = call(self.direct.clone()).await;
        self.record(op, GatewayRoute::Direct, result.is_ok(), fell_back, start, &preview);
        result
    }
}

fn preview(s: &str) -> String {
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s.to_string()
    }
}

#[async_trait]
impl ToolGateway for FallbackGateway {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn read(&self, path: &str) -> Result<String, GatewayError> {
        self.route("read", preview(path), |gw| async move { gw.read(path).await })
            .await
    }

    async fn write(&self, path: &str, content: &str) -> Result<(), GatewayError> {
        self.route("write", preview(path), |gw| async move {
            gw.write(path, content).await
        })
        .await
    }

    async fn execute(&self, command: &str, timeout_secs: u64) -> Result<ExecOutput, GatewayError> {
        self.route("execute", preview(command), |gw| async move {
            gw.execute(command, timeout_secs).await
        })
        .await
    }

    async fn list_files(&self) -> Result<Vec<String>, GatewayError> {
        self.route("list_files", String::new(), |gw| async move {
            gw.list_files().await
        })
        .await
    }
}
