//! 回答评估：以 LLM 作为裁判，对一轮回答打 1-5 分
//!
//! 评估在后台任务中进行，不阻塞也不影响主流程；失败只记日志。
//! 历史记录保存在 JSON 文件中，只保留最近 100 条。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::llm::{extract_json_block, LlmClient, LlmError};
use crate::memory::Message;

const HISTORY_CAP: usize = 100;
const RESPONSE_PREVIEW_CHARS: usize = 2000;
const CONTEXT_PREVIEW_CHARS: usize = 500;

const JUDGE_PROMPT: &str = r#"You are an expert evaluator assessing an AI coding agent's response.

User Query: "{query}"{intent}

Agent Response:
{response}
{context}

Evaluate the response on these criteria (1-5 scale): accuracy, helpfulness, completeness, clarity, safety.

Return ONLY valid JSON:
{"accuracy": <score>, "helpfulness": <score>, "completeness": <score>, "clarity": <score>, "safety": <score>, "overall_score": <average>, "feedback": "<brief explanation>", "strengths": ["..."], "improvements": ["..."]}"#;

/// 单次评估结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evaluation {
    pub accuracy: u8,
    pub helpfulness: u8,
    pub completeness: u8,
    pub clarity: u8,
    pub safety: u8,
    pub overall_score: f64,
    #[serde(default)]
    pub feedback: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub response_length: usize,
    pub timestamp: DateTime<Utc>,
}

impl Evaluation {
    /// 分数偏低或改进建议较多时值得展示给用户
    pub fn needs_attention(&self) -> bool {
        self.overall_score < 3.5 || self.improvements.len() > 2
    }
}

/// 裁判输出的原始 JSON；缺失的维度按中性分 3 处理
#[derive(Debug, Deserialize)]
struct JudgeReply {
    accuracy: Option<f64>,
    helpfulness: Option<f64>,
    completeness: Option<f64>,
    clarity: Option<f64>,
    safety: Option<f64>,
    overall_score: Option<f64>,
    #[serde(default)]
    feedback: String,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    improvements: Vec<String>,
}

fn clamp_score(v: Option<f64>) -> u8 {
    v.unwrap_or(3.0).round().clamp(1.0, 5.0) as u8
}

/// 解析裁判回复；无法解析时返回 None
pub fn parse_judgement(reply: &str) -> Option<Evaluation> {
    let json = extract_json_block(reply)?;
    let raw: JudgeReply = serde_json::from_str(json).ok()?;
    let scores = [
        clamp_score(raw.accuracy),
        clamp_score(raw.helpfulness),
        clamp_score(raw.completeness),
        clamp_score(raw.clarity),
        clamp_score(raw.safety),
    ];
    let overall = raw.overall_score.map(|s| s.clamp(1.0, 5.0)).unwrap_or_else(|| {
        let sum: f64 = scores.iter().map(|&s| f64::from(s)).sum();
        (sum / scores.len() as f64 * 100.0).round() / 100.0
    });
    Some(Evaluation {
        accuracy: scores[0],
        helpfulness: scores[1],
        completeness: scores[2],
        clarity: scores[3],
        safety: scores[4],
        overall_score: overall,
        feedback: raw.feedback,
        strengths: raw.strengths,
        improvements: raw.improvements,
        query: String::new(),
        intent: None,
        response_length: 0,
        timestamp: Utc::now(),
    })
}

/// 历史汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationStats {
    pub total: usize,
    pub average_overall: f64,
    pub last_10_average: f64,
    pub needs_attention: usize,
}

fn average(evals: &[Evaluation]) -> f64 {
    if evals.is_empty() {
        return 0.0;
    }
    let sum: f64 = evals.iter().map(|e| e.overall_score).sum();
    (sum / evals.len() as f64 * 100.0).round() / 100.0
}

pub struct ResponseEvaluator {
    llm: Arc<dyn LlmClient>,
    path: PathBuf,
    history: Mutex<Vec<Evaluation>>,
}

impl ResponseEvaluator {
    /// 读取历史；文件缺失或损坏时从空历史开始
    pub fn new(llm: Arc<dyn LlmClient>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let history = load_history(&path);
        Self {
            llm,
            path,
            history: Mutex::new(history),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn evaluate(
        &self,
        query: &str,
        response: &str,
        context: Option<&str>,
        intent: Option<&str>,
    ) -> Result<Evaluation, LlmError> {
        let prompt = JUDGE_PROMPT
            .replace("{query}", query)
            .replace(
                "{intent}",
                &intent.map(|i| format!("\nIntent: {i}")).unwrap_or_default(),
            )
            .replace("{response}", &preview(response, RESPONSE_PREVIEW_CHARS))
            .replace(
                "{context}",
                &context
                    .map(|c| format!("\nContext provided to agent:\n{}...", preview(c, CONTEXT_PREVIEW_CHARS)))
                    .unwrap_or_default(),
            );

        let reply = self.llm.complete(&[Message::system(prompt)]).await?;
        let mut evaluation = parse_judgement(&reply)
            .ok_or_else(|| LlmError::from_message(format!("unparseable judgement: {}", preview(&reply, 200))))?;
        evaluation.query = preview(query, 200);
        evaluation.intent = intent.map(str::to_string);
        evaluation.response_length = response.chars().count();

        self.record(evaluation.clone()).await;
        Ok(evaluation)
    }

    /// 后台评估：不等待结果，失败只记日志
    pub fn spawn(
        self: &Arc<Self>,
        query: String,
        response: String,
        context: Option<String>,
        intent: Option<String>,
    ) -> tokio::task::JoinHandle<()> {
        let evaluator = Arc::clone(self);
        tokio::spawn(async move {
            match evaluator
                .evaluate(&query, &response, context.as_deref(), intent.as_deref())
                .await
            {
                Ok(e) if e.needs_attention() => {
                    tracing::info!(score = e.overall_score, feedback = %e.feedback, "low-scoring response")
                }
                Ok(e) => tracing::debug!(score = e.overall_score, "response evaluated"),
                Err(e) => tracing::warn!(error = %e, "response evaluation failed"),
            }
        })
    }

    async fn record(&self, evaluation: Evaluation) {
        let mut history = self.history.lock().await;
        history.push(evaluation);
        if history.len() > HISTORY_CAP {
            let excess = history.len() - HISTORY_CAP;
            history.drain(..excess);
        }
        match serde_json::to_string_pretty(&*history) {
            Ok(json) => {
                if let Some(parent) = self.path.parent() {
                    let _ = tokio::fs::create_dir_all(parent).await;
                }
                if let Err(e) = tokio::fs::write(&self.path, json).await {
                    tracing::warn!(path = %self.path.display(), error = %e, "could not save evaluation history");
                }
            }
            Err(e) => tracing::warn!(error = %e, "could not serialize evaluation history"),
        }
    }

    pub async fn stats(&self) -> EvaluationStats {
        let history = self.history.lock().await;
        let recent_start = history.len().saturating_sub(10);
        EvaluationStats {
            total: history.len(),
            average_overall: average(&history),
            last_10_average: average(&history[recent_start..]),
            needs_attention: history.iter().filter(|e| e.needs_attention()).count(),
        }
    }
}

fn load_history(path: &Path) -> Vec<Evaluation> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    serde_json::from_str(&text).unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), error = %e, "evaluation history unreadable, starting fresh");
        Vec::new()
    })
}

fn preview(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
