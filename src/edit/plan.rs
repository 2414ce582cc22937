//! 编辑计划：单文件、按行替换的操作集合
//!
//! 行号从 1 开始，内容按 `\n` 切分，末尾换行之后的空段不算一行。比较时忽略行尾的 `\r` 与空白，
//! 缩进仍然有效。应用顺序为行号降序，前面的替换不会移动后面尚未应用的行号。

use serde::{Deserialize, Serialize};

use crate::core::AgentError;

/// 单条操作：把第 `line` 行从 `expected` 替换为 `replacement`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditOp {
    pub line: usize,
    #[serde(rename = "old", default)]
    pub expected: String,
    #[serde(rename = "new", default)]
    pub replacement: String,
}

/// 编辑计划：属于且仅属于一个文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditPlan {
    pub file: String,
    #[serde(default)]
    pub edits: Vec<EditOp>,
}

impl EditPlan {
    pub fn new(file: impl Into<String>, edits: Vec<EditOp>) -> Self {
        Self {
            file: file.into(),
            edits,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// 审批时展示给用户的摘要
    pub fn summary(&self) -> String {
        let rule = "=".repeat(50);
        let mut s = format!("{rule}\nEDIT PLAN for {}\n{rule}\n", self.file);
        for op in &self.edits {
            s.push_str(&format!(
                "\nLine {}:\n  - {}\n  + {}\n",
                op.line,
                preview(&op.expected),
                preview(&op.replacement)
            ));
        }
        s.push_str(&format!(
            "\n{rule}\nType 'approve' or 'yes' to apply these edits\nType 'reject' or 'no' to cancel\n{rule}"
        ));
        s
    }
}

fn preview(s: &str) -> String {
    if s.chars().count() > 60 {
        format!("{}...", s.chars().take(60).collect::<String>())
    } else {
        s.to_string()
    }
}

fn split_lines(content: &str) -> Vec<&str> {
    let mut parts: Vec<&str> = content.split('\n').collect();
    if parts.last() == Some(&"") {
        parts.pop();
    }
    parts
}

pub fn line_count(content: &str) -> usize {
    split_lines(content).len()
}

fn same_line(expected: &str, actual: &str) -> bool {
    expected.trim_end() == actual.trim_end()
}

/// 带行号的文件内容：`"  10 | x = 1"`
pub fn annotate(content: &str) -> String {
    split_lines(content)
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{:4} | {}", i + 1, line.strip_suffix('\r').unwrap_or(line)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 写入前的全部校验：空计划、重叠、越界、期望文本不符；报告行号最小的第一个问题
pub fn validate(plan: &EditPlan, content: &str) -> Result<(), AgentError> {
    if plan.edits.is_empty() {
        return Err(AgentError::Validation {
            line: 0,
            message: "plan has no operations".to_string(),
        });
    }
    let lines = split_lines(content);
    let mut ops: Vec<&EditOp> = plan.edits.iter().collect();
    ops.sort_by_key(|op| op.line);

    for pair in ops.windows(2) {
        if pair[0].line == pair[1].line {
            return Err(AgentError::Validation {
                line: pair[0].line,
                message: "overlapping operations target the same line".to_string(),
            });
        }
    }

    for op in ops {
        if op.line == 0 || op.line > lines.len() {
            return Err(AgentError::Validation {
                line: op.line,
                message: format!("out of range (file has {} lines)", lines.len()),
            });
        }
        let actual = lines[op.line - 1];
        if !same_line(&op.expected, actual) {
            return Err(AgentError::Validation {
                line: op.line,
                message: format!(
                    "expected {:?}, found {:?}",
                    op.expected,
                    actual.trim_end()
                ),
            });
        }
    }
    Ok(())
}

/// 校验后按行号降序应用，返回新内容；原行以 `\r\n` 结尾时保留该行尾
pub fn render(plan: &EditPlan, content: &str) -> Result<String, AgentError> {
    validate(plan, content)?;
    let trailing_newline = content.ends_with('\n');
    let mut lines: Vec<String> = split_lines(content).into_iter().map(str::to_string).collect();

    let mut ops: Vec<&EditOp> = plan.edits.iter().collect();
    ops.sort_by(|a, b| b.line.cmp(&a.line));
    for op in ops {
        let idx = op.line - 1;
        let mut replacement = op.replacement.clone();
        if lines[idx].ends_with('\r') && !replacement.ends_with('\r') {
            replacement.push('\r');
        }
        lines[idx] = replacement;
    }

    let mut out = lines.join("\n");
    if trailing_newline {
        out.push('\n');
    }
    Ok(out)
}
