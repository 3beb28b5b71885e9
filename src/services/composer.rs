//! 通知内容生成: 事件键 + 参数 -> 最终文本
//!
//! 纯函数, 无副作用, 无 I/O; 未知事件键立刻报错, 绝不产生空白通知。
//! 模板自身只允许 `**强调**` 这种轻量标记, 所有参数在插值前做 HTML 转义。

use crate::error::{AppError, Result};
use serde_json::Value;

/// 任务评分的措辞分档边界 (可测试的契约, 不可改动)
const RATING_EXCELLENT: i64 = 9;
const RATING_GREAT: i64 = 7;
const RATING_FAIR: i64 = 5;

/// 提取字符串参数并转义, 缺失时为空串
fn text(params: &Value, key: &str) -> String {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(ammonia::clean_text)
        .unwrap_or_default()
}

fn number(params: &Value, key: &str) -> i64 {
    params.get(key).and_then(Value::as_i64).unwrap_or(0)
}

/// 渲染事件键对应的通知文本
pub fn compose(key: &str, params: &Value) -> Result<String> {
    let content = match key {
        "task.assigned" => format!(
            "You have been assigned a new task: **{}**",
            text(params, "task_name")
        ),
        "task.status_changed" => format!(
            "Task **{}** status changed to **{}**",
            text(params, "task_name"),
            text(params, "status")
        ),
        "task.feedback" => feedback_text(&text(params, "task_name"), number(params, "rating")),
        "task.made_public" => format!(
            "Task **{}** is now visible to all project members with {} access",
            text(params, "task_name"),
            text(params, "access")
        ),
        "task.shared" => format!(
            "**{}** shared the task **{}** with you ({} access)",
            text(params, "actor_name"),
            text(params, "task_name"),
            text(params, "access")
        ),
        "task.share_removed" => format!(
            "Your access to task **{}** has been removed",
            text(params, "task_name")
        ),
        "project.open_recruitment" => format!(
            "Project **{}** is now open for applications",
            text(params, "project_title")
        ),
        "project.applicant_accepted" => format!(
            "Congratulations! You have been accepted to project **{}**",
            text(params, "project_title")
        ),
        "project.state_changed" => format!(
            "Project **{}** moved to **{}**",
            text(params, "project_title"),
            text(params, "state")
        ),
        "survey.assigned" => format!(
            "A new survey **{}** has been assigned to you",
            text(params, "survey_title")
        ),
        "account.new_device_login" => format!(
            "New login to your account from **{}**",
            text(params, "device")
        ),
        "school.student_joined" => {
            student_joined_text(&text(params, "actor_name"), number(params, "count"))
        }
        _ => return Err(AppError::TemplateNotFound(key.to_string())),
    };
    Ok(content)
}

/// 评分反馈措辞: >=9 excellent, >=7 great, >=5 fair, 其余鼓励
fn feedback_text(task_name: &str, rating: i64) -> String {
    if rating >= RATING_EXCELLENT {
        format!(
            "Excellent work on **{}**! You received a rating of {}/10. Keep up the outstanding performance!",
            task_name, rating
        )
    } else if rating >= RATING_GREAT {
        format!(
            "Great job on **{}**! You received a rating of {}/10.",
            task_name, rating
        )
    } else if rating >= RATING_FAIR {
        format!(
            "Your task **{}** received a fair rating of {}/10. Solid effort, with room to grow.",
            task_name, rating
        )
    } else {
        format!(
            "Your task **{}** was rated {}/10. Don't be discouraged, every task is a chance to improve.",
            task_name, rating
        )
    }
}

/// 学生加入学校的措辞, 同时充当聚合模板: count > 1 时汇总为一条
fn student_joined_text(actor_name: &str, count: i64) -> String {
    if count > 1 {
        format!(
            "**{}** and {} others just joined your school",
            actor_name,
            count - 1
        )
    } else {
        format!("**{}** just joined your school", actor_name)
    }
}
