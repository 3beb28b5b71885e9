use serde::{Deserialize, Serialize};

/// 账号类别 (通知接收方的封闭集合)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecipientKind {
    Admin,
    CompanyAccount,
    SchoolAccount,
    Student,
}

impl RecipientKind {
    /// 该类别是否要求角色限定 (同一公司/学校账号空间内按角色过滤投递)
    pub fn requires_role(&self) -> bool {
        matches!(self, RecipientKind::CompanyAccount | RecipientKind::SchoolAccount)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientKind::Admin => "Admin",
            RecipientKind::CompanyAccount => "CompanyAccount",
            RecipientKind::SchoolAccount => "SchoolAccount",
            RecipientKind::Student => "Student",
        }
    }
}

impl std::fmt::Display for RecipientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 公司账号角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanyRole {
    Admin,
    SubAdmin,
    Mentor,
}

/// 学校账号角色 (名称 + 可选的院系信息)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchoolRole {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub faculty: Option<String>,
}

/// 按账号类别区分的角色标签联合
///
/// 公司账号的角色是一个简单枚举, 学校账号的角色带有院系结构,
/// 这里用带标签的联合代替多态字段, 使角色匹配逻辑可以被穷举检查
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecipientRole {
    Company { role: CompanyRole },
    School(SchoolRole),
}

impl RecipientRole {
    /// 角色限定投递的匹配规则: 公司角色精确相等, 学校角色按名称匹配
    pub fn matches(&self, other: &RecipientRole) -> bool {
        match (self, other) {
            (RecipientRole::Company { role: a }, RecipientRole::Company { role: b }) => a == b,
            (RecipientRole::School(a), RecipientRole::School(b)) => a.name == b.name,
            _ => false,
        }
    }

    /// 角色是否属于给定的账号类别
    pub fn belongs_to(&self, kind: RecipientKind) -> bool {
        match self {
            RecipientRole::Company { .. } => kind == RecipientKind::CompanyAccount,
            RecipientRole::School(_) => kind == RecipientKind::SchoolAccount,
        }
    }
}

/// 已认证请求携带的 (userId, userKind, role?) 三元组
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub kind: RecipientKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<RecipientRole>,
}
