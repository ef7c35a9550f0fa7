use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_IMAGES: usize = 4;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin,
    SafetyOfficer,
    Worker,
}

impl UserRole {
    pub const ALL: [UserRole; 3] = [UserRole::Admin, UserRole::SafetyOfficer, UserRole::Worker];

    /// Role used when a lookup cannot be resolved.
    pub const LOWEST: UserRole = UserRole::Worker;

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "ADMIN",
            UserRole::SafetyOfficer => "SAFETY_OFFICER",
            UserRole::Worker => "WORKER",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            UserRole::Admin => "系统管理员",
            UserRole::SafetyOfficer => "安全管理人员",
            UserRole::Worker => "基层员工",
        }
    }

    /// Maps both the native names and the identity provider's names
    /// (`super_admin`, `manager`, `worker`). Unknown values collapse to
    /// the lowest-privilege role.
    pub fn from_provider(raw: &str) -> UserRole {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" | "super_admin" => UserRole::Admin,
            "safety_officer" | "manager" => UserRole::SafetyOfficer,
            "worker" => UserRole::Worker,
            other => {
                tracing::warn!("Unknown role '{}', falling back to {}", other, UserRole::LOWEST.as_str());
                UserRole::LOWEST
            }
        }
    }

    pub fn parse(raw: &str) -> Option<UserRole> {
        UserRole::ALL.into_iter().find(|r| r.as_str() == raw)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKey {
    Hazard,
    Violation,
    HazardFeedback,
    ReportList,
    Quiz,
    Analytics,
    Regulations,
    Backoffice,
    Permissions,
}

impl PermissionKey {
    pub const ALL: [PermissionKey; 9] = [
        PermissionKey::Hazard,
        PermissionKey::Violation,
        PermissionKey::HazardFeedback,
        PermissionKey::ReportList,
        PermissionKey::Quiz,
        PermissionKey::Analytics,
        PermissionKey::Regulations,
        PermissionKey::Backoffice,
        PermissionKey::Permissions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionKey::Hazard => "hazard",
            PermissionKey::Violation => "violation",
            PermissionKey::HazardFeedback => "hazard_feedback",
            PermissionKey::ReportList => "report_list",
            PermissionKey::Quiz => "quiz",
            PermissionKey::Analytics => "analytics",
            PermissionKey::Regulations => "regulations",
            PermissionKey::Backoffice => "backoffice",
            PermissionKey::Permissions => "permissions",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PermissionKey::Hazard => "隐患上报",
            PermissionKey::Violation => "违章上报",
            PermissionKey::HazardFeedback => "隐患反馈",
            PermissionKey::ReportList => "查看/导出清单",
            PermissionKey::Quiz => "每日答题",
            PermissionKey::Analytics => "数据看板",
            PermissionKey::Regulations => "制度库管理",
            PermissionKey::Backoffice => "审核中心访问",
            PermissionKey::Permissions => "权限策略配置",
        }
    }

    pub fn group(&self) -> &'static str {
        match self {
            PermissionKey::Hazard
            | PermissionKey::Violation
            | PermissionKey::HazardFeedback
            | PermissionKey::Quiz => "基础业务",
            PermissionKey::Analytics | PermissionKey::Regulations | PermissionKey::ReportList => "管理功能",
            PermissionKey::Backoffice | PermissionKey::Permissions => "系统权限",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub unit: String,
    pub role: UserRole,
}

impl UserProfile {
    pub fn role_label(&self) -> &'static str {
        self.role.label()
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportStatus {
    Pending,
    Confirmed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "PENDING",
            ReportStatus::Confirmed => "CONFIRMED",
        }
    }

    pub fn parse(raw: &str) -> Option<ReportStatus> {
        match raw {
            "PENDING" => Some(ReportStatus::Pending),
            "CONFIRMED" => Some(ReportStatus::Confirmed),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum HazardLevel {
    #[serde(rename = "一般")]
    General,
    #[serde(rename = "重大")]
    Major,
}

impl HazardLevel {
    pub fn label(&self) -> &'static str {
        match self {
            HazardLevel::General => "一般",
            HazardLevel::Major => "重大",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ViolationSeverity {
    #[serde(rename = "一般违章")]
    General,
    #[serde(rename = "严重违章")]
    Serious,
}

impl ViolationSeverity {
    pub fn label(&self) -> &'static str {
        match self {
            ViolationSeverity::General => "一般违章",
            ViolationSeverity::Serious => "严重违章",
        }
    }
}

/// Ordered image references, at most [`MAX_IMAGES`].
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ImageRefs(Vec<String>);

impl ImageRefs {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<String>> for ImageRefs {
    type Error = String;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        if value.len() > MAX_IMAGES {
            return Err(format!("at most {MAX_IMAGES} images per report, got {}", value.len()));
        }
        Ok(ImageRefs(value))
    }
}

impl From<ImageRefs> for Vec<String> {
    fn from(value: ImageRefs) -> Self {
        value.0
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReportDetails {
    Hazard {
        level: HazardLevel,
        location: String,
        deadline: Option<NaiveDate>,
        responsible_person: Option<String>,
    },
    Violation {
        violator: String,
        severity: ViolationSeverity,
        location: String,
    },
    Feedback {
        hazard_id: String,
    },
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Hazard,
    Violation,
    Feedback,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Hazard => "hazard",
            ReportKind::Violation => "violation",
            ReportKind::Feedback => "feedback",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReportKind::Hazard => "隐患",
            ReportKind::Violation => "违章",
            ReportKind::Feedback => "反馈",
        }
    }

    pub fn parse(raw: &str) -> Option<ReportKind> {
        match raw {
            "hazard" => Some(ReportKind::Hazard),
            "violation" => Some(ReportKind::Violation),
            "feedback" => Some(ReportKind::Feedback),
            _ => None,
        }
    }
}

impl ReportDetails {
    pub fn kind(&self) -> ReportKind {
        match self {
            ReportDetails::Hazard { .. } => ReportKind::Hazard,
            ReportDetails::Violation { .. } => ReportKind::Violation,
            ReportDetails::Feedback { .. } => ReportKind::Feedback,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportItem {
    pub id: String,
    pub status: ReportStatus,
    /// Epoch milliseconds.
    pub created_at: i64,
    pub reporter: String,
    pub unit: String,
    pub description: String,
    pub images: ImageRefs,
    pub draft: Option<String>,
    pub completed: bool,
    pub details: ReportDetails,
}

impl ReportItem {
    pub fn kind(&self) -> ReportKind {
        self.details.kind()
    }

    /// PENDING -> CONFIRMED. Returns whether anything changed.
    pub fn confirm(&mut self) -> bool {
        match self.status {
            ReportStatus::Pending => {
                self.status = ReportStatus::Confirmed;
                true
            }
            ReportStatus::Confirmed => false,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Choice {
    A,
    B,
    C,
    D,
}

impl Choice {
    pub fn parse(raw: &str) -> Option<Choice> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "A" => Some(Choice::A),
            "B" => Some(Choice::B),
            "C" => Some(Choice::C),
            "D" => Some(Choice::D),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Choice::A => "A",
            Choice::B => "B",
            Choice::C => "C",
            Choice::D => "D",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Question {
    pub id: i64,
    pub question: String,
    pub option_a: String,
    pub option_b: String,
    pub option_c: Option<String>,
    pub option_d: Option<String>,
    pub answer: Choice,
    pub analysis: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreTotals {
    pub total_points: i64,
    pub yearly_points: i64,
    pub year: i32,
    pub last_quiz_score: Option<i32>,
    pub last_quiz_date: Option<NaiveDate>,
}

pub const REGULATION_CATEGORIES: [&str; 4] = [
    "国家安全环保法律法规",
    "集团公司安全环保制度",
    "二级单位安全环保制度",
    "三级单位安全环保制度",
];

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Regulation {
    pub id: Uuid,
    pub title: String,
    pub category: String,
    pub file_url: String,
    pub storage_path: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_roles_map_onto_native_roles() {
        assert_eq!(UserRole::from_provider("super_admin"), UserRole::Admin);
        assert_eq!(UserRole::from_provider("manager"), UserRole::SafetyOfficer);
        assert_eq!(UserRole::from_provider("WORKER"), UserRole::Worker);
        assert_eq!(UserRole::from_provider("contractor"), UserRole::Worker);
    }

    #[test]
    fn image_refs_reject_more_than_four() {
        let five: Vec<String> = (0..5).map(|i| format!("img-{i}")).collect();
        assert!(ImageRefs::try_from(five).is_err());

        let parsed: Result<ImageRefs, _> = serde_json::from_str(r#"["a","b","c","d","e"]"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn confirm_only_moves_forward() {
        let mut item = ReportItem {
            id: "2026-001".into(),
            status: ReportStatus::Pending,
            created_at: 0,
            reporter: "张三".into(),
            unit: "采矿厂".into(),
            description: "灭火器过期".into(),
            images: ImageRefs::default(),
            draft: None,
            completed: false,
            details: ReportDetails::Feedback { hazard_id: "2026-000".into() },
        };
        assert!(item.confirm());
        assert!(!item.confirm());
        assert_eq!(item.status, ReportStatus::Confirmed);
    }

    #[test]
    fn details_serialize_with_kind_tag() {
        let details = ReportDetails::Violation {
            violator: "李四".into(),
            severity: ViolationSeverity::Serious,
            location: "井口".into(),
        };
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["kind"], "violation");
        assert_eq!(json["severity"], "严重违章");
    }
}
