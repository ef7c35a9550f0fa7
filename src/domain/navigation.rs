use crate::domain::models::{PermissionKey, UserProfile};
use crate::domain::permissions::RolePermissionMap;
use crate::domain::quiz::QuizSession;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    Login,
    Home,
    HazardSubmit,
    ViolationSubmit,
    FeedbackSubmit,
    ReportList,
    Quiz,
    Regulations,
    Profile,
    Analytics,
    BackOffice,
    PermissionSettings,
}

impl Screen {
    pub fn title(&self) -> &'static str {
        match self {
            Screen::Login => "登录",
            Screen::Home => "首页",
            Screen::HazardSubmit => "隐患上报",
            Screen::ViolationSubmit => "违章上报",
            Screen::FeedbackSubmit => "隐患反馈",
            Screen::ReportList => "清单",
            Screen::Quiz => "每日答题",
            Screen::Regulations => "制度库",
            Screen::Profile => "我的",
            Screen::Analytics => "数据看板",
            Screen::BackOffice => "审核中心",
            Screen::PermissionSettings => "权限设置",
        }
    }

    pub fn required_key(&self) -> Option<PermissionKey> {
        match self {
            Screen::Login | Screen::Home | Screen::Profile => None,
            Screen::HazardSubmit => Some(PermissionKey::Hazard),
            Screen::ViolationSubmit => Some(PermissionKey::Violation),
            Screen::FeedbackSubmit => Some(PermissionKey::HazardFeedback),
            Screen::ReportList => Some(PermissionKey::ReportList),
            Screen::Quiz => Some(PermissionKey::Quiz),
            Screen::Regulations => Some(PermissionKey::Regulations),
            Screen::Analytics => Some(PermissionKey::Analytics),
            Screen::BackOffice => Some(PermissionKey::Backoffice),
            Screen::PermissionSettings => Some(PermissionKey::Permissions),
        }
    }

    /// Home-screen tiles and tab-bar buttons, in display order.
    pub const AFFORDANCES: [Screen; 10] = [
        Screen::HazardSubmit,
        Screen::FeedbackSubmit,
        Screen::ViolationSubmit,
        Screen::ReportList,
        Screen::Quiz,
        Screen::Analytics,
        Screen::Regulations,
        Screen::Profile,
        Screen::BackOffice,
        Screen::PermissionSettings,
    ];
}

pub const ACCESS_DENIED: &str = "当前角色无此权限";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NavOutcome {
    Entered { screen: Screen },
    Denied { screen: Screen, required: PermissionKey, message: &'static str },
    /// The login screen is only reached through logout.
    Invalid { screen: Screen },
    LoginRequired,
}

/// Identifies the screen visit an asynchronous operation started in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationTicket {
    pub screen: Screen,
    epoch: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Affordance {
    pub screen: Screen,
    pub label: &'static str,
}

/// Per-session navigation state. Without a user it always reports the
/// login screen.
#[derive(Debug)]
pub struct NavigationShell {
    user: Option<UserProfile>,
    screen: Screen,
    epoch: u64,
    draft: Option<String>,
    uploads: Vec<String>,
    quiz: Option<QuizSession>,
    last_active: Instant,
}

impl Default for NavigationShell {
    fn default() -> Self {
        Self::new()
    }
}

impl NavigationShell {
    pub fn new() -> Self {
        Self {
            user: None,
            screen: Screen::Login,
            epoch: 0,
            draft: None,
            uploads: Vec::new(),
            quiz: None,
            last_active: Instant::now(),
        }
    }

    pub fn signed_in(user: UserProfile) -> Self {
        let mut shell = Self::new();
        shell.set_user(user);
        shell
    }

    pub fn set_user(&mut self, user: UserProfile) {
        self.user = Some(user);
        self.enter(Screen::Home);
    }

    pub fn user(&self) -> Option<&UserProfile> {
        self.user.as_ref()
    }

    pub fn screen(&self) -> Screen {
        if self.user.is_none() {
            return Screen::Login;
        }
        self.screen
    }

    pub fn navigate(&mut self, target: Screen, permissions: &RolePermissionMap) -> NavOutcome {
        self.touch();
        let Some(user) = &self.user else {
            return NavOutcome::LoginRequired;
        };
        if target == Screen::Login {
            return NavOutcome::Invalid { screen: self.screen };
        }
        if let Some(required) = target.required_key() {
            if !permissions.has_permission(user.role, required) {
                tracing::warn!(
                    "Navigation to {:?} denied for {} ({}): missing {}",
                    target,
                    user.email,
                    user.role.as_str(),
                    required.as_str()
                );
                return NavOutcome::Denied {
                    screen: self.screen,
                    required,
                    message: ACCESS_DENIED,
                };
            }
        }
        if target != self.screen {
            self.enter(target);
        }
        NavOutcome::Entered { screen: target }
    }

    /// Returns to the login state and drops everything session-scoped.
    pub fn logout(&mut self) {
        self.user = None;
        self.enter(Screen::Login);
    }

    fn enter(&mut self, screen: Screen) {
        self.screen = screen;
        self.epoch += 1;
        self.draft = None;
        self.uploads.clear();
        if screen != Screen::Quiz {
            self.quiz = None;
        }
    }

    pub fn ticket(&self) -> OperationTicket {
        OperationTicket {
            screen: self.screen(),
            epoch: self.epoch,
        }
    }

    pub fn is_current(&self, ticket: &OperationTicket) -> bool {
        self.user.is_some() && ticket.epoch == self.epoch && ticket.screen == self.screen
    }

    /// Keeps the draft only if the user is still on the screen that asked for it.
    pub fn store_draft(&mut self, ticket: &OperationTicket, text: String) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.draft = Some(text);
        true
    }

    pub fn draft(&self) -> Option<&str> {
        self.draft.as_deref()
    }

    /// Image URLs uploaded during the current visit to a submission screen.
    pub fn uploads(&self) -> &[String] {
        &self.uploads
    }

    pub fn record_upload(&mut self, ticket: &OperationTicket, url: String) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.uploads.push(url);
        true
    }

    pub fn quiz(&self) -> Option<&QuizSession> {
        self.quiz.as_ref()
    }

    pub fn quiz_mut(&mut self) -> Option<&mut QuizSession> {
        self.quiz.as_mut()
    }

    pub fn start_quiz(&mut self, session: QuizSession) -> bool {
        if self.screen() != Screen::Quiz {
            return false;
        }
        self.quiz = Some(session);
        true
    }

    /// Screens the user may enter, used to decide which buttons to show.
    pub fn affordances(&self, permissions: &RolePermissionMap) -> Vec<Affordance> {
        let Some(user) = &self.user else {
            return Vec::new();
        };
        Screen::AFFORDANCES
            .into_iter()
            .filter(|screen| {
                screen
                    .required_key()
                    .map_or(true, |key| permissions.has_permission(user.role, key))
            })
            .map(|screen| Affordance {
                screen,
                label: screen.required_key().map_or("我的", |key| key.label()),
            })
            .collect()
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_active.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Choice, Question, UserRole};
    use uuid::Uuid;

    fn user(role: UserRole) -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            email: format!("{}@pakrut.com", role.as_str().to_lowercase()),
            display_name: "测试".into(),
            unit: "采矿厂".into(),
            role,
        }
    }

    const GATED: [Screen; 9] = [
        Screen::HazardSubmit,
        Screen::ViolationSubmit,
        Screen::FeedbackSubmit,
        Screen::ReportList,
        Screen::Quiz,
        Screen::Regulations,
        Screen::Analytics,
        Screen::BackOffice,
        Screen::PermissionSettings,
    ];

    #[test]
    fn unauthenticated_shell_is_stuck_on_login() {
        let mut shell = NavigationShell::new();
        let map = RolePermissionMap::default();
        assert_eq!(shell.screen(), Screen::Login);
        assert_eq!(shell.navigate(Screen::Home, &map), NavOutcome::LoginRequired);
        assert_eq!(shell.screen(), Screen::Login);
    }

    #[test]
    fn sign_in_lands_on_home() {
        let shell = NavigationShell::signed_in(user(UserRole::Worker));
        assert_eq!(shell.screen(), Screen::Home);
    }

    #[test]
    fn worker_cannot_open_backoffice() {
        let map = RolePermissionMap::default();
        let mut shell = NavigationShell::signed_in(user(UserRole::Worker));
        let before = shell.ticket();

        let outcome = shell.navigate(Screen::BackOffice, &map);
        assert!(matches!(
            outcome,
            NavOutcome::Denied { screen: Screen::Home, required: PermissionKey::Backoffice, .. }
        ));
        assert_eq!(shell.screen(), Screen::Home);
        assert!(shell.is_current(&before));
        // Same inputs, same answer.
        assert_eq!(shell.navigate(Screen::BackOffice, &map), outcome);
    }

    #[test]
    fn gated_navigation_follows_the_map_for_every_role() {
        let map = RolePermissionMap::default();
        for role in UserRole::ALL {
            for target in GATED {
                let mut shell = NavigationShell::signed_in(user(role));
                let allowed = map.has_permission(role, target.required_key().unwrap());
                let outcome = shell.navigate(target, &map);
                if allowed {
                    assert_eq!(outcome, NavOutcome::Entered { screen: target });
                    assert_eq!(shell.screen(), target);
                } else {
                    assert!(matches!(outcome, NavOutcome::Denied { .. }));
                    assert_eq!(shell.screen(), Screen::Home);
                }
            }
        }
    }

    #[test]
    fn ungated_screens_always_open() {
        let map = RolePermissionMap::empty();
        let mut shell = NavigationShell::signed_in(user(UserRole::Worker));
        assert_eq!(shell.navigate(Screen::Profile, &map), NavOutcome::Entered { screen: Screen::Profile });
        assert_eq!(shell.navigate(Screen::Home, &map), NavOutcome::Entered { screen: Screen::Home });
    }

    #[test]
    fn granting_report_list_opens_it_for_workers() {
        let map = RolePermissionMap::default();
        let mut shell = NavigationShell::signed_in(user(UserRole::Worker));
        assert!(matches!(shell.navigate(Screen::ReportList, &map), NavOutcome::Denied { .. }));

        let updated = map.with_role(
            UserRole::Worker,
            map.allowed(UserRole::Worker).iter().copied().chain([PermissionKey::ReportList]),
        );
        let mut fresh = NavigationShell::signed_in(user(UserRole::Worker));
        assert_eq!(
            fresh.navigate(Screen::ReportList, &updated),
            NavOutcome::Entered { screen: Screen::ReportList }
        );
    }

    #[test]
    fn login_is_not_a_navigation_target() {
        let map = RolePermissionMap::default();
        let mut shell = NavigationShell::signed_in(user(UserRole::Admin));
        assert_eq!(shell.navigate(Screen::Login, &map), NavOutcome::Invalid { screen: Screen::Home });
    }

    #[test]
    fn leaving_a_screen_invalidates_its_tickets_and_draft() {
        let map = RolePermissionMap::default();
        let mut shell = NavigationShell::signed_in(user(UserRole::Worker));
        shell.navigate(Screen::HazardSubmit, &map);
        let ticket = shell.ticket();
        assert!(shell.store_draft(&ticket, "草稿".into()));
        assert_eq!(shell.draft(), Some("草稿"));

        shell.navigate(Screen::Home, &map);
        assert!(shell.draft().is_none());
        assert!(!shell.store_draft(&ticket, "迟到的草稿".into()));

        // Coming back is a new visit.
        shell.navigate(Screen::HazardSubmit, &map);
        assert!(!shell.is_current(&ticket));
    }

    #[test]
    fn uploads_belong_to_one_visit() {
        let map = RolePermissionMap::default();
        let mut shell = NavigationShell::signed_in(user(UserRole::Worker));
        shell.navigate(Screen::ViolationSubmit, &map);
        let ticket = shell.ticket();
        assert!(shell.record_upload(&ticket, "https://cdn/1.jpg".into()));
        assert_eq!(shell.uploads(), ["https://cdn/1.jpg".to_string()]);

        shell.navigate(Screen::Home, &map);
        assert!(shell.uploads().is_empty());
        assert!(!shell.record_upload(&ticket, "https://cdn/2.jpg".into()));
        assert!(shell.uploads().is_empty());
    }

    #[test]
    fn renavigating_to_the_same_screen_keeps_the_visit() {
        let map = RolePermissionMap::default();
        let mut shell = NavigationShell::signed_in(user(UserRole::Worker));
        shell.navigate(Screen::HazardSubmit, &map);
        let ticket = shell.ticket();
        shell.navigate(Screen::HazardSubmit, &map);
        assert!(shell.is_current(&ticket));
    }

    #[test]
    fn quiz_session_dies_with_the_screen() {
        let map = RolePermissionMap::default();
        let mut shell = NavigationShell::signed_in(user(UserRole::Worker));
        let pool = vec![Question {
            id: 1,
            question: "安全帽的作用?".into(),
            option_a: "防护".into(),
            option_b: "装饰".into(),
            option_c: None,
            option_d: None,
            answer: Choice::A,
            analysis: String::new(),
        }];
        assert!(!shell.start_quiz(QuizSession::start(&pool, "Thu Jan 01 2026")));

        shell.navigate(Screen::Quiz, &map);
        assert!(shell.start_quiz(QuizSession::start(&pool, "Thu Jan 01 2026")));
        assert!(shell.quiz().is_some());

        shell.navigate(Screen::Home, &map);
        assert!(shell.quiz().is_none());
    }

    #[test]
    fn logout_clears_user_and_returns_to_login() {
        let map = RolePermissionMap::default();
        let mut shell = NavigationShell::signed_in(user(UserRole::Admin));
        shell.navigate(Screen::BackOffice, &map);
        let ticket = shell.ticket();
        shell.logout();
        assert_eq!(shell.screen(), Screen::Login);
        assert!(shell.user().is_none());
        assert!(!shell.is_current(&ticket));
    }

    #[test]
    fn affordances_follow_permissions() {
        let map = RolePermissionMap::default();
        let worker = NavigationShell::signed_in(user(UserRole::Worker));
        let screens: Vec<_> = worker.affordances(&map).into_iter().map(|a| a.screen).collect();
        assert_eq!(
            screens,
            vec![Screen::HazardSubmit, Screen::Quiz, Screen::Analytics, Screen::Regulations, Screen::Profile]
        );

        let admin = NavigationShell::signed_in(user(UserRole::Admin));
        assert_eq!(admin.affordances(&map).len(), Screen::AFFORDANCES.len());
    }
}
