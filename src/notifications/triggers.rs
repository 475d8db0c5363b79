//! Static trigger configuration: what each event type renders to, how it is
//! deduplicated and grouped, and whether quiet hours apply to it.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    CommentReply,
    PostComment,
    PostUpvote,
    MentorRequest,
    MentorRequestAccepted,
    MentoringSessionReminder,
    ApplicationStatusChanged,
    JobMatch,
    OnboardingReminder,
    DocumentShared,
    SecurityAlert,
}

impl NotificationType {
    pub const ALL: [NotificationType; 11] = [
        NotificationType::CommentReply,
        NotificationType::PostComment,
        NotificationType::PostUpvote,
        NotificationType::MentorRequest,
        NotificationType::MentorRequestAccepted,
        NotificationType::MentoringSessionReminder,
        NotificationType::ApplicationStatusChanged,
        NotificationType::JobMatch,
        NotificationType::OnboardingReminder,
        NotificationType::DocumentShared,
        NotificationType::SecurityAlert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::CommentReply => "comment_reply",
            NotificationType::PostComment => "post_comment",
            NotificationType::PostUpvote => "post_upvote",
            NotificationType::MentorRequest => "mentor_request",
            NotificationType::MentorRequestAccepted => "mentor_request_accepted",
            NotificationType::MentoringSessionReminder => "mentoring_session_reminder",
            NotificationType::ApplicationStatusChanged => "application_status_changed",
            NotificationType::JobMatch => "job_match",
            NotificationType::OnboardingReminder => "onboarding_reminder",
            NotificationType::DocumentShared => "document_shared",
            NotificationType::SecurityAlert => "security_alert",
        }
    }

    pub fn config(&self) -> &'static TriggerConfig {
        trigger_config(*self)
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NotificationType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown notification type: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    Community,
    Mentoring,
    Jobs,
    Onboarding,
    Documents,
    System,
}

impl NotificationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationCategory::Community => "community",
            NotificationCategory::Mentoring => "mentoring",
            NotificationCategory::Jobs => "jobs",
            NotificationCategory::Onboarding => "onboarding",
            NotificationCategory::Documents => "documents",
            NotificationCategory::System => "system",
        }
    }
}

impl FromStr for NotificationCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "community" => Ok(NotificationCategory::Community),
            "mentoring" => Ok(NotificationCategory::Mentoring),
            "jobs" => Ok(NotificationCategory::Jobs),
            "onboarding" => Ok(NotificationCategory::Onboarding),
            "documents" => Ok(NotificationCategory::Documents),
            "system" => Ok(NotificationCategory::System),
            other => Err(format!("unknown notification category: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Priority {
    /// Value for the web push `Urgency` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GroupingPolicy {
    pub window: Duration,
    /// Summary templates. `{count}` and `{actor_names}` are filled in at flush.
    pub group_title: &'static str,
    pub group_body: &'static str,
}

#[derive(Debug, Clone)]
pub struct TriggerConfig {
    pub event_type: NotificationType,
    pub category: NotificationCategory,
    pub title: &'static str,
    pub body: &'static str,
    pub url: Option<&'static str>,
    pub grouping: Option<GroupingPolicy>,
    /// Zero disables deduplication.
    pub dedup_window: Duration,
    pub priority: Priority,
    pub respects_quiet_hours: bool,
}

impl TriggerConfig {
    pub fn is_grouped(&self) -> bool {
        self.grouping.is_some()
    }
}

macro_rules! trigger {
    ($ty:ident, $cat:ident, $title:expr, $body:expr, $url:expr, $grouping:expr, $dedup_mins:expr, $prio:ident, $quiet:expr) => {
        TriggerConfig {
            event_type: NotificationType::$ty,
            category: NotificationCategory::$cat,
            title: $title,
            body: $body,
            url: $url,
            grouping: $grouping,
            dedup_window: Duration::minutes($dedup_mins),
            priority: Priority::$prio,
            respects_quiet_hours: $quiet,
        }
    };
}

fn grouping(minutes: i64, group_title: &'static str, group_body: &'static str) -> Option<GroupingPolicy> {
    Some(GroupingPolicy {
        window: Duration::minutes(minutes),
        group_title,
        group_body,
    })
}

static TRIGGERS: once_cell::sync::Lazy<Vec<TriggerConfig>> = once_cell::sync::Lazy::new(|| {
    vec![
        trigger!(
            CommentReply, Community,
            "New reply",
            "{actor_name} replied to your comment on \"{post_title}\"",
            Some("/community/posts/{post_id}"),
            grouping(10, "{count} new replies", "{actor_names} replied to your comment on \"{post_title}\""),
            5, Normal, true
        ),
        trigger!(
            PostComment, Community,
            "New comment",
            "{actor_name} commented on \"{post_title}\"",
            Some("/community/posts/{post_id}"),
            grouping(15, "{count} new comments", "{actor_names} commented on \"{post_title}\""),
            5, Normal, true
        ),
        trigger!(
            PostUpvote, Community,
            "Your post was upvoted",
            "{actor_name} upvoted \"{post_title}\"",
            Some("/community/posts/{post_id}"),
            grouping(60, "{count} new upvotes", "{actor_names} upvoted \"{post_title}\""),
            60, Low, true
        ),
        trigger!(
            MentorRequest, Mentoring,
            "New mentoring request",
            "{actor_name} would like you to be their mentor",
            Some("/mentoring/requests"),
            None,
            60, High, true
        ),
        trigger!(
            MentorRequestAccepted, Mentoring,
            "Mentoring request accepted",
            "{actor_name} accepted your mentoring request",
            Some("/mentoring"),
            None,
            60, High, true
        ),
        trigger!(
            MentoringSessionReminder, Mentoring,
            "Upcoming mentoring session",
            "Your session with {actor_name} starts at {starts_at}",
            Some("/mentoring/sessions/{session_id}"),
            None,
            60, High, true
        ),
        trigger!(
            ApplicationStatusChanged, Jobs,
            "Application update",
            "Your application for {job_title} moved to {status}",
            Some("/jobs/pipeline"),
            None,
            1, Normal, true
        ),
        trigger!(
            JobMatch, Jobs,
            "New job match",
            "{job_title} at {company} matches your profile",
            Some("/jobs/search"),
            grouping(120, "{count} new job matches", "New roles match your profile, including {job_title} at {company}"),
            720, Low, true
        ),
        trigger!(
            OnboardingReminder, Onboarding,
            "Finish setting up your profile",
            "You're {progress}% done. Pick up where you left off.",
            Some("/onboarding"),
            None,
            1440, Low, true
        ),
        trigger!(
            DocumentShared, Documents,
            "Document shared with you",
            "{actor_name} shared \"{document_name}\"",
            Some("/documents/{document_id}"),
            None,
            5, Normal, true
        ),
        trigger!(
            SecurityAlert, System,
            "Security alert",
            "{message}",
            Some("/settings/security"),
            None,
            0, High, false
        ),
    ]
});

pub fn trigger_config(event_type: NotificationType) -> &'static TriggerConfig {
    // Table order matches `NotificationType::ALL`.
    let idx = NotificationType::ALL
        .iter()
        .position(|t| *t == event_type)
        .unwrap_or_default();
    &TRIGGERS[idx]
}

/// Fills `{name}` placeholders from `vars`. Unknown placeholders render
/// empty; `{{` and `}}` produce literal braces.
pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for n in chars.by_ref() {
                    if n == '}' {
                        closed = true;
                        break;
                    }
                    name.push(n);
                }
                if closed {
                    if let Some(value) = vars.get(name.trim()) {
                        out.push_str(value);
                    }
                } else {
                    out.push('{');
                    out.push_str(&name);
                }
            }
            other => out.push(other),
        }
    }

    out
}
