use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    Assigned,
    Unassigned,
    Resolved,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Assigned => "assigned",
            LeadStatus::Unassigned => "unassigned",
            LeadStatus::Resolved => "resolved",
        }
    }
}

impl std::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// A conversation partner as returned by `GET /contacts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    #[serde(default)]
    pub push_name: Option<String>,
    pub contact_identifier: String,
    pub lead_status: LeadStatus,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_messages: u32,
    #[serde(default)]
    pub agent_name: Option<String>,
}

impl Contact {
    /// Name to show in lists: push name when the contact has one.
    pub fn label(&self) -> &str {
        self.push_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.contact_identifier)
    }
}

/// One message row of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatLog {
    pub id: String,
    pub id_contact: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub media: Option<String>,
    pub from_me: bool,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactPage {
    pub items: Vec<Contact>,
    pub total_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatLogList {
    pub chatlogs: Vec<ChatLog>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeadCounts {
    pub assigned: usize,
    pub unassigned: usize,
    pub resolved: usize,
}

impl LeadCounts {
    pub fn tally(contacts: &[Contact]) -> Self {
        contacts.iter().fold(Self::default(), |mut acc, c| {
            match c.lead_status {
                LeadStatus::Assigned => acc.assigned += 1,
                LeadStatus::Unassigned => acc.unassigned += 1,
                LeadStatus::Resolved => acc.resolved += 1,
            }
            acc
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(id: &str, status: LeadStatus) -> Contact {
        Contact {
            id: id.into(),
            push_name: None,
            contact_identifier: format!("+55{id}"),
            lead_status: status,
            last_message: None,
            last_message_at: None,
            unread_messages: 0,
            agent_name: None,
        }
    }

    #[test]
    fn tally_counts_each_status() {
        let list = vec![
            contact("1", LeadStatus::Assigned),
            contact("2", LeadStatus::Unassigned),
            contact("3", LeadStatus::Unassigned),
            contact("4", LeadStatus::Resolved),
        ];
        assert_eq!(
            LeadCounts::tally(&list),
            LeadCounts { assigned: 1, unassigned: 2, resolved: 1 }
        );
        assert_eq!(LeadCounts::tally(&[]), LeadCounts::default());
    }

    #[test]
    fn contact_page_decodes_with_missing_optionals() {
        let json = r#"{
            "items": [{"id": "1", "contact_identifier": "5511999", "lead_status": "unassigned"}],
            "total_count": 1
        }"#;
        let page: ContactPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.items[0].unread_messages, 0);
        assert_eq!(page.items[0].label(), "5511999");
    }

    #[test]
    fn unknown_lead_status_is_rejected() {
        let json = r#"{"id": "1", "contact_identifier": "x", "lead_status": "archived"}"#;
        assert!(serde_json::from_str::<Contact>(json).is_err());
    }

    #[test]
    fn chatlog_list_requires_chatlogs_key() {
        assert!(serde_json::from_str::<ChatLogList>(r#"{"data": []}"#).is_err());
        let ok: ChatLogList = serde_json::from_str(
            r#"{"chatlogs": [{"id": "m1", "id_contact": "1", "message": "oi", "type": "text",
                "from_me": false, "sent_at": "2024-05-01T10:00:00Z"}]}"#,
        )
        .unwrap();
        assert_eq!(ok.chatlogs[0].kind, "text");
    }
}
