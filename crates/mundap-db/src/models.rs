/// Database row types — these map directly to table rows.
/// Distinct from mundap-types API views to keep the DB layer independent.
use chrono::{DateTime, Utc};
use uuid::Uuid;

use mundap_types::models::{PairStatus, Role, UserStatus};

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub phone_ciphertext: String,
    pub phone_iv: String,
    pub phone_lookup: String,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PairRow {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub child_id: Option<Uuid>,
    pub status: PairStatus,
    pub invitation_token: Option<String>,
    pub invitation_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PairRow {
    /// A pending pair holding only the inviter.
    pub fn invitation(
        inviter: Uuid,
        inviter_role: Role,
        token: String,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let (parent_id, child_id) = match inviter_role {
            Role::Parent => (Some(inviter), None),
            Role::Child => (None, Some(inviter)),
        };
        Self {
            id: Uuid::new_v4(),
            parent_id,
            child_id,
            status: PairStatus::Pending,
            invitation_token: Some(token),
            invitation_expires_at: Some(expires_at),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_member(&self, user_id: Uuid) -> bool {
        self.parent_id == Some(user_id) || self.child_id == Some(user_id)
    }

    pub fn partner_of(&self, user_id: Uuid) -> Option<Uuid> {
        if self.parent_id == Some(user_id) {
            self.child_id
        } else if self.child_id == Some(user_id) {
            self.parent_id
        } else {
            None
        }
    }

    /// The role still missing from the pair, if exactly one slot is empty.
    pub fn open_role(&self) -> Option<Role> {
        match (self.parent_id, self.child_id) {
            (Some(_), None) => Some(Role::Child),
            (None, Some(_)) => Some(Role::Parent),
            _ => None,
        }
    }

    /// The member who created the invitation, while the pair is still half-full.
    pub fn inviter(&self) -> Option<Uuid> {
        match (self.parent_id, self.child_id) {
            (Some(id), None) | (None, Some(id)) => Some(id),
            _ => None,
        }
    }

    /// Only active pairs with both members may exchange answers.
    pub fn is_usable(&self) -> bool {
        self.status == PairStatus::Active && self.parent_id.is_some() && self.child_id.is_some()
    }

    pub fn invitation_expired(&self, now: DateTime<Utc>) -> bool {
        self.invitation_expires_at.is_none_or(|at| at <= now)
    }
}

#[derive(Debug, Clone)]
pub struct QuestionRow {
    pub id: i64,
    pub content: String,
    pub category: String,
    pub order_num: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewQuestion {
    pub content: String,
    pub category: String,
    /// Appended after the current last question when absent.
    pub order_num: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct AnswerRow {
    pub id: Uuid,
    pub question_id: i64,
    pub user_id: Uuid,
    pub pair_id: Uuid,
    pub content: String,
    pub answered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An answer joined with its author and question.
#[derive(Debug, Clone)]
pub struct AnswerDetailRow {
    pub answer: AnswerRow,
    pub author_name: String,
    pub author_role: Role,
    pub question_content: String,
    pub category: String,
}

#[derive(Debug, Clone)]
pub struct ReactionRow {
    pub answer_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// One answered question in a pair's history.
#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub question_id: i64,
    pub last_answered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn invitation_fills_the_inviter_slot() {
        let inviter = Uuid::new_v4();
        let now = Utc::now();
        let pair = PairRow::invitation(inviter, Role::Parent, "ABCD2345".into(), now + Duration::hours(24), now);
        assert_eq!(pair.parent_id, Some(inviter));
        assert_eq!(pair.open_role(), Some(Role::Child));
        assert_eq!(pair.inviter(), Some(inviter));
        assert!(!pair.is_usable());
        assert!(!pair.invitation_expired(now));
        assert!(pair.invitation_expired(now + Duration::hours(25)));
    }

    #[test]
    fn partner_lookup_is_symmetric() {
        let parent = Uuid::new_v4();
        let child = Uuid::new_v4();
        let now = Utc::now();
        let mut pair = PairRow::invitation(child, Role::Child, "ABCD2345".into(), now, now);
        pair.parent_id = Some(parent);
        pair.status = PairStatus::Active;

        assert!(pair.is_usable());
        assert_eq!(pair.partner_of(parent), Some(child));
        assert_eq!(pair.partner_of(child), Some(parent));
        assert_eq!(pair.partner_of(Uuid::new_v4()), None);
        assert_eq!(pair.open_role(), None);
    }
}
