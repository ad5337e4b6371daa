use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockkeep_core::{DocumentId, DomainError, DomainResult, UserId};

/// Maximum length of a document code.
pub const MAX_CODE_LEN: usize = 32;

/// Document status lifecycle.
///
/// `Draft` is the only editable state. `Confirmed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Draft,
    Confirmed,
    Cancelled,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Confirmed => "confirmed",
            DocumentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "draft" => Ok(DocumentStatus::Draft),
            "confirmed" => Ok(DocumentStatus::Confirmed),
            "cancelled" => Ok(DocumentStatus::Cancelled),
            other => Err(DomainError::validation(format!("unknown document status '{other}'"))),
        }
    }
}

impl core::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields and status rules shared by every document kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentHeader {
    pub id: DocumentId,
    pub code: String,
    pub status: DocumentStatus,
    pub created_by: UserId,
    pub remarks: Option<String>,
    pub confirmed_by: Option<UserId>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentHeader {
    /// A fresh draft header.
    pub fn draft(
        code: String,
        created_by: UserId,
        remarks: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let code = code.trim().to_string();
        if code.is_empty() {
            return Err(DomainError::validation("code cannot be empty"));
        }
        if code.chars().count() > MAX_CODE_LEN {
            return Err(DomainError::validation(format!(
                "code must be at most {MAX_CODE_LEN} characters"
            )));
        }
        Ok(Self {
            id: DocumentId::new(),
            code,
            status: DocumentStatus::Draft,
            created_by,
            remarks,
            confirmed_by: None,
            confirmed_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Reject `action` unless the document is still a draft.
    pub fn ensure_draft(&self, noun: &str, action: &str) -> DomainResult<()> {
        if self.status != DocumentStatus::Draft {
            return Err(DomainError::invalid_state(format!(
                "only draft {noun}s can be {action} ({noun} {} is {})",
                self.code, self.status
            )));
        }
        Ok(())
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    pub(crate) fn mark_confirmed(
        &mut self,
        noun: &str,
        confirmed_by: Option<UserId>,
        remarks: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_draft(noun, "confirmed")?;
        self.status = DocumentStatus::Confirmed;
        self.confirmed_by = confirmed_by;
        self.confirmed_at = Some(now);
        if remarks.is_some() {
            self.remarks = remarks;
        }
        self.updated_at = now;
        Ok(())
    }

    pub(crate) fn mark_cancelled(&mut self, noun: &str, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_draft(noun, "cancelled")?;
        self.status = DocumentStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }
}
