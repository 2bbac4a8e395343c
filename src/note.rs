//! Note record types and their [`Record`] implementation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::Record;

/// A note as held by the store and the remote record service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
  pub id: String,
  pub owner: String,
  pub title: String,
  pub body: String,
  pub tags: Vec<String>,
  pub category: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// Fields for creating a note. Anything left `None` gets a default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteDraft {
  pub title: Option<String>,
  pub body: Option<String>,
  pub tags: Option<Vec<String>>,
  pub category: Option<String>,
}

/// Partial update for a note. `None` fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotePatch {
  pub title: Option<String>,
  pub body: Option<String>,
  pub tags: Option<Vec<String>>,
  pub category: Option<String>,
}

impl Record for Note {
  type Draft = NoteDraft;
  type Patch = NotePatch;

  fn id(&self) -> &str {
    &self.id
  }

  fn owner(&self) -> &str {
    &self.owner
  }

  fn updated_at(&self) -> DateTime<Utc> {
    self.updated_at
  }

  fn from_draft(scope: &str, draft: &NoteDraft, temp_id: String, now: DateTime<Utc>) -> Self {
    Self {
      id: temp_id,
      owner: scope.to_string(),
      title: draft.title.clone().unwrap_or_default(),
      body: draft.body.clone().unwrap_or_default(),
      tags: draft.tags.clone().unwrap_or_default(),
      category: draft.category.clone(),
      created_at: now,
      updated_at: now,
    }
  }

  fn apply_patch(&self, patch: &NotePatch, now: DateTime<Utc>) -> Self {
    let mut next = self.clone();
    if let Some(title) = &patch.title {
      next.title = title.clone();
    }
    if let Some(body) = &patch.body {
      next.body = body.clone();
    }
    if let Some(tags) = &patch.tags {
      next.tags = tags.clone();
    }
    if let Some(category) = &patch.category {
      next.category = Some(category.clone());
    }
    next.updated_at = now;
    next
  }

  fn search_text(&self) -> Vec<&str> {
    let mut fields = vec![self.title.as_str(), self.body.as_str()];
    fields.extend(self.tags.iter().map(String::as_str));
    if let Some(category) = &self.category {
      fields.push(category);
    }
    fields
  }

  fn record_type() -> &'static str {
    "note"
  }
}
