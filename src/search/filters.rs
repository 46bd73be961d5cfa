//! Structural filters applied to candidates after the vector query.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::{KgError, Result};
use crate::core::model::{EntityType, KnowledgeRecord, RelationType, SemanticCategory};
use crate::core::schema::validate_organization_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterLogic {
    #[default]
    And,
    Or,
}

impl std::str::FromStr for FilterLogic {
    type Err = KgError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "AND" => Ok(Self::And),
            "OR" => Ok(Self::Or),
            other => Err(KgError::invalid(format!("unknown filter logic '{}' (must be: and|or)", other))),
        }
    }
}

/// Field order is part of the cache key: append new fields at the end.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<EntityType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_type: Option<RelationType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_after: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_before: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_after: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub filter_logic: FilterLogic,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_semantic_category: Option<SemanticCategory>,
}

impl SearchFilters {
    pub fn for_organization(org: impl Into<String>) -> Self {
        Self {
            organization_id: Some(org.into()),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(org) = &self.organization_id {
            validate_organization_id(org)?;
        }
        if let (Some(after), Some(before)) = (self.created_after, self.created_before) {
            if after > before {
                return Err(KgError::invalid("created_after is later than created_before"));
            }
        }
        if let (Some(after), Some(before)) = (self.updated_after, self.updated_before) {
            if after > before {
                return Err(KgError::invalid("updated_after is later than updated_before"));
            }
        }
        Ok(())
    }

    /// Stable JSON form used for cache keys.
    pub fn canonical(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn has_predicates(&self) -> bool {
        self.entity_type.is_some()
            || self.relation_type.is_some()
            || self.topic_semantic_category.is_some()
            || self.created_after.is_some()
            || self.created_before.is_some()
            || self.updated_after.is_some()
            || self.updated_before.is_some()
    }

    /// Organization is a hard scope. The remaining predicates combine by
    /// `filter_logic`; type predicates only apply to their own record kind,
    /// and a record with no applicable predicate passes.
    pub fn matches(&self, record: &KnowledgeRecord) -> bool {
        if let Some(org) = &self.organization_id {
            if record.organization_id() != Some(org.as_str()) {
                return false;
            }
        }

        let mut checks: Vec<bool> = Vec::with_capacity(7);
        if let (Some(wanted), Some(actual)) = (self.entity_type, record.entity_type()) {
            checks.push(wanted == actual);
        }
        if let (Some(wanted), Some(actual)) = (self.relation_type, record.relation_type()) {
            checks.push(wanted == actual);
        }
        if let (Some(wanted), Some(actual)) = (&self.topic_semantic_category, record.semantic_category()) {
            checks.push(wanted == actual);
        }
        let created = record.created_at();
        let updated = record.updated_at();
        if let Some(t) = self.created_after {
            checks.push(created >= t);
        }
        if let Some(t) = self.created_before {
            checks.push(created <= t);
        }
        if let Some(t) = self.updated_after {
            checks.push(updated >= t);
        }
        if let Some(t) = self.updated_before {
            checks.push(updated <= t);
        }

        if checks.is_empty() {
            return true;
        }
        match self.filter_logic {
            FilterLogic::And => checks.iter().all(|c| *c),
            FilterLogic::Or => checks.iter().any(|c| *c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{Entity, Relation, Topic};
    use chrono::Duration;

    fn company(org: &str, age_days: i64) -> KnowledgeRecord {
        let mut e = Entity::new("e1", "Acme", EntityType::Company);
        e.organization_id = Some(org.to_string());
        e.created_at = Utc::now() - Duration::days(age_days);
        e.updated_at = e.created_at;
        KnowledgeRecord::Entity(e)
    }

    #[test]
    fn test_organization_is_hard_scope() {
        let filters = SearchFilters {
            organization_id: Some("org1".to_string()),
            filter_logic: FilterLogic::Or,
            ..Default::default()
        };
        assert!(filters.matches(&company("org1", 1)));
        assert!(!filters.matches(&company("org2", 1)));
    }

    #[test]
    fn test_and_versus_or() {
        let cutoff = Utc::now() - Duration::days(10);
        let mut filters = SearchFilters {
            entity_type: Some(EntityType::Person),
            created_after: Some(cutoff),
            ..Default::default()
        };
        let recent_company = company("org1", 1);

        assert!(!filters.matches(&recent_company));
        filters.filter_logic = FilterLogic::Or;
        assert!(filters.matches(&recent_company));
        assert!(!filters.matches(&company("org1", 30)));
    }

    #[test]
    fn test_type_predicates_only_apply_to_own_kind() {
        let filters = SearchFilters {
            entity_type: Some(EntityType::Person),
            ..Default::default()
        };
        let topic = KnowledgeRecord::Topic(Topic::new("t1", "Budget", ""));
        let relation = KnowledgeRecord::Relation(Relation::new("r1", "t1", RelationType::Uses, ""));
        assert!(filters.matches(&topic));
        assert!(filters.matches(&relation));
        assert!(!filters.matches(&company("org1", 1)));
    }

    #[test]
    fn test_topic_category_only_applies_to_topics() {
        let filters = SearchFilters {
            topic_semantic_category: Some(SemanticCategory::Decision),
            ..Default::default()
        };
        let mut decision = Topic::new("t1", "Budget approved", "");
        decision.semantic_category = SemanticCategory::Decision;
        let discussion = Topic::new("t2", "Budget options", "");

        assert!(filters.has_predicates());
        assert!(filters.matches(&KnowledgeRecord::Topic(decision)));
        assert!(!filters.matches(&KnowledgeRecord::Topic(discussion)));
        assert!(filters.matches(&company("org1", 1)));
        assert_ne!(filters.canonical(), SearchFilters::default().canonical());
    }

    #[test]
    fn test_canonical_is_stable() {
        let a = SearchFilters::for_organization("org1");
        let b = SearchFilters {
            organization_id: Some("org1".to_string()),
            ..Default::default()
        };
        assert_eq!(a.canonical(), b.canonical());
        assert_ne!(a.canonical(), SearchFilters::default().canonical());
    }

    #[test]
    fn test_validate_ranges() {
        let now = Utc::now();
        let filters = SearchFilters {
            created_after: Some(now),
            created_before: Some(now - Duration::days(1)),
            ..Default::default()
        };
        assert!(filters.validate().is_err());
        assert!("or".parse::<FilterLogic>().is_ok());
    }
}
