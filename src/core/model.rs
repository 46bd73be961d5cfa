//! Knowledge-graph records: entities, relations, topics and initiatives.
//!
//! Metadata is typed per record kind with an open extension map for fields
//! the schema does not know about. Records are validated when they enter the
//! system (ingest, store reads) rather than at every use site.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{KgError, Result};

/// The three searchable record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Entity,
    Relation,
    Topic,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [RecordKind::Entity, RecordKind::Relation, RecordKind::Topic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::Relation => "relation",
            Self::Topic => "topic",
        }
    }

    /// Vector-store collection holding this kind's embeddings.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Entity => "entities",
            Self::Relation => "relations",
            Self::Topic => "topics",
        }
    }

    /// Tie-break rank for equal scores; lower sorts first.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Entity => 0,
            Self::Relation => 1,
            Self::Topic => 2,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = KgError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "entity" | "entities" => Ok(Self::Entity),
            "relation" | "relations" => Ok(Self::Relation),
            "topic" | "topics" => Ok(Self::Topic),
            other => Err(KgError::invalid(format!(
                "unknown record kind '{}' (must be: entity|relation|topic)",
                other
            ))),
        }
    }
}

macro_rules! string_enum {
    ($name:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = KgError;

            fn from_str(s: &str) -> Result<Self> {
                let needle = s.trim().to_lowercase();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == needle)
                    .ok_or_else(|| KgError::invalid(format!("unknown {} '{}'", $label, s)))
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Person,
    Company,
    Product,
    Project,
    Organization,
    Location,
    Technology,
    Other,
}

string_enum!(EntityType, "entity type", {
    Person => "person",
    Company => "company",
    Product => "product",
    Project => "project",
    Organization => "organization",
    Location => "location",
    Technology => "technology",
    Other => "other",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationType {
    Subsidiary,
    Uses,
    Invests,
    Employs,
    Partners,
    Competes,
    Supplies,
    Owns,
    LocatedIn,
    WorksFor,
    Manages,
    ReportsTo,
    RelatedTo,
    Other,
}

string_enum!(RelationType, "relation type", {
    Subsidiary => "subsidiary",
    Uses => "uses",
    Invests => "invests",
    Employs => "employs",
    Partners => "partners",
    Competes => "competes",
    Supplies => "supplies",
    Owns => "owns",
    LocatedIn => "located-in",
    WorksFor => "works-for",
    Manages => "manages",
    ReportsTo => "reports-to",
    RelatedTo => "related-to",
    Other => "other",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    High,
    #[default]
    Medium,
    Low,
}

/// Topic category: one of the known labels or a free-form string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SemanticCategory {
    ActionItem,
    Decision,
    Discussion,
    Issue,
    Risk,
    Opportunity,
    Question,
    Summary,
    FollowUp,
    Reference,
    Other,
    Custom(String),
}

impl SemanticCategory {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ActionItem => "action-item",
            Self::Decision => "decision",
            Self::Discussion => "discussion",
            Self::Issue => "issue",
            Self::Risk => "risk",
            Self::Opportunity => "opportunity",
            Self::Question => "question",
            Self::Summary => "summary",
            Self::FollowUp => "follow-up",
            Self::Reference => "reference",
            Self::Other => "other",
            Self::Custom(s) => s,
        }
    }
}

impl Default for SemanticCategory {
    fn default() -> Self {
        Self::Other
    }
}

impl From<String> for SemanticCategory {
    fn from(s: String) -> Self {
        match s.as_str() {
            "action-item" => Self::ActionItem,
            "decision" => Self::Decision,
            "discussion" => Self::Discussion,
            "issue" => Self::Issue,
            "risk" => Self::Risk,
            "opportunity" => Self::Opportunity,
            "question" => Self::Question,
            "summary" => Self::Summary,
            "follow-up" => Self::FollowUp,
            "reference" => Self::Reference,
            "other" => Self::Other,
            _ => Self::Custom(s),
        }
    }
}

impl From<SemanticCategory> for String {
    fn from(c: SemanticCategory) -> Self {
        c.as_str().to_string()
    }
}

/// Which model produced a record's vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingInfo {
    pub model_id: String,
    pub version: String,
}

/// Typed attributes, one shape per entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntityAttributes {
    Person {
        title: Option<String>,
        company: Option<String>,
    },
    Company {
        industry: Option<String>,
        website: Option<String>,
        headquarters: Option<String>,
    },
    Product {
        vendor: Option<String>,
        category: Option<String>,
    },
    Project {
        status: Option<String>,
        owner: Option<String>,
    },
    Location {
        country: Option<String>,
        city: Option<String>,
    },
    Technology {
        category: Option<String>,
        version: Option<String>,
    },
}

impl EntityAttributes {
    fn accepts(&self, entity_type: EntityType) -> bool {
        matches!(
            (self, entity_type),
            (Self::Person { .. }, EntityType::Person)
                | (Self::Company { .. }, EntityType::Company)
                | (Self::Company { .. }, EntityType::Organization)
                | (Self::Product { .. }, EntityType::Product)
                | (Self::Project { .. }, EntityType::Project)
                | (Self::Location { .. }, EntityType::Location)
                | (Self::Technology { .. }, EntityType::Technology)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<EntityAttributes>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, Value>,
}

impl EntityMetadata {
    pub fn is_empty(&self) -> bool {
        self.attributes.is_none() && self.extensions.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RelationMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub metadata: EntityMetadata,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub embedding: Option<EmbeddingInfo>,
    #[serde(default)]
    pub chroma_synced: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, entity_type: EntityType) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            entity_type,
            aliases: Vec::new(),
            metadata: EntityMetadata::default(),
            organization_id: None,
            embedding: None,
            chroma_synced: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Parse an untrusted JSON object into a validated entity.
    pub fn from_json(value: Value) -> Result<Self> {
        let entity: Entity = serde_json::from_value(value)?;
        entity.validate()?;
        Ok(entity)
    }

    pub fn validate(&self) -> Result<()> {
        require_id("entity", &self.id)?;
        if self.name.trim().is_empty() {
            return Err(KgError::invalid(format!("entity '{}' has an empty name", self.id)));
        }
        if let Some(attrs) = &self.metadata.attributes {
            if !attrs.accepts(self.entity_type) {
                return Err(KgError::invalid(format!(
                    "entity '{}' of type {} carries mismatched attributes",
                    self.id, self.entity_type
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    pub topic_id: String,
    #[serde(default)]
    pub source_entity_id: Option<String>,
    #[serde(default)]
    pub target_entity_id: Option<String>,
    pub relation_type: RelationType,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub metadata: RelationMetadata,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub embedding: Option<EmbeddingInfo>,
    #[serde(default)]
    pub chroma_synced: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_confidence() -> f32 {
    1.0
}

impl Relation {
    pub fn new(
        id: impl Into<String>,
        topic_id: impl Into<String>,
        relation_type: RelationType,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            topic_id: topic_id.into(),
            source_entity_id: None,
            target_entity_id: None,
            relation_type,
            description: description.into(),
            confidence: 1.0,
            metadata: RelationMetadata::default(),
            organization_id: None,
            embedding: None,
            chroma_synced: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<()> {
        require_id("relation", &self.id)?;
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(KgError::invalid(format!(
                "relation '{}' confidence {} outside [0, 1]",
                self.id, self.confidence
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub semantic_category: SemanticCategory,
    #[serde(default)]
    pub importance: Importance,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub embedding: Option<EmbeddingInfo>,
    #[serde(default)]
    pub chroma_synced: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Topic {
    pub fn new(id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            semantic_category: SemanticCategory::default(),
            importance: Importance::default(),
            keywords: Vec::new(),
            organization_id: None,
            embedding: None,
            chroma_synced: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<()> {
        require_id("topic", &self.id)?;
        if self.title.trim().is_empty() {
            return Err(KgError::invalid(format!("topic '{}' has an empty title", self.id)));
        }
        Ok(())
    }
}

/// Parent record referencing topics by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Initiative {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub topic_ids: Vec<String>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn require_id(kind: &str, id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(KgError::invalid(format!("{} id must not be empty", kind)));
    }
    Ok(())
}

/// A record of any kind, as returned by the relational store.
#[derive(Debug, Clone, PartialEq)]
pub enum KnowledgeRecord {
    Entity(Entity),
    Relation(Relation),
    Topic(Topic),
}

impl KnowledgeRecord {
    pub fn id(&self) -> &str {
        match self {
            Self::Entity(e) => &e.id,
            Self::Relation(r) => &r.id,
            Self::Topic(t) => &t.id,
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Entity(_) => RecordKind::Entity,
            Self::Relation(_) => RecordKind::Relation,
            Self::Topic(_) => RecordKind::Topic,
        }
    }

    pub fn organization_id(&self) -> Option<&str> {
        match self {
            Self::Entity(e) => e.organization_id.as_deref(),
            Self::Relation(r) => r.organization_id.as_deref(),
            Self::Topic(t) => t.organization_id.as_deref(),
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Entity(e) => e.created_at,
            Self::Relation(r) => r.created_at,
            Self::Topic(t) => t.created_at,
        }
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            Self::Entity(e) => e.updated_at,
            Self::Relation(r) => r.updated_at,
            Self::Topic(t) => t.updated_at,
        }
    }

    pub fn chroma_synced(&self) -> bool {
        match self {
            Self::Entity(e) => e.chroma_synced,
            Self::Relation(r) => r.chroma_synced,
            Self::Topic(t) => t.chroma_synced,
        }
    }

    pub fn embedding(&self) -> Option<&EmbeddingInfo> {
        match self {
            Self::Entity(e) => e.embedding.as_ref(),
            Self::Relation(r) => r.embedding.as_ref(),
            Self::Topic(t) => t.embedding.as_ref(),
        }
    }

    pub fn entity_type(&self) -> Option<EntityType> {
        match self {
            Self::Entity(e) => Some(e.entity_type),
            _ => None,
        }
    }

    pub fn relation_type(&self) -> Option<RelationType> {
        match self {
            Self::Relation(r) => Some(r.relation_type),
            _ => None,
        }
    }

    pub fn semantic_category(&self) -> Option<&SemanticCategory> {
        match self {
            Self::Topic(t) => Some(&t.semantic_category),
            _ => None,
        }
    }

    pub fn display_title(&self) -> String {
        match self {
            Self::Entity(e) => e.name.clone(),
            Self::Relation(r) if !r.description.trim().is_empty() => r.description.clone(),
            Self::Relation(r) => format!(
                "{} {} {}",
                r.source_entity_id.as_deref().unwrap_or("?"),
                r.relation_type,
                r.target_entity_id.as_deref().unwrap_or("?")
            ),
            Self::Topic(t) => t.title.clone(),
        }
    }

    /// Text matched against query keywords during scoring.
    pub fn search_text(&self) -> String {
        match self {
            Self::Entity(e) => {
                let mut parts = vec![e.name.clone()];
                parts.extend(e.aliases.iter().cloned());
                parts.push(e.entity_type.to_string());
                parts.join(" ")
            }
            Self::Relation(r) => format!("{} {}", r.description, r.relation_type),
            Self::Topic(t) => format!("{} {} {}", t.title, t.content, t.keywords.join(" ")),
        }
    }

    /// Text handed to the embedding generator.
    pub fn embedding_text(&self) -> String {
        match self {
            Self::Entity(e) => {
                let mut parts = vec![e.name.clone()];
                if !e.aliases.is_empty() {
                    parts.push(e.aliases.join(", "));
                }
                if !e.metadata.is_empty() {
                    if let Ok(json) = serde_json::to_string(&e.metadata) {
                        parts.push(json);
                    }
                }
                parts.join("\n\n")
            }
            Self::Relation(r) => {
                format!("{}\n\n{}", r.relation_type, r.description)
            }
            Self::Topic(t) => {
                let mut parts = vec![t.title.clone()];
                if !t.content.is_empty() {
                    parts.push(t.content.clone());
                }
                if !t.keywords.is_empty() {
                    parts.push(t.keywords.join(", "));
                }
                parts.join("\n\n")
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Entity(e) => e.validate(),
            Self::Relation(r) => r.validate(),
            Self::Topic(t) => t.validate(),
        }
    }
}

/// File format accepted by `ingest`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordBundle {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relations: Vec<Relation>,
    #[serde(default)]
    pub topics: Vec<Topic>,
    #[serde(default)]
    pub initiatives: Vec<Initiative>,
}

impl RecordBundle {
    pub fn len(&self) -> usize {
        self.entities.len() + self.relations.len() + self.topics.len() + self.initiatives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
