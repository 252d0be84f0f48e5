use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entity types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Entity types the recognizer knows how to extract and validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Location,
    Date,
    Time,
    Temperature,
    Person,
    Room,
    Artist,
    Genre,
    Song,
}

impl EntityType {
    pub const ALL: [EntityType; 9] = [
        EntityType::Location,
        EntityType::Date,
        EntityType::Time,
        EntityType::Temperature,
        EntityType::Person,
        EntityType::Room,
        EntityType::Artist,
        EntityType::Genre,
        EntityType::Song,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Location => "location",
            EntityType::Date => "date",
            EntityType::Time => "time",
            EntityType::Temperature => "temperature",
            EntityType::Person => "person",
            EntityType::Room => "room",
            EntityType::Artist => "artist",
            EntityType::Genre => "genre",
            EntityType::Song => "song",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == name)
    }

    /// Slot names are entity-type names; slots like `"lugar"`/`"ubicacion"`
    /// also map onto the location type.
    pub fn for_slot(slot: &str) -> Option<Self> {
        match slot {
            "lugar" | "ubicacion" | "location" => Some(EntityType::Location),
            "fecha" | "date" => Some(EntityType::Date),
            "hora" | "time" => Some(EntityType::Time),
            "temperatura" | "temperature" => Some(EntityType::Temperature),
            "persona" | "person" => Some(EntityType::Person),
            "habitacion" | "room" => Some(EntityType::Room),
            "artista" | "artist" => Some(EntityType::Artist),
            "genero" | "genre" => Some(EntityType::Genre),
            "cancion" | "song" => Some(EntityType::Song),
            _ => Self::parse(slot),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which strategy produced an extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    Pattern,
    Llm,
    Context,
}

/// One extracted entity, before or after validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub entity_type: EntityType,
    /// Raw surface form as matched.
    pub value: String,
    /// Canonical form after normalization (HH:MM, YYYY-MM-DD, …).
    pub normalized: String,
    pub confidence: f64,
    pub source: ExtractionSource,
}

impl ExtractedEntity {
    pub fn new(
        entity_type: EntityType,
        value: impl Into<String>,
        confidence: f64,
        source: ExtractionSource,
    ) -> Self {
        let value = value.into();
        Self {
            normalized: value.clone(),
            entity_type,
            value,
            confidence,
            source,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
