use serde::{Deserialize, Serialize};

/// One entry of the operator-maintained roster.
///
/// `id` is assigned by the operator and is expected, but not guaranteed, to be
/// unique. `picture` is an opaque image reference (typically a data URI) that
/// the core never inspects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

impl CandidateRecord {
    /// A minimal roster entry with no picture.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            picture: None,
        }
    }
}

#[cfg(test)]
impl CandidateRecord {
    pub fn example_roster() -> Vec<Self> {
        vec![
            Self {
                picture: Some("data:image/png;base64,AAAA".to_string()),
                ..Self::new("A", "Ana")
            },
            Self::new("B", "Beto"),
            Self::new("C", "Carla"),
        ]
    }
}
