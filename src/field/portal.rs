use crate::template::{Point, PortalTemplate, PortalType};

/// Portal names that are never looked up by name: start points and the
/// town-portal anchor.
const UNNAMED_PORTALS: [&str; 2] = ["sp", "tp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPortal {
    pub index: u8,
    pub name: String,
    pub kind: PortalType,
    pub position: Point,
    pub target_field: Option<u32>,
    pub target_portal: Option<String>,
}

impl FieldPortal {
    pub fn is_start_point(&self) -> bool {
        self.kind == PortalType::StartPoint
    }

    /// Whether this portal belongs in the by-name table.
    pub fn is_named(&self) -> bool {
        !UNNAMED_PORTALS.contains(&self.name.as_str())
    }
}

impl From<&PortalTemplate> for FieldPortal {
    fn from(t: &PortalTemplate) -> Self {
        Self {
            index: t.id,
            name: t.name.clone(),
            kind: t.kind,
            position: t.position,
            target_field: t.target_field,
            target_portal: t.target_portal.clone(),
        }
    }
}
