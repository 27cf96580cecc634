use std::collections::HashMap;
use std::io;
use std::path::Path;

use ulid::Ulid;

use crate::model::ShowSpec;

/// Read side of show management: what seats a show has.
pub trait Catalog: Send + Sync {
    fn get_show(&self, show_id: &Ulid) -> Option<ShowSpec>;

    fn shows(&self) -> Vec<ShowSpec>;
}

/// Catalog backed by a JSON array of show specs.
///
/// ```json
/// [{"id": "01J...", "title": "Dune", "seat_labels": ["A1", "A2"], "seat_price": 1200}]
/// ```
#[derive(Debug, Default)]
pub struct JsonCatalog {
    shows: HashMap<Ulid, ShowSpec>,
}

impl JsonCatalog {
    pub fn load(path: &Path) -> io::Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_slice(&bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> io::Result<Self> {
        let specs: Vec<ShowSpec> = serde_json::from_slice(bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Self::from_specs(specs))
    }

    pub fn from_specs(specs: impl IntoIterator<Item = ShowSpec>) -> Self {
        Self {
            shows: specs.into_iter().map(|s| (s.id, s)).collect(),
        }
    }
}

impl Catalog for JsonCatalog {
    fn get_show(&self, show_id: &Ulid) -> Option<ShowSpec> {
        self.shows.get(show_id).cloned()
    }

    fn shows(&self) -> Vec<ShowSpec> {
        let mut all: Vec<ShowSpec> = self.shows.values().cloned().collect();
        all.sort_by_key(|s| s.id);
        all
    }
}
