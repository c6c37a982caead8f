use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{EtlError, Result};
use crate::transform::ChangeDocument;

/// Business ownership of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOwnership {
    #[serde(rename = "Platform")]
    pub platform: String,
    #[serde(rename = "Tribe")]
    pub tribe: String,
    #[serde(rename = "Company")]
    pub company: String,
}

/// Service name -> ownership, loaded once per run.
#[derive(Debug, Clone, Default)]
pub struct ServiceMapping {
    services: HashMap<String, ServiceOwnership>,
}

impl ServiceMapping {
    /// Load a headerless CSV with columns `Service, Tribe, Platform, Company`.
    ///
    /// Every row is data. When a service appears twice the later row wins.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| {
            EtlError::Mapping(format!("Cannot open {}: {e}", path.display()))
        })?;
        let mapping = Self::from_reader(file)?;
        info!(
            "Loaded {} service mappings from {}",
            mapping.len(),
            path.display()
        );
        Ok(mapping)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut services = HashMap::new();
        for (line, row) in csv_reader.records().enumerate() {
            let row = row?;
            if row.len() < 4 {
                return Err(EtlError::Mapping(format!(
                    "row {} has {} columns, expected 4",
                    line + 1,
                    row.len()
                )));
            }
            services.insert(
                row[0].to_string(),
                ServiceOwnership {
                    tribe: row[1].to_string(),
                    platform: row[2].to_string(),
                    company: row[3].to_string(),
                },
            );
        }

        Ok(Self { services })
    }

    pub fn get(&self, service: &str) -> Option<&ServiceOwnership> {
        self.services.get(service)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Merge ownership fields into `document` when its `Service` is known.
    ///
    /// Existing `Platform`, `Tribe` or `Company` values are overwritten on a
    /// hit. Returns whether the document was enriched.
    pub fn enrich(&self, document: &mut ChangeDocument) -> bool {
        let Some(ownership) = document.get_str("Service").and_then(|s| self.get(s)) else {
            return false;
        };
        let ownership = ownership.clone();

        document.insert("Platform", ownership.platform);
        document.insert("Tribe", ownership.tribe);
        document.insert("Company", ownership.company);
        true
    }

    /// Enrich every document, returning how many matched.
    pub fn enrich_all(&self, documents: &mut [ChangeDocument]) -> usize {
        let matched = documents
            .iter_mut()
            .map(|doc| self.enrich(doc))
            .filter(|hit| *hit)
            .count();
        debug!("{matched} of {} documents matched a service", documents.len());
        matched
    }
}

impl FromIterator<(String, ServiceOwnership)> for ServiceMapping {
    fn from_iter<I: IntoIterator<Item = (String, ServiceOwnership)>>(iter: I) -> Self {
        Self {
            services: iter.into_iter().collect(),
        }
    }
}
