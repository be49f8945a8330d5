//! Source discovery
//!
//! Every jurisdiction gets the national model codes; configured state or
//! municipal sources are layered on top and ranked by authority.

use async_trait::async_trait;
use codecheck_common::config::{ConfiguredSource, DiscoveryConfig};
use codecheck_common::{Error, Result};

use super::{Discoverer, DiscoveryError};
use crate::models::{CodeSource, JurisdictionRef, SourceType};

const ICC_EDITIONS: &[&str] = &["2024", "2021", "2018", "2015", "2012"];
const NEC_EDITIONS: &[&str] = &["2023", "2020", "2017", "2014", "2011"];

/// Code families the pipeline knows how to interpret
pub fn supported_code_families() -> &'static [&'static str] {
    &["IRC", "IBC", "IFC", "NEC", "IECC", "IPC", "IMC", "IFGC"]
}

/// Published editions of a family, newest first
///
/// ICC codes follow a three-year cycle offset from the NFPA cycle.
pub fn available_editions(code_family: &str) -> &'static [&'static str] {
    match code_family.to_ascii_uppercase().as_str() {
        "NEC" => NEC_EDITIONS,
        "IRC" | "IBC" | "IFC" | "IECC" | "IPC" | "IMC" | "IFGC" => ICC_EDITIONS,
        _ => &[],
    }
}

/// Authority rank of a source
pub fn source_priority(source: &CodeSource) -> u8 {
    source.source_type.priority()
}

/// Check a source has everything fetching needs
pub fn validate_source(source: &CodeSource) -> std::result::Result<(), String> {
    let required = [
        ("name", &source.name),
        ("locator", &source.locator),
        ("code_family", &source.code_family),
        ("edition", &source.edition),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(format!("source is missing {}", field));
        }
    }
    Ok(())
}

/// Every national model code the catalog knows about
pub fn model_code_catalog() -> Vec<CodeSource> {
    let irc = CodeSource::new(
        "ICC International Residential Code (IRC) 2021",
        "IRC",
        "2021",
        "https://codes.iccsafe.org/content/IRC2021P1",
        SourceType::ModelCode,
    );
    let ibc = CodeSource::new(
        "ICC International Building Code (IBC) 2021",
        "IBC",
        "2021",
        "https://codes.iccsafe.org/content/IBC2021P1",
        SourceType::ModelCode,
    );

    // Secondary model codes rank just above the defaults but below any
    // state adoption.
    let mut ifc = CodeSource::new(
        "ICC International Fire Code (IFC) 2021",
        "IFC",
        "2021",
        "https://codes.iccsafe.org/content/IFC2021P1",
        SourceType::ModelCode,
    );
    ifc.priority = 2;
    let mut nec = CodeSource::new(
        "NFPA 70 National Electrical Code (NEC) 2020",
        "NEC",
        "2020",
        "https://www.nfpa.org/codes-and-standards/nfpa-70-standard-development/70",
        SourceType::ModelCode,
    );
    nec.priority = 2;

    vec![irc, ibc, ifc, nec]
}

/// Built-in fallback set: the residential and building model codes
///
/// Used whenever discovery errors or comes back empty, so a run always has
/// something to fetch.
pub fn default_code_set() -> Vec<CodeSource> {
    model_code_catalog()
        .into_iter()
        .filter(|source| source.code_family == "IRC" || source.code_family == "IBC")
        .collect()
}

/// A configured source with the keys that decide where it applies
#[derive(Debug, Clone)]
struct ScopedSource {
    source: CodeSource,
    state: Option<String>,
    jurisdiction: Option<String>,
}

impl ScopedSource {
    fn applies_to(&self, jurisdiction: &JurisdictionRef) -> bool {
        let state_matches = match (&self.state, &jurisdiction.state) {
            (Some(wanted), Some(actual)) => wanted.eq_ignore_ascii_case(actual),
            (Some(_), None) => false,
            (None, _) => true,
        };
        let name_matches = match &self.jurisdiction {
            Some(wanted) => {
                wanted.eq_ignore_ascii_case(&jurisdiction.name)
                    || wanted.eq_ignore_ascii_case(&jurisdiction.id)
            }
            None => true,
        };
        state_matches && name_matches
    }
}

/// Discovery over the model-code catalog plus configured local sources
#[derive(Debug, Clone, Default)]
pub struct CatalogDiscoverer {
    configured: Vec<ScopedSource>,
}

impl CatalogDiscoverer {
    /// Discoverer that only knows the national model codes
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `[[discovery.sources]]` entries
    pub fn from_config(config: &DiscoveryConfig) -> Result<Self> {
        let configured = config
            .sources
            .iter()
            .map(scoped_from_config)
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(count = configured.len(), "Configured jurisdiction-specific code sources");
        Ok(Self { configured })
    }
}

fn scoped_from_config(entry: &ConfiguredSource) -> Result<ScopedSource> {
    let source_type: SourceType = entry
        .source_type
        .parse()
        .map_err(|e| Error::Config(format!("discovery source '{}': {}", entry.name, e)))?;

    let applicability = entry
        .jurisdiction
        .clone()
        .or_else(|| entry.state.clone())
        .unwrap_or_else(|| "national".to_string());

    let source = CodeSource::new(
        entry.name.clone(),
        entry.code_family.to_ascii_uppercase(),
        entry.edition.clone(),
        entry.locator.clone(),
        source_type,
    )
    .with_applicability(applicability);

    validate_source(&source).map_err(|e| Error::Config(format!("discovery source '{}': {}", entry.name, e)))?;

    Ok(ScopedSource {
        source,
        state: entry.state.clone(),
        jurisdiction: entry.jurisdiction.clone(),
    })
}

#[async_trait]
impl Discoverer for CatalogDiscoverer {
    async fn discover(&self, jurisdiction: &JurisdictionRef) -> std::result::Result<Vec<CodeSource>, DiscoveryError> {
        let mut sources: Vec<CodeSource> = self
            .configured
            .iter()
            .filter(|scoped| scoped.applies_to(jurisdiction))
            .map(|scoped| scoped.source.clone())
            .collect();
        let local = sources.len();

        for model in default_code_set() {
            let duplicate = sources.iter().any(|s| {
                s.code_family == model.code_family
                    && s.edition == model.edition
                    && s.locator == model.locator
            });
            if !duplicate {
                sources.push(model);
            }
        }

        sources.retain(|source| match validate_source(source) {
            Ok(()) => true,
            Err(reason) => {
                tracing::warn!(source = %source.name, %reason, "Dropping invalid code source");
                false
            }
        });

        // Highest authority first; stable among equals
        sources.sort_by(|a, b| b.priority.cmp(&a.priority));

        tracing::info!(
            jurisdiction_id = %jurisdiction.id,
            total = sources.len(),
            local,
            "Discovered code sources"
        );

        Ok(sources)
    }
}
