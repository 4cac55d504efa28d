//! Reading plan documents and their contract blocks.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::core::contract::ContractIndex;

/// Parse the contracts of the plan at `path`; `None` yields an empty index.
#[instrument(skip_all, fields(plan = ?path.map(Path::display)))]
pub fn load_contract_index(path: Option<&Path>) -> Result<ContractIndex> {
    let Some(path) = path else {
        debug!("no plan document given");
        return Ok(ContractIndex::default());
    };
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let index = ContractIndex::parse(&contents);
    if !index.issues.is_empty() {
        warn!(issues = index.issues.len(), "plan has contract issues");
    }
    Ok(index)
}
