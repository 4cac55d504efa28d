//! Acceptance contracts embedded in a plan document.
//!
//! Two representations may coexist in one plan:
//!
//! - **Prose**: `####` sub-sections under a heading containing "File Contracts".
//!   The id comes from an explicit `ID:` line or the first heading token.
//! - **Structured**: a fenced `json`/`jsonc`/`yaml`/`yml` block whose
//!   `schemaVersion` equals [`CONTRACT_SCHEMA_VERSION`], validated against the
//!   embedded JSON Schema before use.
//!
//! Problems are collected as human-readable issues; callers block the phase on
//! any issue rather than dropping the malformed contract silently.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::todo::parse_list;

/// `schemaVersion` literal identifying a structured contract block.
pub const CONTRACT_SCHEMA_VERSION: &str = "file-contracts/v1";

const CONTRACT_SCHEMA: &str = include_str!("../../schemas/file_contracts.v1.schema.json");

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ms)^```[ \t]*(json|jsonc|yaml|yml)[ \t]*\r?\n(.*?)^```[ \t]*\r?$")
        .expect("fence regex")
});

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.*?)\s*#*\s*$").expect("heading regex"));

static ID_RE: LazyLock<Regex> = LazyLock::new(|| field_regex("ID"));
static FILES_RE: LazyLock<Regex> = LazyLock::new(|| field_regex("Files"));
static TODO_IDS_RE: LazyLock<Regex> = LazyLock::new(|| field_regex("TODO-IDs"));
static SKILLS_RE: LazyLock<Regex> = LazyLock::new(|| field_regex("Skills"));

static VALID_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9._-]+$").expect("contract id regex"));

fn field_regex(name: &str) -> Regex {
    Regex::new(&format!(
        r"(?i)^\s*(?:[-*]\s*)?\**{}\**\s*:\s*\**\s*(.+?)\s*$",
        regex::escape(name)
    ))
    .expect("field regex")
}

/// A regular expression expected (or forbidden) in one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PatternCheck {
    pub file: String,
    pub regex: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Machine-checkable acceptance block of a structured contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Acceptance {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_files_exist: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_patterns: Vec<PatternCheck>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forbidden_patterns: Vec<PatternCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_todo_ids_resolved: Option<bool>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub frontend_conformance: bool,
}

impl Acceptance {
    /// Anchor resolution is required unless explicitly disabled.
    pub fn requires_anchor_resolution(&self) -> bool {
        self.require_todo_ids_resolved != Some(false)
    }
}

/// One record of a structured contract block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContractRecord {
    pub id: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub todo_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance: Option<Acceptance>,
}

/// Top-level shape of a structured contract block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContractBlock {
    pub schema_version: String,
    pub contracts: Vec<ContractRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractSource {
    Prose,
    Structured,
}

/// A resolved contract, indexed by normalized id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub id: String,
    pub source: ContractSource,
    pub files: Vec<String>,
    pub todo_ids: Vec<String>,
    pub skills: Vec<String>,
    /// Only structured contracts carry a machine-checkable block.
    pub acceptance: Option<Acceptance>,
    /// Prose body, kept for prompts and reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl Contract {
    pub fn requires_anchor_resolution(&self) -> bool {
        self.acceptance
            .as_ref()
            .is_none_or(Acceptance::requires_anchor_resolution)
    }
}

/// All contracts of one plan document plus the issues found while parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractIndex {
    contracts: BTreeMap<String, Contract>,
    pub issues: Vec<String>,
}

impl ContractIndex {
    /// Parse every prose section and structured block of `plan`.
    pub fn parse(plan: &str) -> Self {
        let mut index = ContractIndex::default();
        for (block_no, caps) in FENCE_RE.captures_iter(plan).enumerate() {
            index.ingest_fenced_block(block_no + 1, &caps[1], &caps[2]);
        }
        for contract in parse_prose_contracts(plan) {
            if index.contracts.contains_key(&contract.id) {
                debug!(id = %contract.id, "prose contract shadowed by earlier definition");
                continue;
            }
            index.contracts.insert(contract.id.clone(), contract);
        }
        debug!(
            contracts = index.contracts.len(),
            issues = index.issues.len(),
            "parsed plan contracts"
        );
        index
    }

    pub fn get(&self, raw_id: &str) -> Option<&Contract> {
        self.contracts.get(&normalize_contract_id(raw_id))
    }

    pub fn contracts(&self) -> impl Iterator<Item = &Contract> {
        self.contracts.values()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    /// Resolve references in declaration order; returns every unknown reference on failure.
    pub fn resolve(&self, refs: &[String]) -> std::result::Result<Vec<&Contract>, Vec<String>> {
        let mut resolved = Vec::new();
        let mut missing = Vec::new();
        for raw in refs {
            match self.get(raw) {
                Some(contract) => resolved.push(contract),
                None => missing.push(format!("unknown contract reference '{raw}'")),
            }
        }
        if missing.is_empty() {
            Ok(resolved)
        } else {
            Err(missing)
        }
    }

    fn ingest_fenced_block(&mut self, block_no: usize, lang: &str, body: &str) {
        let value = match parse_fenced_value(lang, body) {
            Ok(value) => value,
            Err(err) => {
                if body.contains("schemaVersion") {
                    self.issues
                        .push(format!("contract block {block_no}: invalid {lang}: {err}"));
                }
                return;
            }
        };
        let Some(version) = value.get("schemaVersion") else {
            return;
        };
        if version.as_str() != Some(CONTRACT_SCHEMA_VERSION) {
            self.issues.push(format!(
                "contract block {block_no}: unsupported schemaVersion {version} (expected \"{CONTRACT_SCHEMA_VERSION}\")"
            ));
            return;
        }

        let schema_errors = validate_block_schema(&value);
        if !schema_errors.is_empty() {
            for err in schema_errors {
                self.issues.push(format!("contract block {block_no}: {err}"));
            }
            return;
        }
        let block: ContractBlock = match serde_json::from_value(value) {
            Ok(block) => block,
            Err(err) => {
                self.issues
                    .push(format!("contract block {block_no}: {err}"));
                return;
            }
        };

        for record in block.contracts {
            let record_issues = validate_record(&record);
            let id = normalize_contract_id(&record.id);
            if !record_issues.is_empty() {
                self.issues.extend(record_issues);
                continue;
            }
            if self.contracts.contains_key(&id) {
                self.issues
                    .push(format!("contract {id}: duplicate contract id"));
                continue;
            }
            self.contracts.insert(
                id.clone(),
                Contract {
                    id,
                    source: ContractSource::Structured,
                    files: record.files,
                    todo_ids: record.todo_ids,
                    skills: record.skills.unwrap_or_default(),
                    acceptance: Some(record.acceptance.unwrap_or_default()),
                    summary: None,
                },
            );
        }
    }
}

/// Uppercase, strip decoration, and join whitespace with `-`.
pub fn normalize_contract_id(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| matches!(c, '`' | '[' | ']' | '*' | ':' | '"' | '\''))
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_uppercase()
}

/// Render contracts as a structured block that parses back to the same set.
pub fn render_contract_block(contracts: &[Contract]) -> Result<String> {
    let block = ContractBlock {
        schema_version: CONTRACT_SCHEMA_VERSION.to_string(),
        contracts: contracts
            .iter()
            .map(|contract| ContractRecord {
                id: contract.id.clone(),
                files: contract.files.clone(),
                todo_ids: contract.todo_ids.clone(),
                skills: (!contract.skills.is_empty()).then(|| contract.skills.clone()),
                acceptance: contract.acceptance.clone(),
            })
            .collect(),
    };
    let json = serde_json::to_string_pretty(&block).context("serialize contract block")?;
    Ok(format!("```json\n{json}\n```\n"))
}

fn validate_record(record: &ContractRecord) -> Vec<String> {
    let mut issues = Vec::new();
    let id = normalize_contract_id(&record.id);
    if !VALID_ID_RE.is_match(&id) {
        issues.push(format!(
            "contract '{}': id must match ^[A-Z0-9._-]+$ after normalization (got '{id}')",
            record.id
        ));
    }
    if let Some(acceptance) = &record.acceptance {
        let groups = [
            ("requiredPatterns", &acceptance.required_patterns),
            ("forbiddenPatterns", &acceptance.forbidden_patterns),
        ];
        for (field, checks) in groups {
            for (idx, check) in checks.iter().enumerate() {
                if let Err(err) = Regex::new(&check.regex) {
                    issues.push(format!(
                        "contract {id}: {field}[{idx}] regex '{}' is invalid: {err}",
                        check.regex
                    ));
                }
            }
        }
    }
    issues
}

fn validate_block_schema(value: &Value) -> Vec<String> {
    let schema: Value = match serde_json::from_str(CONTRACT_SCHEMA) {
        Ok(schema) => schema,
        Err(err) => return vec![format!("embedded contract schema is invalid: {err}")],
    };
    let validator = match validator_for(&schema) {
        Ok(validator) => validator,
        Err(err) => return vec![format!("embedded contract schema is invalid: {err}")],
    };
    validator
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect()
}

fn parse_fenced_value(lang: &str, body: &str) -> Result<Value> {
    match lang {
        "json" => serde_json::from_str(body).map_err(|err| anyhow!(err)),
        "jsonc" => serde_json::from_str(&strip_jsonc_comments(body)).map_err(|err| anyhow!(err)),
        _ => serde_yaml::from_str(body).map_err(|err| anyhow!(err)),
    }
}

/// Drop `//` and `/* */` comments outside string literals.
fn strip_jsonc_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn parse_prose_contracts(plan: &str) -> Vec<Contract> {
    let mut contracts = Vec::new();
    let mut section_level: Option<usize> = None;
    let mut current: Option<(String, Vec<&str>)> = None;
    let mut in_fence = false;

    for line in plan.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }
        let heading = if in_fence {
            None
        } else {
            HEADING_RE.captures(line)
        };

        if let Some(caps) = heading {
            let level = caps[1].len();
            let text = caps[2].to_string();
            if level <= 4
                && let Some((title, body)) = current.take()
                && let Some(contract) = prose_contract(&title, &body)
            {
                contracts.push(contract);
            }
            match section_level {
                Some(section) if level <= section => {
                    section_level = None;
                }
                Some(_) if level == 4 => {
                    current = Some((text, Vec::new()));
                    continue;
                }
                _ => {}
            }
            if section_level.is_none() && level <= 3 && text.to_lowercase().contains("file contracts")
            {
                section_level = Some(level);
            }
            continue;
        }

        if let Some((_, body)) = current.as_mut() {
            body.push(line);
        }
    }

    if let Some((title, body)) = current.take()
        && let Some(contract) = prose_contract(&title, &body)
    {
        contracts.push(contract);
    }
    contracts
}

fn prose_contract(title: &str, body: &[&str]) -> Option<Contract> {
    if body.iter().any(|line| line.contains("schemaVersion")) {
        return None;
    }
    let field = |re: &Regex| {
        body.iter()
            .find_map(|line| re.captures(line).map(|caps| caps[1].to_string()))
    };

    let raw_id = field(&ID_RE)
        .or_else(|| title.split_whitespace().next().map(str::to_string))?;
    let id = normalize_contract_id(&raw_id);
    if id.is_empty() {
        return None;
    }

    let summary = body
        .iter()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();

    Some(Contract {
        id,
        source: ContractSource::Prose,
        files: field(&FILES_RE).map(|v| parse_list(&v)).unwrap_or_default(),
        todo_ids: field(&TODO_IDS_RE)
            .map(|v| parse_list(&v))
            .unwrap_or_default(),
        skills: field(&SKILLS_RE).map(|v| parse_list(&v)).unwrap_or_default(),
        acceptance: None,
        summary: (!summary.is_empty()).then_some(summary),
    })
}
