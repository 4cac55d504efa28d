//! Heuristic conformance checks for UI files.
//!
//! Not exhaustive. Flags:
//! - `animate-*` utility classes
//! - missing or flat `data-component` identifiers
//! - spacing and radius tokens that drift from the first-seen value in the batch
//! - data-driven content with no loading placeholder

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{ValidationFailure, ValidationKind};

static COMPONENT_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"data-component\s*=\s*(?:\{\s*)?["'`]([^"'`]*)["'`]"#).expect("component regex")
});

static SPACING_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(space-x|space-y|gap|px|py|p|mx|my|m)-(\[[^\]]+\]|[0-9][0-9.]*|px)$")
        .expect("spacing regex")
});

static RADIUS_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^rounded(?:-(none|sm|md|lg|xl|2xl|3xl|full|\[[^\]]+\]))?$").expect("radius regex")
});

static DATA_DRIVEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bfetch\(|\buseQuery\b|\buseSWR\b|\bisLoading\b|\bloading\b").expect("data regex")
});

static LOADING_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)skeleton|data-loading|aria-busy|placeholder").expect("loading regex")
});

/// True when `path` has one of the configured UI extensions.
pub fn is_frontend_file(path: &str, extensions: &[String]) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            extensions
                .iter()
                .any(|candidate| candidate.trim_start_matches('.').eq_ignore_ascii_case(ext))
        })
}

/// Batch checker; token baselines carry across files in check order.
#[derive(Debug, Default)]
pub struct FrontendChecker {
    baselines: BTreeMap<&'static str, Baseline>,
}

#[derive(Debug, Clone)]
struct Baseline {
    value: String,
    origin: String,
}

impl FrontendChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check one file; call in a stable order so baselines are deterministic.
    pub fn check_file(&mut self, path: &str, content: &str) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();
        let mut saw_component_attr = false;

        for (idx, line) in content.lines().enumerate() {
            let line_no = idx + 1;

            for caps in COMPONENT_ATTR_RE.captures_iter(line) {
                saw_component_attr = true;
                let value = caps[1].trim();
                if !value.contains(['-', '/', '.', ':']) {
                    failures.push(
                        ValidationFailure::new(
                            ValidationKind::Frontend,
                            format!(
                                "data-component '{value}' must be hyphenated or layered (e.g. 'card-header')"
                            ),
                        )
                        .at(path, Some(line_no)),
                    );
                }
            }

            for token in class_tokens(line) {
                let (variants, utility) = match token.rsplit_once(':') {
                    Some((variants, utility)) => (Some(variants), utility),
                    None => (None, token),
                };
                if utility.starts_with("animate-") {
                    failures.push(
                        ValidationFailure::new(
                            ValidationKind::Frontend,
                            format!(
                                "animation utility '{token}' is not allowed; use native CSS transitions"
                            ),
                        )
                        .at(path, Some(line_no)),
                    );
                    continue;
                }
                // Responsive and state variants are allowed to differ from the base token.
                if variants.is_some() {
                    continue;
                }
                if let Some(caps) = SPACING_TOKEN_RE.captures(utility) {
                    self.compare(spacing_key(&caps[1]), &caps[2], path, line_no, &mut failures);
                } else if let Some(caps) = RADIUS_TOKEN_RE.captures(utility) {
                    let value = caps.get(1).map_or("DEFAULT", |m| m.as_str());
                    self.compare("rounded", value, path, line_no, &mut failures);
                }
            }
        }

        if !saw_component_attr {
            failures.push(
                ValidationFailure::new(
                    ValidationKind::Frontend,
                    "missing data-component attribute on the root element",
                )
                .at(path, None),
            );
        }

        if let Some(found) = DATA_DRIVEN_RE.find(content)
            && !LOADING_MARKER_RE.is_match(content)
        {
            let line_no = content[..found.start()].matches('\n').count() + 1;
            failures.push(
                ValidationFailure::new(
                    ValidationKind::Frontend,
                    format!(
                        "data-driven content ('{}') has no loading skeleton or placeholder",
                        found.as_str()
                    ),
                )
                .at(path, Some(line_no)),
            );
        }

        failures
    }

    fn compare(
        &mut self,
        key: &'static str,
        value: &str,
        path: &str,
        line_no: usize,
        failures: &mut Vec<ValidationFailure>,
    ) {
        match self.baselines.get(key) {
            None => {
                self.baselines.insert(
                    key,
                    Baseline {
                        value: value.to_string(),
                        origin: format!("{path}:{line_no}"),
                    },
                );
            }
            Some(baseline) if baseline.value != value => failures.push(
                ValidationFailure::new(
                    ValidationKind::Frontend,
                    format!(
                        "inconsistent {key} token '{key}-{value}' (baseline '{key}-{}' from {})",
                        baseline.value, baseline.origin
                    ),
                )
                .at(path, Some(line_no)),
            ),
            Some(_) => {}
        }
    }
}

fn class_tokens(line: &str) -> impl Iterator<Item = &str> {
    line.split(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '`' | '{' | '}'))
        .filter(|token| !token.is_empty())
}

fn spacing_key(prefix: &str) -> &'static str {
    match prefix {
        "p" => "p",
        "px" => "px",
        "py" => "py",
        "m" => "m",
        "mx" => "mx",
        "my" => "my",
        "gap" => "gap",
        "space-x" => "space-x",
        _ => "space-y",
    }
}

/// Check a batch of `(path, content)` pairs with shared baselines.
pub fn check_frontend_batch<'a, I>(files: I) -> Vec<ValidationFailure>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut checker = FrontendChecker::new();
    files
        .into_iter()
        .flat_map(|(path, content)| checker.check_file(path, content))
        .collect()
}
