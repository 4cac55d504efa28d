//! Anchor markers: `TODO`/`FIXME` comments tagged with a `TD-..` id that a task
//! must remove before it is accepted.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{ValidationFailure, ValidationKind};

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:TODO|FIXME)\b").expect("marker regex"));

fn id_regex(id: &str) -> Option<Regex> {
    Regex::new(&format!(
        r"(?:^|[^A-Za-z0-9._-]){}(?:$|[^A-Za-z0-9._-])",
        regex::escape(id)
    ))
    .ok()
}

/// Lines of `content` where a declared id still sits beside a TODO/FIXME marker.
pub fn find_unresolved_anchors(path: &str, content: &str, ids: &[String]) -> Vec<ValidationFailure> {
    let patterns: Vec<(&String, Regex)> = ids
        .iter()
        .filter_map(|id| id_regex(id).map(|re| (id, re)))
        .collect();
    if patterns.is_empty() {
        return Vec::new();
    }

    let mut failures = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if !MARKER_RE.is_match(line) {
            continue;
        }
        for (id, re) in &patterns {
            if re.is_match(line) {
                failures.push(
                    ValidationFailure::new(
                        ValidationKind::Anchor,
                        format!("unresolved anchor {id}: {}", line.trim()),
                    )
                    .at(path, Some(idx + 1)),
                );
            }
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn reports_marker_lines_with_declared_ids() {
        let content = "fn a() {}\n// TODO(TD-AUTH-1): wire login\n// FIXME TD-AUTH-2 later\n";
        let failures = find_unresolved_anchors("src/a.ts", content, &ids(&["TD-AUTH-1", "TD-AUTH-2"]));
        let rendered: Vec<String> = failures.iter().map(ValidationFailure::render).collect();
        assert_eq!(
            rendered,
            vec![
                "src/a.ts:2: unresolved anchor TD-AUTH-1: // TODO(TD-AUTH-1): wire login".to_string(),
                "src/a.ts:3: unresolved anchor TD-AUTH-2: // FIXME TD-AUTH-2 later".to_string(),
            ]
        );
    }

    #[test]
    fn ids_without_markers_and_longer_ids_are_ignored() {
        let content = "// resolved TD-1\n// TODO TD-10 still open\n";
        assert!(find_unresolved_anchors("a.ts", content, &ids(&["TD-1"])).is_empty());
    }

    #[test]
    fn no_ids_means_nothing_to_check() {
        assert!(find_unresolved_anchors("a.ts", "// TODO TD-1", &[]).is_empty());
    }
}
