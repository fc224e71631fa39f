use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Canonical pipeline stage code. The set of codes is data (the canonical
/// stage map), not an enumeration.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageCode(pub String);

impl StageCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StageCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of the canonical stage map. `code` and `label` are the two label
/// columns an external stage name is compared against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMapping {
    pub code: StageCode,
    pub label: String,
    #[serde(default)]
    pub external_stage_id: Option<String>,
    #[serde(default)]
    pub position: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageMatchKind {
    ExternalId,
    Label,
    UnderscoreHeuristic,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageMatch {
    pub code: StageCode,
    pub matched_by: StageMatchKind,
}

/// Accent-stripped, uppercased, trimmed, single-spaced.
pub fn normalize_stage_label(raw: &str) -> String {
    let stripped: String = raw.nfd().filter(|c| !is_combining_mark(*c)).collect();
    stripped.to_uppercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized label with every run of non-alphanumeric characters collapsed
/// into a single underscore: `Primera Cita` -> `PRIMERA_CITA`.
pub fn underscore_stage_label(raw: &str) -> String {
    let normalized = normalize_stage_label(raw);
    let mut out = String::with_capacity(normalized.len());
    let mut pending_separator = false;
    for ch in normalized.chars() {
        if ch.is_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.push(ch);
        } else {
            pending_separator = true;
        }
    }
    out
}

/// Resolves an external stage to a canonical code. External stage id wins,
/// then a normalized label match against either label column, then the
/// underscore heuristic.
pub fn resolve_stage(
    mappings: &[StageMapping],
    stage_external_id: Option<&str>,
    stage_name_raw: Option<&str>,
) -> Option<StageMatch> {
    if let Some(external_id) = stage_external_id.map(str::trim).filter(|v| !v.is_empty()) {
        let hit = mappings
            .iter()
            .find(|m| m.external_stage_id.as_deref().map(str::trim) == Some(external_id));
        if let Some(mapping) = hit {
            return Some(StageMatch {
                code: mapping.code.clone(),
                matched_by: StageMatchKind::ExternalId,
            });
        }
    }

    let raw = stage_name_raw.map(str::trim).filter(|v| !v.is_empty())?;

    let wanted = normalize_stage_label(raw);
    let by_label = mappings.iter().find(|m| {
        normalize_stage_label(m.code.as_str()) == wanted || normalize_stage_label(&m.label) == wanted
    });
    if let Some(mapping) = by_label {
        return Some(StageMatch { code: mapping.code.clone(), matched_by: StageMatchKind::Label });
    }

    let wanted = underscore_stage_label(raw);
    if wanted.is_empty() {
        return None;
    }
    mappings
        .iter()
        .find(|m| {
            underscore_stage_label(m.code.as_str()) == wanted
                || underscore_stage_label(&m.label) == wanted
        })
        .map(|m| StageMatch {
            code: m.code.clone(),
            matched_by: StageMatchKind::UnderscoreHeuristic,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(code: &str, label: &str, external_id: Option<&str>) -> StageMapping {
        StageMapping {
            code: StageCode(code.to_string()),
            label: label.to_string(),
            external_stage_id: external_id.map(str::to_string),
            position: 0,
        }
    }

    fn stage_map() -> Vec<StageMapping> {
        vec![
            mapping("PROSPECCION", "Prospección", Some("stg-001")),
            mapping("PRIMERA_CITA", "Cita agendada", None),
            mapping("NEGOCIACION", "En negociación", Some("stg-003")),
        ]
    }

    #[test]
    fn label_normalization_strips_accents_and_collapses_spaces() {
        assert_eq!(normalize_stage_label("  en   Negociación "), "EN NEGOCIACION");
        assert_eq!(underscore_stage_label("Primera - Cita"), "PRIMERA_CITA");
    }

    #[test]
    fn external_id_takes_precedence_over_label() {
        let found = resolve_stage(&stage_map(), Some("stg-003"), Some("Prospección"))
            .expect("stage should resolve");
        assert_eq!(found.code.as_str(), "NEGOCIACION");
        assert_eq!(found.matched_by, StageMatchKind::ExternalId);
    }

    #[test]
    fn label_matches_either_column() {
        let by_label = resolve_stage(&stage_map(), None, Some("prospeccion")).expect("label");
        assert_eq!(by_label.code.as_str(), "PROSPECCION");

        let by_display = resolve_stage(&stage_map(), Some("unknown-id"), Some("cita AGENDADA"))
            .expect("display label");
        assert_eq!(by_display.code.as_str(), "PRIMERA_CITA");
        assert_eq!(by_display.matched_by, StageMatchKind::Label);
    }

    #[test]
    fn underscore_heuristic_resolves_spaced_label() {
        let found = resolve_stage(&stage_map(), None, Some("Primera Cita")).expect("heuristic");
        assert_eq!(found.code.as_str(), "PRIMERA_CITA");
        assert_eq!(found.matched_by, StageMatchKind::UnderscoreHeuristic);
    }

    #[test]
    fn unknown_stage_is_not_mapped() {
        assert_eq!(resolve_stage(&stage_map(), None, Some("Cerrado ganado")), None);
        assert_eq!(resolve_stage(&stage_map(), None, Some("   ")), None);
        assert_eq!(resolve_stage(&[], Some("stg-001"), None), None);
    }
}
