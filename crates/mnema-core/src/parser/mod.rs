//! Memory file parser
//!
//! Turns a Markdown memory file into the normalized row shape. Parsing
//! is strict about identity fields (title, tier, type) and lenient
//! about anchors: unclosed or mismatched markers produce warnings, not
//! errors, and the file still indexes.
//!
//! Recognized layout:
//!
//! ```markdown
//! ---
//! title: OAuth flow
//! context_type: decision
//! importance_tier: important
//! trigger_phrases: [oauth, jwt]
//! ---
//! # OAuth flow
//! We use OAuth 2 with JWT access tokens.
//! <!-- ANCHOR:summary -->
//! ...
//! <!-- /ANCHOR:summary -->
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::memory::{ContextType, ImportanceTier, MAX_TRIGGER_LEN, MAX_TRIGGER_PHRASES};

// ============================================================================
// TYPES
// ============================================================================

/// A named span in the file body, `ANCHOR:<id> ... /ANCHOR:<id>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    pub id: String,
    /// 1-based line of the opening marker (post-BOM numbering)
    pub start_line: usize,
    /// 1-based line of the closing marker; `None` when unclosed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<usize>,
}

/// Normalized row shape produced from a valid file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedMemory {
    pub spec_folder: String,
    pub file_path: String,
    pub title: String,
    pub content: String,
    pub content_hash: String,
    pub trigger_phrases: Vec<String>,
    pub context_type: ContextType,
    pub importance_tier: ImportanceTier,
    pub anchors: Vec<Anchor>,
}

/// Outcome of a parse: fatal errors, non-fatal warnings, and the row
/// shape when the file validates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseOutcome {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed: Option<ParsedMemory>,
}

#[derive(Debug, Default, Deserialize)]
struct FrontMatter {
    title: Option<String>,
    spec_folder: Option<String>,
    context_type: Option<String>,
    importance_tier: Option<String>,
    #[serde(default)]
    trigger_phrases: Vec<String>,
}

// ============================================================================
// ROOT VALIDATION
// ============================================================================

/// Whether `path` lies under an allowed memory root
///
/// Allowed: `specs/**/memory/**` and `.opencode/skill/*/constitutional/**`.
/// Callers must reject files outside these roots before indexing.
pub fn is_allowed_root(path: &Path) -> bool {
    let components: Vec<&str> = path
        .iter()
        .filter_map(|c| c.to_str())
        .collect();

    let under_specs_memory = components
        .iter()
        .position(|c| *c == "specs")
        .map(|i| components[i + 1..].contains(&"memory"))
        .unwrap_or(false);

    let under_constitutional = components
        .windows(2)
        .any(|w| w == [".opencode", "skill"])
        && components.contains(&"constitutional");

    under_specs_memory || under_constitutional
}

/// Whether the path belongs to a constitutional root
pub fn is_constitutional_path(path: &Path) -> bool {
    path.iter()
        .filter_map(|c| c.to_str())
        .any(|c| c == "constitutional")
}

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Strip a leading UTF-8 BOM
pub fn strip_bom(raw: &str) -> &str {
    raw.strip_prefix('\u{feff}').unwrap_or(raw)
}

/// Hex sha256 over the normalized bytes (BOM stripped, right-trimmed)
pub fn content_hash(raw: &str) -> String {
    let normalized = strip_bom(raw).trim_end();
    let digest = Sha256::digest(normalized.as_bytes());
    let mut hex = String::with_capacity(64);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Lowercase, trim, collapse whitespace, dedup preserving first-seen
/// order, clamp each phrase to [`MAX_TRIGGER_LEN`] chars, keep at most
/// [`MAX_TRIGGER_PHRASES`]
pub fn normalize_triggers(raw: &[String]) -> Vec<String> {
    let mut seen = Vec::new();
    for phrase in raw {
        let collapsed = phrase
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if collapsed.is_empty() {
            continue;
        }
        let clamped: String = collapsed.chars().take(MAX_TRIGGER_LEN).collect();
        if !seen.contains(&clamped) {
            seen.push(clamped);
        }
        if seen.len() == MAX_TRIGGER_PHRASES {
            break;
        }
    }
    seen
}

/// Normalize a prompt/phrase for trigger matching
pub fn normalize_phrase(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Derive the spec folder from the file path: everything up to the
/// `memory` (or `constitutional`) directory
pub fn derive_spec_folder(path: &Path) -> Option<String> {
    let components: Vec<&str> = path.iter().filter_map(|c| c.to_str()).collect();
    let cut = components
        .iter()
        .position(|c| *c == "memory" || *c == "constitutional")?;
    if cut == 0 {
        return None;
    }
    Some(components[..cut].join("/"))
}

// ============================================================================
// PARSING
// ============================================================================

/// Parse raw file text into the normalized shape
///
/// `file_path` is recorded verbatim as the row identity; callers have
/// already validated it against the allowed roots.
pub fn parse_memory_file(file_path: &Path, raw: &str) -> ParseOutcome {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let text = strip_bom(raw);
    let (front, body) = split_front_matter(text);

    let front_matter: FrontMatter = match front {
        Some(block) => match serde_yaml::from_str(block) {
            Ok(fm) => fm,
            Err(e) => {
                errors.push(format!("invalid front-matter: {e}"));
                FrontMatter::default()
            }
        },
        None => FrontMatter::default(),
    };

    let title = front_matter
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .or_else(|| first_heading(body));
    let title = match title {
        Some(t) => t.trim().to_string(),
        None => {
            errors.push("missing title: no front-matter field and no heading".to_string());
            String::new()
        }
    };

    let spec_folder = front_matter
        .spec_folder
        .clone()
        .filter(|f| !f.trim().is_empty())
        .or_else(|| derive_spec_folder(file_path));
    let spec_folder = match spec_folder {
        Some(f) => f.trim().to_string(),
        None => {
            errors.push("missing spec_folder: not in front-matter and not derivable from path".to_string());
            String::new()
        }
    };

    let context_type = match front_matter.context_type.as_deref() {
        Some(s) => match ContextType::parse(s) {
            Some(ct) => ct,
            None => {
                errors.push(format!("invalid context_type: {s:?}"));
                ContextType::General
            }
        },
        None => ContextType::General,
    };

    let importance_tier = match front_matter.importance_tier.as_deref() {
        Some(s) => match ImportanceTier::parse(s) {
            Some(tier) => tier,
            None => {
                errors.push(format!("invalid importance_tier: {s:?}"));
                ImportanceTier::Normal
            }
        },
        None => ImportanceTier::Normal,
    };

    if front_matter.trigger_phrases.len() > MAX_TRIGGER_PHRASES {
        warnings.push(format!(
            "trigger_phrases truncated to {MAX_TRIGGER_PHRASES} entries ({} given)",
            front_matter.trigger_phrases.len()
        ));
    }
    let trigger_phrases = normalize_triggers(&front_matter.trigger_phrases);

    let anchors = scan_anchors(text, &mut warnings);

    let valid = errors.is_empty();
    let parsed = valid.then(|| ParsedMemory {
        spec_folder,
        file_path: file_path.to_string_lossy().to_string(),
        title,
        content: text.to_string(),
        content_hash: content_hash(raw),
        trigger_phrases,
        context_type,
        importance_tier,
        anchors,
    });

    ParseOutcome {
        valid,
        errors,
        warnings,
        parsed,
    }
}

/// Split a leading `---` front-matter block from the body
fn split_front_matter(text: &str) -> (Option<&str>, &str) {
    let rest = match text.strip_prefix("---") {
        Some(r) => r,
        None => return (None, text),
    };
    let rest = match rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n")) {
        Some(r) => r,
        None => return (None, text),
    };
    for terminator in ["\n---\n", "\n---\r\n", "\r\n---\r\n", "\r\n---\n"] {
        if let Some(pos) = rest.find(terminator) {
            return (Some(&rest[..pos]), &rest[pos + terminator.len()..]);
        }
    }
    // Front-matter that runs to EOF
    if let Some(stripped) = rest.strip_suffix("\n---").or_else(|| rest.strip_suffix("\r\n---")) {
        return (Some(stripped), "");
    }
    (None, text)
}

fn first_heading(body: &str) -> Option<String> {
    body.lines()
        .map(str::trim)
        .find(|line| line.starts_with('#'))
        .map(|line| line.trim_start_matches('#').trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Scan anchor open/close markers, warning on unclosed, mismatched, or
/// orphaned markers
fn scan_anchors(text: &str, warnings: &mut Vec<String>) -> Vec<Anchor> {
    let mut anchors: Vec<Anchor> = Vec::new();
    let mut open: Vec<usize> = Vec::new(); // indices into `anchors`

    for (line_no, line) in text.lines().enumerate() {
        let line_no = line_no + 1;
        for marker in find_markers(line) {
            match marker {
                Marker::Open(id) => {
                    open.push(anchors.len());
                    anchors.push(Anchor {
                        id,
                        start_line: line_no,
                        end_line: None,
                    });
                }
                Marker::Close(id) => {
                    match open.iter().rposition(|&i| anchors[i].id == id) {
                        Some(pos) => {
                            let idx = open.remove(pos);
                            anchors[idx].end_line = Some(line_no);
                            if pos != open.len() {
                                warnings.push(format!(
                                    "anchor '{id}' closed out of order at line {line_no}"
                                ));
                            }
                        }
                        None => warnings.push(format!(
                            "orphaned close marker for anchor '{id}' at line {line_no}"
                        )),
                    }
                }
            }
        }
    }

    for &idx in &open {
        warnings.push(format!(
            "anchor '{}' opened at line {} was never closed",
            anchors[idx].id, anchors[idx].start_line
        ));
    }

    anchors
}

enum Marker {
    Open(String),
    Close(String),
}

fn find_markers(line: &str) -> Vec<Marker> {
    let mut markers = Vec::new();
    let mut rest = line;
    while let Some(pos) = rest.find("ANCHOR:") {
        let is_close = rest[..pos].ends_with('/');
        let after = &rest[pos + "ANCHOR:".len()..];
        let id: String = after
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        if !id.is_empty() {
            if is_close {
                markers.push(Marker::Close(id));
            } else {
                markers.push(Marker::Open(id));
            }
        }
        rest = after;
    }
    markers
}

/// Scan anchors from already-loaded content, discarding warnings
///
/// Used by retrieval when projecting anchor spans out of a stored row.
pub fn extract_anchors(content: &str) -> Vec<Anchor> {
    let mut warnings = Vec::new();
    scan_anchors(content, &mut warnings)
}

/// Extract the content covered by the named anchors
///
/// Returns the concatenated span bodies (marker lines excluded). `None`
/// when no requested anchor matches a closed span.
pub fn anchor_spans(content: &str, anchors: &[Anchor], wanted: &[String]) -> Option<String> {
    let lines: Vec<&str> = content.lines().collect();
    let mut out = Vec::new();
    for anchor in anchors {
        if !wanted.iter().any(|w| w.eq_ignore_ascii_case(&anchor.id)) {
            continue;
        }
        let Some(end) = anchor.end_line else { continue };
        if anchor.start_line >= end || end > lines.len() {
            continue;
        }
        let body = lines[anchor.start_line..end - 1].join("\n");
        if !body.trim().is_empty() {
            out.push(body);
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out.join("\n\n"))
    }
}

// ============================================================================
// TESTS
// ============================================================================
