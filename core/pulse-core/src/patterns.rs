//! Working-directory extraction rules for session-descriptor files.
//!
//! Rules are data: an ordered list of (pattern, capture group, transform).
//! The first rule that yields a usable absolute path wins. Add a rule here
//! when the monitored tool adopts a new project-layout convention.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// Post-processing applied to a rule's captured text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathTransform {
    /// Use the capture as-is (trailing slashes trimmed).
    AsIs,
    /// The capture names an entry inside the project; use its parent.
    Parent,
}

#[derive(Debug)]
pub struct ExtractionRule {
    pub name: &'static str,
    pub pattern: Regex,
    pub group: usize,
    pub transform: PathTransform,
}

impl ExtractionRule {
    fn new(name: &'static str, pattern: &str, group: usize, transform: PathTransform) -> Self {
        Self {
            name,
            pattern: Regex::new(pattern).unwrap(),
            group,
            transform,
        }
    }

    /// Applies this rule to `content`, returning a normalized absolute path.
    pub fn apply(&self, content: &str) -> Option<String> {
        let captured = self.pattern.captures(content)?.get(self.group)?.as_str();
        let path = match self.transform {
            PathTransform::AsIs => captured.to_string(),
            PathTransform::Parent => Path::new(captured).parent()?.to_str()?.to_string(),
        };
        normalize_dir(&path)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Descriptor Rules (ordered, first match wins)
// ═══════════════════════════════════════════════════════════════════════════════

pub static WORKING_DIRECTORY_RULES: Lazy<Vec<ExtractionRule>> = Lazy::new(|| {
    vec![
        // /home/u/proj/.claude/settings.local.json -> /home/u/proj
        ExtractionRule::new(
            "project_settings_file",
            r#"(/[^\s"'`:;]+/\.claude)/settings(?:\.local)?\.json"#,
            1,
            PathTransform::Parent,
        ),
        ExtractionRule::new("cwd_field", r#""cwd"\s*:\s*"(/[^"]+)""#, 1, PathTransform::AsIs),
        ExtractionRule::new(
            "pwd_assignment",
            r#"(?m)^\s*(?:export\s+|declare\s+-x\s+)?PWD=['"]?(/[^'"\s]+)"#,
            1,
            PathTransform::AsIs,
        ),
        ExtractionRule::new(
            "cd_command",
            r#"(?m)^\s*cd\s+['"]?(/[^'"\s;&|]+)"#,
            1,
            PathTransform::AsIs,
        ),
    ]
});

/// Extracts a working-directory hint from descriptor content.
pub fn extract_working_directory(content: &str) -> Option<String> {
    extract_with_rules(&WORKING_DIRECTORY_RULES, content)
}

pub fn extract_with_rules(rules: &[ExtractionRule], content: &str) -> Option<String> {
    rules.iter().find_map(|rule| {
        let path = rule.apply(content)?;
        tracing::trace!(rule = rule.name, path = %path, "Descriptor rule matched");
        Some(path)
    })
}

/// Last path component, used as the display name of a project.
pub fn project_name_for(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.to_string())
}

/// Strips trailing slashes; rejects relative paths and the filesystem root.
fn normalize_dir(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() || !trimmed.starts_with('/') {
        return None;
    }
    Some(trimmed.to_string())
}
