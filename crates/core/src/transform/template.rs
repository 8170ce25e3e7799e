//! Template expansion stage.
//!
//! Renders the file through minijinja with strict undefined-variable
//! handling; `for`, `if`, and `include` are available. Includes resolve
//! against the rendered file's directory and never leave the owning source
//! root.

use crate::error::{FsError, FsResult};
use crate::transform::StageContext;
use minijinja::{Environment, UndefinedBehavior};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Render the buffer as a template over the configured variables plus the
/// path context (`path`, `file_name`).
pub fn render(
    bytes: &[u8],
    vars: &BTreeMap<String, serde_json::Value>,
    ctx: &StageContext<'_>,
) -> FsResult<Vec<u8>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| FsError::InvalidInput(format!("template is not UTF-8: {e}")))?;

    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);

    let base: Option<PathBuf> = ctx.real_path.parent().map(|p| p.to_path_buf());
    let root: Option<PathBuf> = ctx.source_root.map(|p| p.to_path_buf());
    env.set_loader(move |name| {
        // Includes are sibling-relative; reject anything that climbs out.
        if name.starts_with('/') || name.split('/').any(|seg| seg == "..") {
            return Ok(None);
        }
        let Some(base) = base.as_ref() else { return Ok(None) };
        let candidate = base.join(name);
        if let Some(root) = root.as_ref() {
            if !candidate.starts_with(root) {
                return Ok(None);
            }
        }
        match std::fs::read_to_string(&candidate) {
            Ok(content) => Ok(Some(content)),
            Err(_) => Ok(None),
        }
    });

    let mut scope = serde_json::Map::new();
    for (key, value) in vars {
        scope.insert(key.clone(), value.clone());
    }
    scope.insert("path".into(), serde_json::Value::String(ctx.path.to_string()));
    let file_name = ctx.path.rsplit('/').next().unwrap_or(ctx.path);
    scope.insert("file_name".into(), serde_json::Value::String(file_name.to_string()));

    let rendered = env
        .render_str(text, serde_json::Value::Object(scope))
        .map_err(|e| FsError::InvalidInput(format!("template render failed: {e}")))?;
    Ok(rendered.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{Deadline, TransformLimits};
    use std::path::Path;
    use std::time::Duration;

    fn ctx<'a>(
        path: &'a str,
        real_path: &'a Path,
        root: Option<&'a Path>,
        limits: &'a TransformLimits,
        deadline: &'a Deadline,
    ) -> StageContext<'a> {
        StageContext { path, real_path, source_root: root, limits, deadline }
    }

    fn vars(pairs: &[(&str, serde_json::Value)]) -> BTreeMap<String, serde_json::Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn interpolates_configured_vars() {
        let limits = TransformLimits::default();
        let deadline = Deadline::after(Duration::from_secs(30));
        let c = ctx("greet.txt", Path::new("/src/greet.txt"), None, &limits, &deadline);
        let v = vars(&[("who", serde_json::json!("world"))]);
        let out = render(b"hello {{ who }}", &v, &c).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn path_context_is_available() {
        let limits = TransformLimits::default();
        let deadline = Deadline::after(Duration::from_secs(30));
        let c = ctx("docs/a.txt", Path::new("/src/docs/a.txt"), None, &limits, &deadline);
        let out = render(b"{{ path }}:{{ file_name }}", &BTreeMap::new(), &c).unwrap();
        assert_eq!(out, b"docs/a.txt:a.txt");
    }

    #[test]
    fn undefined_variable_is_an_error() {
        let limits = TransformLimits::default();
        let deadline = Deadline::after(Duration::from_secs(30));
        let c = ctx("x", Path::new("/src/x"), None, &limits, &deadline);
        let err = render(b"{{ missing }}", &BTreeMap::new(), &c).unwrap_err();
        assert!(matches!(err, FsError::InvalidInput(_)));
    }

    #[test]
    fn for_and_if_directives() {
        let limits = TransformLimits::default();
        let deadline = Deadline::after(Duration::from_secs(30));
        let c = ctx("x", Path::new("/src/x"), None, &limits, &deadline);
        let v = vars(&[("items", serde_json::json!([1, 2, 3]))]);
        let out = render(
            b"{% for i in items %}{% if i > 1 %}{{ i }}{% endif %}{% endfor %}",
            &v,
            &c,
        )
        .unwrap();
        assert_eq!(out, b"23");
    }

    #[test]
    fn include_reads_sibling_file_within_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("partial.txt"), "from partial").unwrap();
        let main = dir.path().join("main.txt");
        std::fs::write(&main, "x").unwrap();

        let limits = TransformLimits::default();
        let deadline = Deadline::after(Duration::from_secs(30));
        let c = ctx("main.txt", &main, Some(dir.path()), &limits, &deadline);
        let out = render(b"[{% include 'partial.txt' %}]", &BTreeMap::new(), &c).unwrap();
        assert_eq!(out, b"[from partial]");
    }

    #[test]
    fn include_cannot_climb_out_of_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(dir.path().join("secret.txt"), "secret").unwrap();
        let main = root.join("main.txt");
        std::fs::write(&main, "x").unwrap();

        let limits = TransformLimits::default();
        let deadline = Deadline::after(Duration::from_secs(30));
        let c = ctx("main.txt", &main, Some(&root), &limits, &deadline);
        let result = render(b"{% include '../secret.txt' %}", &BTreeMap::new(), &c);
        assert!(result.is_err());
    }
}
