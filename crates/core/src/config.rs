//! Declarative configuration: TOML document consumed at startup and on
//! reload, compiled into the runtime rule/transform/layer objects.
//!
//! Validation failures are `InvalidInput` and are never retried.

use crate::cache::CacheTuning;
use crate::error::{FsError, FsResult};
use crate::layers::{Classifier, ClassifierKind, DateField, Layer, LayerKind, TagExtractor};
use crate::pattern::Pattern;
use crate::rules::{Rule, RuleKind, RulePredicate};
use crate::scan::ScanOptions;
use crate::transform::{Algorithm, FailureMode, Pipeline, Stage, Transform, TransformLimits};
use crate::types::{SourceRoot, DEFAULT_SYMLINK_DEPTH};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Document model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub transforms: Vec<TransformConfig>,
    #[serde(default)]
    pub layers: Vec<LayerConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Enable mutating operations against writable sources.
    #[serde(default)]
    pub write_through: bool,
    /// Dereference symlinks within their source root during scans.
    #[serde(default = "default_true")]
    pub follow_symlinks: bool,
    /// Control-plane listen address.
    #[serde(default = "default_control_listen")]
    pub control_listen: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            rules: Vec::new(),
            transforms: Vec::new(),
            layers: Vec::new(),
            cache: CacheConfig::default(),
            limits: LimitsConfig::default(),
            write_through: false,
            follow_symlinks: true,
            control_listen: default_control_listen(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_control_listen() -> String {
    "127.0.0.1:7878".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub readonly: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub regex: Option<String>,
    #[serde(default)]
    pub regexes: Vec<String>,
    #[serde(default)]
    pub min_size: Option<u64>,
    #[serde(default)]
    pub max_size: Option<u64>,
    #[serde(default)]
    pub modified_after: Option<i64>,
    #[serde(default)]
    pub modified_before: Option<i64>,
    #[serde(default)]
    pub mode_mask: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformConfig {
    pub name: String,
    pub selector: String,
    #[serde(rename = "type")]
    pub stage: String,
    #[serde(default)]
    pub algorithm: Option<String>,
    #[serde(default)]
    pub level: Option<u32>,
    #[serde(default)]
    pub delimiter: Option<String>,
    #[serde(default)]
    pub vars: BTreeMap<String, toml::Value>,
    /// `degraded` (default) or `fatal`.
    #[serde(default)]
    pub on_error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Classifier layers: `extension`, `size`, `mime`, `pattern`,
    /// `vcs-status`.
    #[serde(default)]
    pub classifier: Option<String>,
    /// Pattern-classifier table, first match wins.
    #[serde(default)]
    pub patterns: Vec<PatternCategoryConfig>,
    /// Date layers: `mtime`, `ctime`, `atime`.
    #[serde(default)]
    pub field: Option<String>,
    /// Tag layers.
    #[serde(default)]
    pub extractors: Vec<ExtractorConfig>,
    /// Hierarchical layers: one classifier name per level.
    #[serde(default)]
    pub classifiers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternCategoryConfig {
    pub pattern: String,
    pub category: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractorConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attr: Option<String>,
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(default)]
    pub table: Vec<PatternTagsConfig>,
    #[serde(default)]
    pub extensions: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternTagsConfig {
    pub pattern: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub l1_entries: usize,
    pub l2_size_bytes: u64,
    pub l3_size_bytes: u64,
    pub l1_ttl_s: u64,
    pub l2_ttl_s: u64,
    pub l3_ttl_s: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let tuning = CacheTuning::default();
        Self {
            enabled: tuning.enabled,
            l1_entries: tuning.l1_entries,
            l2_size_bytes: tuning.l2_size_bytes,
            l3_size_bytes: tuning.l3_size_bytes,
            l1_ttl_s: tuning.l1_ttl.as_secs(),
            l2_ttl_s: tuning.l2_ttl.as_secs(),
            l3_ttl_s: tuning.l3_ttl.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LimitsConfig {
    pub max_file_size: u64,
    pub max_transform_output: u64,
    pub max_transform_wall_time_s: u64,
    pub max_symlink_depth: u32,
    pub max_open_handles: usize,
    pub max_inflight_transforms: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let transform = TransformLimits::default();
        Self {
            max_file_size: transform.max_input,
            max_transform_output: transform.max_output,
            max_transform_wall_time_s: transform.wall_time.as_secs(),
            max_symlink_depth: DEFAULT_SYMLINK_DEPTH,
            max_open_handles: 10_000,
            max_inflight_transforms: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading and validation
// ---------------------------------------------------------------------------

impl Config {
    pub fn load(path: &Path) -> FsResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            FsError::InvalidInput(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> FsResult<Self> {
        let config: Config = toml::from_str(text)
            .map_err(|e| FsError::InvalidInput(format!("config parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Minimal config over a single source directory, for CLI-only startup.
    pub fn single_source(path: PathBuf) -> Self {
        Self {
            sources: vec![SourceConfig { path, priority: 0, readonly: false }],
            ..Default::default()
        }
    }

    pub fn validate(&self) -> FsResult<()> {
        if self.sources.is_empty() {
            return Err(FsError::InvalidInput("at least one source is required".into()));
        }
        let mut names: Vec<&str> = Vec::new();
        for layer in &self.layers {
            if layer.name.is_empty() || layer.name.contains('/') {
                return Err(FsError::InvalidInput(format!(
                    "layer name '{}' must be a single path segment",
                    layer.name
                )));
            }
            if names.contains(&layer.name.as_str()) {
                return Err(FsError::InvalidInput(format!(
                    "duplicate layer name '{}'",
                    layer.name
                )));
            }
            names.push(&layer.name);
        }
        // Compile everything once so bad patterns fail at load, not at use.
        self.build_rules()?;
        self.build_pipeline()?;
        self.build_layers()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Compilation into runtime objects
    // -----------------------------------------------------------------------

    pub fn source_roots(&self) -> Vec<SourceRoot> {
        let mut roots: Vec<SourceRoot> = self
            .sources
            .iter()
            .map(|s| SourceRoot {
                root_path: s.path.clone(),
                priority: s.priority,
                readonly: s.readonly,
            })
            .collect();
        roots.sort_by_key(|r| r.priority);
        roots
    }

    pub fn build_rules(&self) -> FsResult<Vec<Rule>> {
        self.rules
            .iter()
            .map(|r| {
                let kind = match r.kind.as_str() {
                    "include" => RuleKind::Include,
                    "exclude" => RuleKind::Exclude,
                    other => {
                        return Err(FsError::InvalidInput(format!(
                            "rule '{}': unknown type '{other}'",
                            r.name
                        )))
                    }
                };
                let mut patterns = Vec::new();
                for glob in r.pattern.iter().chain(r.patterns.iter()) {
                    patterns.push(Pattern::glob(glob)?);
                }
                for regex in r.regex.iter().chain(r.regexes.iter()) {
                    patterns.push(Pattern::regex(regex)?);
                }
                Ok(Rule {
                    name: r.name.clone(),
                    kind,
                    predicate: RulePredicate {
                        patterns,
                        min_size: r.min_size,
                        max_size: r.max_size,
                        modified_after: r.modified_after,
                        modified_before: r.modified_before,
                        mode_mask: r.mode_mask,
                    },
                })
            })
            .collect()
    }

    pub fn build_pipeline(&self) -> FsResult<Pipeline> {
        let transforms: Vec<Transform> = self
            .transforms
            .iter()
            .map(|t| {
                let selector = Pattern::glob(&t.selector)?;
                let stage = build_stage(t)?;
                let on_error = match t.on_error.as_deref() {
                    None | Some("degraded") => FailureMode::Degraded,
                    Some("fatal") => FailureMode::Fatal,
                    Some(other) => {
                        return Err(FsError::InvalidInput(format!(
                            "transform '{}': unknown on_error '{other}'",
                            t.name
                        )))
                    }
                };
                Ok(Transform { name: t.name.clone(), selector, stage, on_error })
            })
            .collect::<FsResult<_>>()?;
        Ok(Pipeline::new(transforms))
    }

    pub fn build_layers(&self) -> FsResult<Vec<Arc<Layer>>> {
        self.layers
            .iter()
            .map(|l| {
                let kind = match l.kind.as_str() {
                    "classifier" => LayerKind::Classifier(build_classifier(
                        l.classifier.as_deref().unwrap_or("extension"),
                        &l.patterns,
                        &l.name,
                    )?),
                    "date" => {
                        LayerKind::Date(DateField::parse(l.field.as_deref().unwrap_or("mtime"))?)
                    }
                    "tag" => {
                        if l.extractors.is_empty() {
                            return Err(FsError::InvalidInput(format!(
                                "tag layer '{}' needs at least one extractor",
                                l.name
                            )));
                        }
                        let extractors = l
                            .extractors
                            .iter()
                            .map(build_extractor)
                            .collect::<FsResult<Vec<_>>>()?;
                        LayerKind::Tag(extractors)
                    }
                    "hierarchical" => {
                        if l.classifiers.is_empty() {
                            return Err(FsError::InvalidInput(format!(
                                "hierarchical layer '{}' needs at least one classifier",
                                l.name
                            )));
                        }
                        let classifiers = l
                            .classifiers
                            .iter()
                            .map(|c| build_classifier(c, &[], &l.name))
                            .collect::<FsResult<Vec<_>>>()?;
                        LayerKind::Hierarchy(classifiers)
                    }
                    other => {
                        return Err(FsError::InvalidInput(format!(
                            "layer '{}': unknown type '{other}'",
                            l.name
                        )))
                    }
                };
                Ok(Arc::new(Layer::new(l.name.clone(), kind)))
            })
            .collect()
    }

    pub fn cache_tuning(&self) -> CacheTuning {
        CacheTuning {
            enabled: self.cache.enabled,
            l1_entries: self.cache.l1_entries,
            l2_size_bytes: self.cache.l2_size_bytes,
            l3_size_bytes: self.cache.l3_size_bytes,
            l1_ttl: Duration::from_secs(self.cache.l1_ttl_s),
            l2_ttl: Duration::from_secs(self.cache.l2_ttl_s),
            l3_ttl: Duration::from_secs(self.cache.l3_ttl_s),
        }
    }

    pub fn transform_limits(&self) -> TransformLimits {
        TransformLimits {
            max_input: self.limits.max_file_size,
            max_output: self.limits.max_transform_output,
            wall_time: Duration::from_secs(self.limits.max_transform_wall_time_s),
        }
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions { follow_symlinks: self.follow_symlinks }
    }
}

fn build_stage(t: &TransformConfig) -> FsResult<Stage> {
    let delimiter = match t.delimiter.as_deref() {
        None => b',',
        Some(d) if d.len() == 1 => d.as_bytes()[0],
        Some(other) => {
            return Err(FsError::InvalidInput(format!(
                "transform '{}': delimiter '{other}' must be one byte",
                t.name
            )))
        }
    };
    match t.stage.as_str() {
        "compress" | "compression" => Ok(Stage::Compress {
            algorithm: Algorithm::parse(t.algorithm.as_deref().unwrap_or("gzip"))?,
            level: t.level.unwrap_or(6),
        }),
        "decompress" | "decompression" => Ok(Stage::Decompress {
            algorithm: Algorithm::parse(t.algorithm.as_deref().unwrap_or("gzip"))?,
        }),
        "markdown-to-html" => Ok(Stage::MarkdownToHtml),
        "csv-to-json" => Ok(Stage::CsvToJson { delimiter }),
        "json-to-csv" => Ok(Stage::JsonToCsv { delimiter }),
        "yaml-to-json" => Ok(Stage::YamlToJson),
        "template" => {
            let vars = t
                .vars
                .iter()
                .map(|(k, v)| {
                    let json = serde_json::to_value(v).map_err(|e| {
                        FsError::InvalidInput(format!(
                            "transform '{}': var '{k}' not representable: {e}",
                            t.name
                        ))
                    })?;
                    Ok((k.clone(), json))
                })
                .collect::<FsResult<BTreeMap<_, _>>>()?;
            Ok(Stage::Template { vars })
        }
        other => Err(FsError::InvalidInput(format!(
            "transform '{}': unknown stage type '{other}'",
            t.name
        ))),
    }
}

fn build_classifier(
    name: &str,
    patterns: &[PatternCategoryConfig],
    layer: &str,
) -> FsResult<Classifier> {
    let kind = match name {
        "extension" => ClassifierKind::Extension,
        "size" => ClassifierKind::SizeBucket,
        "mime" => ClassifierKind::Mime,
        "vcs-status" => ClassifierKind::VcsStatus,
        "pattern" => {
            if patterns.is_empty() {
                return Err(FsError::InvalidInput(format!(
                    "layer '{layer}': pattern classifier needs a patterns table"
                )));
            }
            let table = patterns
                .iter()
                .map(|p| Ok((Pattern::glob(&p.pattern)?, p.category.clone())))
                .collect::<FsResult<Vec<_>>>()?;
            ClassifierKind::PatternTable(table)
        }
        other => {
            return Err(FsError::InvalidInput(format!(
                "layer '{layer}': unknown classifier '{other}'"
            )))
        }
    };
    Ok(Classifier::new(kind))
}

fn build_extractor(e: &ExtractorConfig) -> FsResult<TagExtractor> {
    match e.kind.as_str() {
        "xattr" => Ok(TagExtractor::Xattr {
            attr: e.attr.clone().unwrap_or_else(|| "user.tags".to_string()),
        }),
        "sidecar" => Ok(TagExtractor::Sidecar {
            suffix: e.suffix.clone().unwrap_or_else(|| ".tags".to_string()),
        }),
        "filename-glob" => Ok(TagExtractor::FilenameGlob { table: build_tag_table(&e.table)? }),
        "path-glob" => Ok(TagExtractor::PathGlob { table: build_tag_table(&e.table)? }),
        "extension-map" => Ok(TagExtractor::ExtensionMap { table: e.extensions.clone() }),
        other => Err(FsError::InvalidInput(format!("unknown tag extractor '{other}'"))),
    }
}

fn build_tag_table(table: &[PatternTagsConfig]) -> FsResult<Vec<(Pattern, Vec<String>)>> {
    table.iter().map(|row| Ok((Pattern::glob(&row.pattern)?, row.tags.clone()))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
write_through = true

[[sources]]
path = "/data/main"
priority = 1

[[sources]]
path = "/data/extra"
priority = 2
readonly = true

[[rules]]
name = "hide-dotfiles"
type = "exclude"
pattern = "**/.*"

[[rules]]
name = "keep-python"
type = "include"
patterns = ["**/*.py"]
min_size = 1

[[transforms]]
name = "render-markdown"
selector = "**/*.md"
type = "markdown-to-html"

[[transforms]]
name = "unpack-logs"
selector = "**/*.gz"
type = "decompress"
algorithm = "gzip"
on_error = "fatal"

[[layers]]
name = "by-type"
type = "classifier"
classifier = "extension"

[[layers]]
name = "by-date"
type = "date"
field = "mtime"

[[layers]]
name = "by-tag"
type = "tag"
extractors = [{ type = "xattr", attr = "user.tags" }, { type = "sidecar" }]

[[layers]]
name = "shelf"
type = "hierarchical"
classifiers = ["extension", "size"]

[cache]
l1_entries = 500
l2_size_bytes = 1048576
l3_size_bytes = 2097152

[limits]
max_symlink_depth = 4
"#;

    #[test]
    fn full_document_parses_and_compiles() {
        let config = Config::parse(FULL).unwrap();
        assert_eq!(config.sources.len(), 2);
        assert!(config.write_through);

        let rules = config.build_rules().unwrap();
        assert_eq!(rules.len(), 2);

        let pipeline = config.build_pipeline().unwrap();
        assert!(pipeline.plan_for("doc.md").is_some());
        assert!(pipeline.plan_for("doc.txt").is_none());

        let layers = config.build_layers().unwrap();
        assert_eq!(layers.len(), 4);
        assert_eq!(layers[0].kind.type_name(), "classifier");
        assert_eq!(layers[3].kind.type_name(), "hierarchical");

        let tuning = config.cache_tuning();
        assert_eq!(tuning.l1_entries, 500);
        assert_eq!(tuning.l1_ttl.as_secs(), 60);

        assert_eq!(config.limits.max_symlink_depth, 4);
        assert_eq!(config.limits.max_open_handles, 10_000);
    }

    #[test]
    fn no_sources_is_invalid() {
        let err = Config::parse("write_through = false").unwrap_err();
        assert!(matches!(err, FsError::InvalidInput(_)));
    }

    #[test]
    fn duplicate_layer_names_are_rejected() {
        let doc = r#"
[[sources]]
path = "/d"

[[layers]]
name = "dup"
type = "classifier"

[[layers]]
name = "dup"
type = "date"
"#;
        assert!(Config::parse(doc).is_err());
    }

    #[test]
    fn layer_name_with_separator_is_rejected() {
        let doc = r#"
[[sources]]
path = "/d"

[[layers]]
name = "a/b"
type = "classifier"
"#;
        assert!(Config::parse(doc).is_err());
    }

    #[test]
    fn bad_glob_fails_at_load() {
        let doc = r#"
[[sources]]
path = "/d"

[[rules]]
name = "broken"
type = "exclude"
pattern = "a["
"#;
        assert!(Config::parse(doc).is_err());
    }

    #[test]
    fn unknown_stage_type_is_rejected() {
        let doc = r#"
[[sources]]
path = "/d"

[[transforms]]
name = "x"
selector = "**"
type = "rot13"
"#;
        assert!(Config::parse(doc).is_err());
    }

    #[test]
    fn sources_sort_by_priority() {
        let doc = r#"
[[sources]]
path = "/low-priority"
priority = 9

[[sources]]
path = "/high-priority"
priority = 1
"#;
        let config = Config::parse(doc).unwrap();
        let roots = config.source_roots();
        assert_eq!(roots[0].root_path, PathBuf::from("/high-priority"));
    }

    #[test]
    fn default_tuning_values() {
        let config = Config::parse("[[sources]]\npath = \"/d\"").unwrap();
        assert!(!config.write_through);
        assert!(config.follow_symlinks);
        let tuning = config.cache_tuning();
        assert!(tuning.enabled);
        assert_eq!(tuning.l1_entries, 10_000);
        assert_eq!(tuning.l2_size_bytes, 512 * 1024 * 1024);
        assert_eq!(tuning.l3_size_bytes, 1024 * 1024 * 1024);
        let limits = config.transform_limits();
        assert_eq!(limits.wall_time.as_secs(), 30);
    }
}
