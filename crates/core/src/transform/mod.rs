//! Content transform stages and the ordered pipeline that chains them.
//!
//! Stages apply in order over the whole byte buffer. Each stage declares
//! whether failure is fatal (the read fails) or degraded (the original bytes
//! pass through and the incident is visible only in statistics and logs).
//! The ordered hash of stage identities and parameters fingerprints the
//! pipeline and keys the transformed-content cache.

pub mod compress;
pub mod convert;
pub mod template;

use crate::error::{FsError, FsResult};
use crate::pattern::Pattern;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

pub use compress::Algorithm;

// ---------------------------------------------------------------------------
// Limits and deadlines
// ---------------------------------------------------------------------------

/// Per-stage resource bounds. Memory is bounded through the input and output
/// caps; the wall-clock budget is checked between stages and between chunks
/// inside the streaming stages.
#[derive(Debug, Clone)]
pub struct TransformLimits {
    pub max_input: u64,
    pub max_output: u64,
    pub wall_time: Duration,
}

impl Default for TransformLimits {
    fn default() -> Self {
        Self {
            max_input: 1024 * 1024 * 1024,
            max_output: 100 * 1024 * 1024,
            wall_time: Duration::from_secs(30),
        }
    }
}

/// Cancellation point for long-running stages.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    end: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self { end: Instant::now() + budget }
    }

    pub fn check(&self) -> FsResult<()> {
        if Instant::now() >= self.end {
            Err(FsError::Timeout("transform wall-clock budget exhausted".into()))
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Whether a failing stage aborts the read or passes the bytes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    Degraded,
    Fatal,
}

/// Extension point for stages supplied by embedders.
pub trait CustomStage: Send + Sync {
    /// Stable identifier, part of the pipeline fingerprint.
    fn name(&self) -> &str;
    /// Parameter string, part of the pipeline fingerprint.
    fn params(&self) -> String;
    fn apply(&self, bytes: &[u8], ctx: &StageContext<'_>) -> FsResult<Vec<u8>>;
}

/// Everything a stage may need besides the bytes.
pub struct StageContext<'a> {
    /// Canonical mount-relative path being read.
    pub path: &'a str,
    /// Backing file the bytes came from.
    pub real_path: &'a Path,
    /// Owning source root, for stages that resolve relative references.
    pub source_root: Option<&'a Path>,
    pub limits: &'a TransformLimits,
    pub deadline: &'a Deadline,
}

/// The built-in stage set plus the custom escape hatch.
#[derive(Clone)]
pub enum Stage {
    Compress { algorithm: Algorithm, level: u32 },
    Decompress { algorithm: Algorithm },
    MarkdownToHtml,
    CsvToJson { delimiter: u8 },
    JsonToCsv { delimiter: u8 },
    YamlToJson,
    Template { vars: BTreeMap<String, serde_json::Value> },
    User(Arc<dyn CustomStage>),
}

impl Stage {
    /// Stable identity string covering the stage kind and its parameters.
    pub fn identity(&self) -> String {
        match self {
            Stage::Compress { algorithm, level } => {
                format!("compress:{}:{level}", algorithm.name())
            }
            Stage::Decompress { algorithm } => format!("decompress:{}", algorithm.name()),
            Stage::MarkdownToHtml => "markdown-to-html".into(),
            Stage::CsvToJson { delimiter } => format!("csv-to-json:{delimiter}"),
            Stage::JsonToCsv { delimiter } => format!("json-to-csv:{delimiter}"),
            Stage::YamlToJson => "yaml-to-json".into(),
            Stage::Template { vars } => {
                let mut h = DefaultHasher::new();
                for (k, v) in vars {
                    k.hash(&mut h);
                    v.to_string().hash(&mut h);
                }
                format!("template:{:016x}", h.finish())
            }
            Stage::User(custom) => format!("user:{}:{}", custom.name(), custom.params()),
        }
    }

    /// Apply this stage to the whole buffer.
    pub fn apply(&self, bytes: &[u8], ctx: &StageContext<'_>) -> FsResult<Vec<u8>> {
        match self {
            Stage::Compress { algorithm, level } => {
                compress::compress(*algorithm, *level, bytes, ctx.limits.max_output, ctx.deadline)
            }
            Stage::Decompress { algorithm } => {
                compress::decompress(*algorithm, bytes, ctx.limits.max_output, ctx.deadline)
            }
            Stage::MarkdownToHtml => convert::markdown_to_html(bytes),
            Stage::CsvToJson { delimiter } => convert::csv_to_json(bytes, *delimiter),
            Stage::JsonToCsv { delimiter } => convert::json_to_csv(bytes, *delimiter),
            Stage::YamlToJson => convert::yaml_to_json(bytes),
            Stage::Template { vars } => template::render(bytes, vars, ctx),
            Stage::User(custom) => custom.apply(bytes, ctx),
        }
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Stage({})", self.identity())
    }
}

/// A configured transform: selector glob plus the stage it applies.
#[derive(Debug, Clone)]
pub struct Transform {
    pub name: String,
    pub selector: Pattern,
    pub stage: Stage,
    pub on_error: FailureMode,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The ordered transform list from configuration.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    transforms: Vec<Arc<Transform>>,
}

/// The stage subset applicable to one path, with its fingerprint. Computed
/// once per path and memoized by the resolver.
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    pub stages: Vec<Arc<Transform>>,
    pub fingerprint: u64,
}

/// Result of running a plan over a buffer.
pub struct ApplyOutcome {
    pub bytes: Vec<u8>,
    /// True when at least one stage passed through after a non-fatal failure.
    pub degraded: bool,
}

impl Pipeline {
    pub fn new(transforms: Vec<Transform>) -> Self {
        Self { transforms: transforms.into_iter().map(Arc::new).collect() }
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Select the stages whose selector matches `path`. Returns `None` when
    /// no stage applies, so plain reads skip the transform machinery.
    pub fn plan_for(&self, path: &str) -> Option<PipelinePlan> {
        let stages: Vec<Arc<Transform>> = self
            .transforms
            .iter()
            .filter(|t| t.selector.matches(path))
            .cloned()
            .collect();
        if stages.is_empty() {
            return None;
        }
        let mut h = DefaultHasher::new();
        for stage in &stages {
            stage.stage.identity().hash(&mut h);
            stage.selector.source().hash(&mut h);
        }
        Some(PipelinePlan { stages, fingerprint: h.finish() })
    }
}

/// Apply every stage of a plan in order.
///
/// Degraded-configured stages pass the current bytes through on failure;
/// fatal ones abort the read with the stage's error. Oversized inputs and
/// outputs follow the same policy.
pub fn apply_all(
    plan: &PipelinePlan,
    input: Vec<u8>,
    path: &str,
    real_path: &Path,
    source_root: Option<&Path>,
    limits: &TransformLimits,
) -> FsResult<ApplyOutcome> {
    let deadline = Deadline::after(limits.wall_time);
    let mut bytes = input;
    let mut degraded = false;

    for transform in &plan.stages {
        if let Err(e) = deadline.check() {
            match transform.on_error {
                FailureMode::Fatal => return Err(e),
                FailureMode::Degraded => {
                    warn!(transform = transform.name.as_str(), path, "deadline hit, passing through");
                    degraded = true;
                    break;
                }
            }
        }

        let result = if bytes.len() as u64 > limits.max_input {
            Err(FsError::InvalidInput(format!(
                "stage input exceeds {} bytes",
                limits.max_input
            )))
        } else {
            let ctx = StageContext { path, real_path, source_root, limits, deadline: &deadline };
            transform.stage.apply(&bytes, &ctx).and_then(|out| {
                if out.len() as u64 > limits.max_output {
                    Err(FsError::InvalidInput(format!(
                        "stage output exceeds {} bytes",
                        limits.max_output
                    )))
                } else {
                    Ok(out)
                }
            })
        };

        match result {
            Ok(out) => bytes = out,
            Err(e) => match transform.on_error {
                FailureMode::Fatal => return Err(e),
                FailureMode::Degraded => {
                    warn!(
                        transform = transform.name.as_str(),
                        path,
                        error = %e,
                        "stage failed, passing through"
                    );
                    degraded = true;
                }
            },
        }
    }

    Ok(ApplyOutcome { bytes, degraded })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md_transform(on_error: FailureMode) -> Transform {
        Transform {
            name: "md".into(),
            selector: Pattern::glob("**/*.md").unwrap(),
            stage: Stage::MarkdownToHtml,
            on_error,
        }
    }

    #[test]
    fn plan_selects_matching_stages_only() {
        let pipeline = Pipeline::new(vec![md_transform(FailureMode::Degraded)]);
        assert!(pipeline.plan_for("doc/readme.md").is_some());
        assert!(pipeline.plan_for("doc/readme.txt").is_none());
    }

    #[test]
    fn fingerprint_is_stable_and_order_sensitive() {
        let a = Transform {
            name: "gz".into(),
            selector: Pattern::glob("**/*").unwrap(),
            stage: Stage::Compress { algorithm: Algorithm::Gzip, level: 6 },
            on_error: FailureMode::Degraded,
        };
        let b = Transform {
            name: "md".into(),
            selector: Pattern::glob("**/*").unwrap(),
            stage: Stage::MarkdownToHtml,
            on_error: FailureMode::Degraded,
        };
        let ab = Pipeline::new(vec![a.clone(), b.clone()]).plan_for("x").unwrap().fingerprint;
        let ab2 = Pipeline::new(vec![a.clone(), b.clone()]).plan_for("x").unwrap().fingerprint;
        let ba = Pipeline::new(vec![b, a]).plan_for("x").unwrap().fingerprint;
        assert_eq!(ab, ab2);
        assert_ne!(ab, ba);
    }

    #[test]
    fn fingerprint_changes_with_parameters() {
        let mk = |level| {
            Pipeline::new(vec![Transform {
                name: "gz".into(),
                selector: Pattern::glob("**/*").unwrap(),
                stage: Stage::Compress { algorithm: Algorithm::Gzip, level },
                on_error: FailureMode::Degraded,
            }])
        };
        assert_ne!(
            mk(1).plan_for("x").unwrap().fingerprint,
            mk(9).plan_for("x").unwrap().fingerprint
        );
    }

    #[test]
    fn apply_all_runs_stages_in_order() {
        let pipeline = Pipeline::new(vec![md_transform(FailureMode::Fatal)]);
        let plan = pipeline.plan_for("r.md").unwrap();
        let out =
            apply_all(&plan, b"# T".to_vec(), "r.md", Path::new("r.md"), None, &TransformLimits::default()).unwrap();
        let html = String::from_utf8(out.bytes).unwrap();
        assert!(html.contains("<h1>T</h1>"), "got: {html}");
        assert!(!out.degraded);
    }

    #[test]
    fn degraded_stage_passes_original_bytes() {
        // CSV parse over binary garbage fails; degraded mode passes through.
        let pipeline = Pipeline::new(vec![Transform {
            name: "csv".into(),
            selector: Pattern::glob("**/*").unwrap(),
            stage: Stage::CsvToJson { delimiter: b',' },
            on_error: FailureMode::Degraded,
        }]);
        let plan = pipeline.plan_for("data.bin").unwrap();
        let input = vec![0xff, 0xfe, 0x00, 0x01];
        let out =
            apply_all(&plan, input.clone(), "data.bin", Path::new("data.bin"), None, &TransformLimits::default()).unwrap();
        assert!(out.degraded);
        assert_eq!(out.bytes, input);
    }

    #[test]
    fn fatal_stage_fails_the_read() {
        let pipeline = Pipeline::new(vec![Transform {
            name: "yaml".into(),
            selector: Pattern::glob("**/*").unwrap(),
            stage: Stage::YamlToJson,
            on_error: FailureMode::Fatal,
        }]);
        let plan = pipeline.plan_for("x").unwrap();
        let result = apply_all(&plan, b"{unclosed".to_vec(), "x", Path::new("x"), None, &TransformLimits::default());
        assert!(result.is_err());
    }

    #[test]
    fn oversized_output_respects_failure_mode() {
        let limits = TransformLimits { max_output: 8, ..Default::default() };
        let pipeline = Pipeline::new(vec![md_transform(FailureMode::Degraded)]);
        let plan = pipeline.plan_for("r.md").unwrap();
        let out = apply_all(&plan, b"# a heading".to_vec(), "r.md", Path::new("r.md"), None, &limits).unwrap();
        assert!(out.degraded);
        assert_eq!(out.bytes, b"# a heading");
    }

    #[test]
    fn determinism_over_repeated_runs() {
        let pipeline = Pipeline::new(vec![md_transform(FailureMode::Fatal)]);
        let plan = pipeline.plan_for("r.md").unwrap();
        let first =
            apply_all(&plan, b"*x*".to_vec(), "r.md", Path::new("r.md"), None, &TransformLimits::default()).unwrap().bytes;
        for _ in 0..5 {
            let again = apply_all(&plan, b"*x*".to_vec(), "r.md", Path::new("r.md"), None, &TransformLimits::default())
                .unwrap()
                .bytes;
            assert_eq!(again, first);
        }
    }
}
