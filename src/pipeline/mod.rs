// Pipeline definition generator
//
// Renders a self-contained Nextflow pipeline (script plus engine config) for a
// workflow template and writes it into the job's working directory. Nothing
// is executed here.

pub mod definition;
pub mod engine_config;
pub mod genome_seq;
pub mod rna_seq;
pub mod single_cell;

use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub use definition::{PipelineScript, Stage, WorkflowCall, READS_NODE};
pub use engine_config::{CompletionRecord, EngineConfig};

use crate::workflow::{AnalysisKind, ContainerImages, RuntimeParams, WorkflowTemplate};

/// File name of the rendered script inside the working directory
pub const SCRIPT_FILE: &str = "main.nf";

/// File name of the rendered engine configuration inside the working directory
pub const CONFIG_FILE: &str = "nextflow.config";

/// Errors raised while generating a pipeline definition
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("Unsupported workflow type: {0}")]
    UnsupportedKind(AnalysisKind),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Rendered, job-specific pipeline ready to hand to the engine
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    pub kind: AnalysisKind,
    pub script: PipelineScript,
    pub config: EngineConfig,
    pub script_path: PathBuf,
    pub config_path: PathBuf,
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    pub profile: Option<String>,
    pub resume: bool,
    pub parameters: BTreeMap<String, Value>,
}

impl PipelineDefinition {
    /// Engine arguments following the `run` contract
    ///
    /// `run <script> -c <config> -work-dir <work> --outdir <out> [-profile p] [-resume] [--key value]...`
    /// Null overrides are skipped.
    pub fn engine_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            self.script_path.display().to_string(),
            "-c".to_string(),
            self.config_path.display().to_string(),
            "-work-dir".to_string(),
            self.work_dir.display().to_string(),
            "--outdir".to_string(),
            self.output_dir.display().to_string(),
        ];

        if let Some(profile) = &self.profile {
            args.push("-profile".to_string());
            args.push(profile.clone());
        }

        if self.resume {
            args.push("-resume".to_string());
        }

        for (key, value) in &self.parameters {
            let rendered = match value {
                Value::Null => continue,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            args.push(format!("--{}", key));
            args.push(rendered);
        }

        args
    }
}

/// Dispatches templates to the per-kind renderers
#[derive(Debug, Clone, Default)]
pub struct PipelineGenerator;

impl PipelineGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Render the script and engine config without touching the filesystem
    pub fn render(
        &self,
        template: &WorkflowTemplate,
        runtime: &RuntimeParams,
    ) -> Result<(PipelineScript, EngineConfig), GenerateError> {
        let script = match &template.kind {
            AnalysisKind::RnaSeq => rna_seq::render(template, runtime),
            AnalysisKind::GenomeSeq => genome_seq::render(template, runtime),
            AnalysisKind::SingleCellRnaSeq => single_cell::render(template, runtime),
            AnalysisKind::Unrecognized(_) => {
                return Err(GenerateError::UnsupportedKind(template.kind.clone()))
            },
        };

        Ok((script, EngineConfig::for_template(template)))
    }

    /// Render and write `main.nf` and `nextflow.config` into the working directory
    ///
    /// The working directory must already exist.
    pub fn generate(
        &self,
        template: &WorkflowTemplate,
        runtime: &RuntimeParams,
    ) -> Result<PipelineDefinition, GenerateError> {
        let (script, config) = self.render(template, runtime)?;

        let script_path = runtime.work_dir.join(SCRIPT_FILE);
        let config_path = runtime.work_dir.join(CONFIG_FILE);
        write_file(&script_path, &script.to_string())?;
        write_file(&config_path, &config.to_string())?;

        tracing::debug!(
            "Generated {} pipeline with {} stages in {}",
            template.kind,
            script.stages.len(),
            runtime.work_dir.display()
        );

        Ok(PipelineDefinition {
            kind: template.kind.clone(),
            script,
            config,
            script_path,
            config_path,
            work_dir: runtime.work_dir.clone(),
            output_dir: runtime.output_dir.clone(),
            profile: runtime.profile.clone(),
            resume: runtime.resume,
            parameters: runtime.parameters.clone(),
        })
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), GenerateError> {
    fs::write(path, content).map_err(|source| GenerateError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Comma separated input paths for `params.reads`
pub(crate) fn joined_inputs(runtime: &RuntimeParams) -> String {
    runtime
        .input_files
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Read channel keyed by sample name with lane and mate suffixes stripped
pub(crate) fn paired_read_channel() -> &'static str {
    r#"Channel.fromPath(params.reads.split(','), checkIfExists: true)
    .map { file ->
        def meta = [id: file.baseName.replaceAll(/(_R[12])?(_001)?\.(fastq|fq)(\.gz)?$/, '')]
        return [meta, file]
    }"#
}

/// Read quality control stage shared by every kind
pub(crate) fn fastqc_stage(containers: &ContainerImages) -> Stage {
    Stage::new("FASTQC", "FastQC", containers.image("fastqc"), "fastqc")
        .input("tuple val(meta), path(reads)")
        .output("path(\"*.html\")")
        .output("path(\"*.zip\")")
        .script("\"\"\"\nfastqc --quiet --threads $task.cpus $reads\n\"\"\"")
}
