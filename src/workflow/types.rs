// Core workflow template types for the omics pipeline orchestrator
//
// This module defines the reusable analysis definitions (workflow templates),
// their kind-specific parameters, resource requests, container images and the
// append-only execution history attached to each template.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use uuid::Uuid;

use crate::utils::serde_helpers::duration_millis;

use super::job::{AnalysisJob, JobId, JobStateError};

/// Unique identifier for a workflow template
pub type TemplateId = Uuid;

/// Analysis kind a template renders into
///
/// Persisted as its kebab-case name. Names this build does not know are kept
/// verbatim so older or newer template documents still load; the pipeline
/// generator rejects them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AnalysisKind {
    /// Bulk RNA-seq: QC, alignment, quantification, differential expression
    RnaSeq,
    /// Whole genome sequencing: alignment through filtered variant calls
    GenomeSeq,
    /// Single-cell RNA-seq: Cell Ranger, Seurat clustering, annotation
    SingleCellRnaSeq,
    /// A kind name with no renderer in this build
    Unrecognized(String),
}

impl AnalysisKind {
    /// All kinds the generator can render
    pub const SUPPORTED: [AnalysisKind; 3] = [
        AnalysisKind::RnaSeq,
        AnalysisKind::GenomeSeq,
        AnalysisKind::SingleCellRnaSeq,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            AnalysisKind::RnaSeq => "rna-seq",
            AnalysisKind::GenomeSeq => "genome-seq",
            AnalysisKind::SingleCellRnaSeq => "single-cell-rna-seq",
            AnalysisKind::Unrecognized(name) => name,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, AnalysisKind::Unrecognized(_))
    }
}

impl From<String> for AnalysisKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "rna-seq" => AnalysisKind::RnaSeq,
            "genome-seq" => AnalysisKind::GenomeSeq,
            "single-cell-rna-seq" => AnalysisKind::SingleCellRnaSeq,
            _ => AnalysisKind::Unrecognized(value),
        }
    }
}

impl From<AnalysisKind> for String {
    fn from(kind: AnalysisKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::str::FromStr for AnalysisKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(AnalysisKind::from(s.to_string()))
    }
}

impl std::fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reference genome information shared by all kinds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenomeParams {
    pub reference: Option<String>,
    pub annotation: Option<String>,
    pub species: Option<String>,
}

/// Read quality control thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QcParams {
    pub min_length: u32,
    pub quality_threshold: u32,
    pub trim_adapters: bool,
}

impl Default for QcParams {
    fn default() -> Self {
        Self {
            min_length: 20,
            quality_threshold: 20,
            trim_adapters: true,
        }
    }
}

/// Library strandedness for RNA-seq quantification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strandedness {
    #[default]
    Unstranded,
    Forward,
    Reverse,
}

impl Strandedness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strandedness::Unstranded => "unstranded",
            Strandedness::Forward => "forward",
            Strandedness::Reverse => "reverse",
        }
    }

    /// featureCounts `-s` flag value
    pub fn feature_counts_flag(&self) -> u8 {
        match self {
            Strandedness::Unstranded => 0,
            Strandedness::Forward => 1,
            Strandedness::Reverse => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Deseq2Params {
    pub design_formula: Option<String>,
    pub contrast_group: Option<String>,
    pub p_value_cutoff: f64,
    pub log_fc_cutoff: f64,
}

impl Default for Deseq2Params {
    fn default() -> Self {
        Self {
            design_formula: None,
            contrast_group: None,
            p_value_cutoff: 0.05,
            log_fc_cutoff: 1.0,
        }
    }
}

/// RNA-seq specific parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RnaSeqParams {
    pub star_index: Option<String>,
    pub gtf_file: Option<String>,
    pub strandedness: Strandedness,
    pub feature_type: String,
    pub attribute_type: String,
    pub deseq2: Deseq2Params,
}

impl Default for RnaSeqParams {
    fn default() -> Self {
        Self {
            star_index: None,
            gtf_file: None,
            strandedness: Strandedness::default(),
            feature_type: "exon".to_string(),
            attribute_type: "gene_id".to_string(),
            deseq2: Deseq2Params::default(),
        }
    }
}

/// Genome sequencing specific parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenomeSeqParams {
    pub bwa_index: Option<String>,
    pub gatk_bundle: Option<String>,
    pub known_sites: Vec<String>,
    pub ploidy: u32,
    pub filter_expression: Option<String>,
}

impl GenomeSeqParams {
    pub const DEFAULT_FILTER_EXPRESSION: &'static str = "QD < 2.0 || FS > 60.0 || MQ < 40.0";
}

impl Default for GenomeSeqParams {
    fn default() -> Self {
        Self {
            bwa_index: None,
            gatk_bundle: None,
            known_sites: Vec::new(),
            ploidy: 2,
            filter_expression: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeuratParams {
    pub min_cells: u32,
    pub min_features: u32,
    pub max_features: u32,
    pub mt_percent_cutoff: f64,
    pub resolution: f64,
    pub dims: u32,
}

impl Default for SeuratParams {
    fn default() -> Self {
        Self {
            min_cells: 3,
            min_features: 200,
            max_features: 2500,
            mt_percent_cutoff: 20.0,
            resolution: 0.5,
            dims: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SingleRParams {
    pub reference_dataset: String,
    pub label_column: String,
}

impl Default for SingleRParams {
    fn default() -> Self {
        Self {
            reference_dataset: "HumanPrimaryCellAtlasData".to_string(),
            label_column: "label.main".to_string(),
        }
    }
}

/// Single-cell RNA-seq specific parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SingleCellParams {
    pub cell_ranger_ref: Option<String>,
    pub expected_cells: u32,
    pub chemistry: String,
    pub seurat: SeuratParams,
    pub single_r: SingleRParams,
}

impl Default for SingleCellParams {
    fn default() -> Self {
        Self {
            cell_ranger_ref: None,
            expected_cells: 3000,
            chemistry: "auto".to_string(),
            seurat: SeuratParams::default(),
            single_r: SingleRParams::default(),
        }
    }
}

/// Parameter bag of a template
///
/// Only the group matching the template's kind is read by the generator; a
/// missing group falls back to its defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateParameters {
    pub genome: GenomeParams,
    pub qc: QcParams,
    pub rna_seq: Option<RnaSeqParams>,
    pub genome_seq: Option<GenomeSeqParams>,
    pub sc_rna_seq: Option<SingleCellParams>,
}

/// Resource request declared by a template
///
/// Memory and time use the execution engine's notation (`8.GB`, `24.h`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceRequest {
    pub cpu: u32,
    pub memory: String,
    pub time: String,
    pub queue: String,
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self {
            cpu: 4,
            memory: "8.GB".to_string(),
            time: "24.h".to_string(),
            queue: "normal".to_string(),
        }
    }
}

impl ResourceRequest {
    /// Numeric part of the memory request, e.g. `32` for `32.GB`
    pub fn memory_amount(&self) -> Option<u64> {
        let digits: String = self.memory.chars().filter(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    }
}

/// Named container/tool image references
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerImages {
    images: BTreeMap<String, String>,
}

impl ContainerImages {
    const DEFAULTS: [(&'static str, &'static str); 9] = [
        ("fastqc", "biocontainers/fastqc:v0.11.9_cv8"),
        ("star", "nfcore/star:2.7.10a"),
        ("featurecounts", "nfcore/subread:2.0.1"),
        ("deseq2", "bioconductor/bioconductor_docker:RELEASE_3_14"),
        ("bwa", "biocontainers/bwa:v0.7.17_cv1"),
        ("gatk", "broadinstitute/gatk:4.2.6.1"),
        ("cellranger", "nfcore/cellranger:7.0.0"),
        ("seurat", "satijalab/seurat:4.3.0"),
        ("singler", "bioconductor/bioconductor_docker:RELEASE_3_14"),
    ];

    /// Images for the given tools, each set to its default reference
    pub fn defaults_for(tools: &[&str]) -> Self {
        let images = tools
            .iter()
            .filter_map(|tool| {
                Self::default_image(tool).map(|image| (tool.to_string(), image.to_string()))
            })
            .collect();
        Self { images }
    }

    pub fn default_image(tool: &str) -> Option<&'static str> {
        Self::DEFAULTS
            .iter()
            .find(|(name, _)| *name == tool)
            .map(|(_, image)| *image)
    }

    pub fn with_image(mut self, tool: impl Into<String>, image: impl Into<String>) -> Self {
        self.images.insert(tool.into(), image.into());
        self
    }

    /// Configured image for a tool, falling back to the built-in default
    pub fn image(&self, tool: &str) -> &str {
        self.images
            .get(tool)
            .map(String::as_str)
            .or_else(|| Self::default_image(tool))
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.images.iter()
    }
}

/// Outcome recorded in a template's execution history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionOutcome {
    Success,
    Failed,
    Cancelled,
}

impl std::fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionOutcome::Success => write!(f, "success"),
            ExecutionOutcome::Failed => write!(f, "failed"),
            ExecutionOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One entry of a template's execution history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub job_id: JobId,
    pub executed_at: DateTime<Utc>,
    pub outcome: ExecutionOutcome,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

/// Aggregate over the history entries sharing one outcome
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeStats {
    pub count: usize,
    pub mean_duration: Duration,
}

/// A reusable, versioned analysis definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: TemplateId,
    /// User that created the template
    pub owner: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub kind: AnalysisKind,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub parameters: TemplateParameters,
    #[serde(default)]
    pub resources: ResourceRequest,
    #[serde(default)]
    pub containers: ContainerImages,
    #[serde(default)]
    pub is_template: bool,
    /// Soft-delete flag; templates are deactivated, never removed
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    execution_history: Vec<ExecutionRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_active() -> bool {
    true
}

impl WorkflowTemplate {
    /// Create a new active template with default parameters
    pub fn new(name: impl Into<String>, kind: AnalysisKind, owner: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            project_id: None,
            name: name.into(),
            description: None,
            kind,
            version: default_version(),
            parameters: TemplateParameters::default(),
            resources: ResourceRequest::default(),
            containers: ContainerImages::default(),
            is_template: false,
            is_active: true,
            execution_history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// `<kind>_<version>_<name>`
    pub fn identifier(&self) -> String {
        format!("{}_{}_{}", self.kind, self.version, self.name)
    }

    pub fn execution_history(&self) -> &[ExecutionRecord] {
        &self.execution_history
    }

    /// Append an execution record for a job launched from this template
    pub fn record_execution(
        &mut self,
        job: &AnalysisJob,
        outcome: ExecutionOutcome,
        duration: Duration,
    ) -> Result<&ExecutionRecord, JobStateError> {
        let record = self.execution_record(job, outcome, duration)?;
        self.push_record(record);
        Ok(&self.execution_history[self.execution_history.len() - 1])
    }

    /// History entry for a job of this template, not yet appended
    pub fn execution_record(
        &self,
        job: &AnalysisJob,
        outcome: ExecutionOutcome,
        duration: Duration,
    ) -> Result<ExecutionRecord, JobStateError> {
        if job.template_id != self.id {
            return Err(JobStateError::TemplateMismatch {
                job_id: job.id,
                template_id: self.id,
            });
        }

        Ok(ExecutionRecord {
            job_id: job.id,
            executed_at: Utc::now(),
            outcome,
            duration,
        })
    }

    pub fn push_record(&mut self, record: ExecutionRecord) {
        self.updated_at = record.executed_at;
        self.execution_history.push(record);
    }

    /// Take over the history of another copy of this template
    pub fn adopt_history(&mut self, stored: &WorkflowTemplate) {
        self.execution_history = stored.execution_history.clone();
        self.updated_at = stored.updated_at;
    }

    /// Fresh editable copy owned by `owner`, with no history
    pub fn clone_as(&self, new_name: impl Into<String>, owner: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            name: new_name.into(),
            is_template: false,
            execution_history: Vec::new(),
            created_at: now,
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.updated_at = Utc::now();
    }

    /// Count and mean duration per recorded outcome
    pub fn execution_stats(&self) -> BTreeMap<ExecutionOutcome, OutcomeStats> {
        let mut grouped: HashMap<ExecutionOutcome, Vec<Duration>> = HashMap::new();
        for record in &self.execution_history {
            grouped.entry(record.outcome).or_default().push(record.duration);
        }

        grouped
            .into_iter()
            .map(|(outcome, durations)| {
                let count = durations.len();
                let total: Duration = durations.into_iter().sum();
                let stats = OutcomeStats {
                    count,
                    mean_duration: total / count as i32,
                };
                (outcome, stats)
            })
            .collect()
    }
}

/// Resolved runtime parameters for one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeParams {
    /// Job-specific working directory for the engine
    pub work_dir: PathBuf,
    /// Directory the pipeline publishes results into
    pub output_dir: PathBuf,
    pub input_files: Vec<PathBuf>,
    /// Engine profile to activate (`-profile`)
    #[serde(default)]
    pub profile: Option<String>,
    /// Resume from cached engine state (`-resume`)
    #[serde(default)]
    pub resume: bool,
    /// Free-form overrides passed as `--key value`
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl RuntimeParams {
    pub fn new(work_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            output_dir: output_dir.into(),
            input_files: Vec::new(),
            profile: None,
            resume: false,
            parameters: BTreeMap::new(),
        }
    }

    /// Runtime parameters seeded from a job's inputs and parameters
    pub fn for_job(
        job: &AnalysisJob,
        work_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            input_files: job.input_files.clone(),
            parameters: job.parameters.clone(),
            ..Self::new(work_dir, output_dir)
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<PathBuf>) -> Self {
        self.input_files = inputs;
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_kind_round_trips_names() {
        let kind: AnalysisKind = "single-cell-rna-seq".parse().unwrap();
        assert_eq!(kind, AnalysisKind::SingleCellRnaSeq);
        assert!(kind.is_supported());

        let unknown: AnalysisKind = serde_json::from_str("\"methylation\"").unwrap();
        assert_eq!(unknown, AnalysisKind::Unrecognized("methylation".to_string()));
        assert!(!unknown.is_supported());
        assert_eq!(serde_json::to_string(&unknown).unwrap(), "\"methylation\"");
    }

    #[test]
    fn test_identifier_format() {
        let template = WorkflowTemplate::new("standard", AnalysisKind::RnaSeq, "admin");
        assert_eq!(template.identifier(), "rna-seq_1.0.0_standard");
    }

    #[test]
    fn test_record_execution_rejects_foreign_job() {
        let mut template = WorkflowTemplate::new("standard", AnalysisKind::RnaSeq, "admin");
        let foreign = AnalysisJob::new(Uuid::new_v4(), "other", vec![]);

        let result = template.record_execution(
            &foreign,
            ExecutionOutcome::Success,
            Duration::seconds(1),
        );

        assert!(matches!(result, Err(JobStateError::TemplateMismatch { .. })));
        assert!(template.execution_history().is_empty());
    }

    #[test]
    fn test_clone_resets_history_and_identity() {
        let mut template = WorkflowTemplate::new("standard", AnalysisKind::GenomeSeq, "admin");
        template.is_template = true;
        let job = AnalysisJob::new(template.id, "run", vec![]);
        template
            .record_execution(&job, ExecutionOutcome::Failed, Duration::seconds(3))
            .unwrap();

        let cloned = template.clone_as("my copy", "alice");

        assert_ne!(cloned.id, template.id);
        assert_eq!(cloned.name, "my copy");
        assert_eq!(cloned.owner, "alice");
        assert!(!cloned.is_template);
        assert!(cloned.execution_history().is_empty());
        assert_eq!(cloned.kind, AnalysisKind::GenomeSeq);
    }

    #[test]
    fn test_execution_stats_grouped_by_outcome() {
        let mut template = WorkflowTemplate::new("standard", AnalysisKind::RnaSeq, "admin");
        for (outcome, secs) in [
            (ExecutionOutcome::Success, 10),
            (ExecutionOutcome::Success, 20),
            (ExecutionOutcome::Failed, 4),
        ] {
            let job = AnalysisJob::new(template.id, "run", vec![]);
            template
                .record_execution(&job, outcome, Duration::seconds(secs))
                .unwrap();
        }

        let stats = template.execution_stats();
        assert_eq!(stats[&ExecutionOutcome::Success].count, 2);
        assert_eq!(stats[&ExecutionOutcome::Success].mean_duration, Duration::seconds(15));
        assert_eq!(stats[&ExecutionOutcome::Failed].count, 1);
        assert!(!stats.contains_key(&ExecutionOutcome::Cancelled));
    }

    #[test]
    fn test_container_image_fallback() {
        let images = ContainerImages::default().with_image("star", "custom/star:1.0");
        assert_eq!(images.image("star"), "custom/star:1.0");
        assert_eq!(images.image("gatk"), "broadinstitute/gatk:4.2.6.1");
        assert_eq!(images.image("unknown-tool"), "");
    }

    #[test]
    fn test_memory_amount_parsing() {
        let resources = ResourceRequest {
            memory: "32.GB".to_string(),
            ..Default::default()
        };
        assert_eq!(resources.memory_amount(), Some(32));
    }

    #[test]
    fn test_template_yaml_defaults() {
        let yaml = r#"
id: "7f6c2f0e-8a55-4a44-9c51-0c6b0f1f4e11"
owner: "admin"
name: "minimal"
kind: "genome-seq"
created_at: "2024-01-01T00:00:00Z"
updated_at: "2024-01-01T00:00:00Z"
"#;
        let template: WorkflowTemplate = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(template.version, "1.0.0");
        assert!(template.is_active);
        assert_eq!(template.resources.cpu, 4);
        assert_eq!(template.parameters.qc.min_length, 20);
    }
}
