// Workflow template catalog for the omics pipeline orchestrator
//
// This module discovers template definition files, validates them and exposes
// the built-in templates shipped with the orchestrator.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::types::*;

/// Result of template validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    /// Whether the template is valid
    pub is_valid: bool,
    /// Validation errors found
    pub errors: Vec<String>,
    /// Validation warnings
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Create a successful validation result
    pub fn success() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Create a failed validation result with errors
    pub fn with_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: false,
            errors,
            warnings: Vec::new(),
        }
    }

    /// Add a warning to the validation result
    pub fn with_warning(mut self, warning: String) -> Self {
        self.warnings.push(warning);
        self
    }
}

/// Template discovery and lookup
pub struct TemplateCatalog {
    /// Base directory for template definitions
    templates_dir: Option<PathBuf>,
    /// Known templates indexed by ID
    templates: HashMap<TemplateId, WorkflowTemplate>,
    /// File each discovered template was loaded from
    sources: HashMap<TemplateId, PathBuf>,
}

impl TemplateCatalog {
    /// Catalog holding only the built-in templates
    pub fn builtin() -> Self {
        let templates = builtin_templates()
            .into_iter()
            .map(|template| (template.id, template))
            .collect();

        Self {
            templates_dir: None,
            templates,
            sources: HashMap::new(),
        }
    }

    /// Catalog of the built-in templates plus every template file under `templates_dir`
    pub fn new<P: AsRef<Path>>(templates_dir: P) -> Result<Self> {
        let templates_dir = templates_dir.as_ref().to_path_buf();

        if !templates_dir.exists() {
            return Err(anyhow::anyhow!(
                "Templates directory does not exist: {}",
                templates_dir.display()
            ));
        }

        let mut catalog = Self::builtin();
        catalog.templates_dir = Some(templates_dir);
        catalog.discover_templates()?;

        Ok(catalog)
    }

    /// Scan the templates directory for YAML definitions
    pub fn discover_templates(&mut self) -> Result<Vec<TemplateId>> {
        let Some(templates_dir) = self.templates_dir.clone() else {
            return Ok(Vec::new());
        };

        tracing::info!("Discovering templates in {}", templates_dir.display());

        let mut discovered = Vec::new();

        for entry in WalkDir::new(&templates_dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();

            if path.is_file()
                && path
                    .extension()
                    .map_or(false, |ext| ext == "yaml" || ext == "yml")
            {
                match Self::load_template(path) {
                    Ok(template) => {
                        tracing::debug!("Discovered template: {}", template.identifier());
                        discovered.push(template.id);
                        self.sources.insert(template.id, path.to_path_buf());
                        self.templates.insert(template.id, template);
                    },
                    Err(e) => {
                        tracing::error!("Failed to load template from {}: {:?}", path.display(), e);
                    },
                }
            }
        }

        tracing::info!("Discovered {} templates", discovered.len());
        Ok(discovered)
    }

    /// Load and parse a template from a YAML file
    pub fn load_template<P: AsRef<Path>>(path: P) -> Result<WorkflowTemplate> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read template file: {}", path.display()))?;

        let template: WorkflowTemplate = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse template YAML: {}", path.display()))?;

        Ok(template)
    }

    /// Validate a template
    pub fn validate_template(&self, template_id: &TemplateId) -> Result<ValidationResult> {
        let template = self
            .templates
            .get(template_id)
            .ok_or_else(|| anyhow::anyhow!("Template not found: {}", template_id))?;

        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if template.name.trim().is_empty() {
            errors.push("Template name cannot be empty".to_string());
        }

        if template.name.chars().count() > 200 {
            errors.push("Template name cannot exceed 200 characters".to_string());
        }

        if !template.kind.is_supported() {
            errors.push(format!("Unsupported workflow kind: {}", template.kind));
        }

        if template.resources.cpu == 0 {
            errors.push("CPU allocation must be at least 1".to_string());
        }

        if template.resources.memory_amount().is_none() {
            errors.push(format!(
                "Memory request has no amount: {}",
                template.resources.memory
            ));
        }

        if !template.is_active {
            warnings.push("Template is deactivated".to_string());
        }

        if template.description.as_deref().map_or(true, str::is_empty) {
            warnings.push("Template description is empty".to_string());
        }

        let mut result = if errors.is_empty() {
            ValidationResult::success()
        } else {
            ValidationResult::with_errors(errors)
        };
        for warning in warnings {
            result = result.with_warning(warning);
        }

        Ok(result)
    }

    /// Get all known templates
    pub fn get_templates(&self) -> &HashMap<TemplateId, WorkflowTemplate> {
        &self.templates
    }

    /// Get a specific template
    pub fn get_template(&self, template_id: &TemplateId) -> Option<&WorkflowTemplate> {
        self.templates.get(template_id)
    }

    /// File a discovered template was loaded from
    pub fn source_of(&self, template_id: &TemplateId) -> Option<&Path> {
        self.sources.get(template_id).map(PathBuf::as_path)
    }

    /// Active templates flagged as reusable, optionally restricted to one kind
    ///
    /// Sorted newest first.
    pub fn find_templates(&self, kind: Option<&AnalysisKind>) -> Vec<&WorkflowTemplate> {
        let mut found: Vec<_> = self
            .templates
            .values()
            .filter(|t| t.is_template && t.is_active)
            .filter(|t| kind.map_or(true, |k| t.kind == *k))
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found
    }

    /// Active templates of one kind, templates or not
    pub fn find_by_kind(&self, kind: &AnalysisKind) -> Vec<&WorkflowTemplate> {
        let mut found: Vec<_> = self
            .templates
            .values()
            .filter(|t| t.is_active && t.kind == *kind)
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found
    }

    /// Refresh template discovery (re-scan directory)
    pub fn refresh(&mut self) -> Result<Vec<TemplateId>> {
        self.discover_templates()
    }
}

/// Templates shipped with the orchestrator, one per supported kind
pub fn builtin_templates() -> Vec<WorkflowTemplate> {
    let mut rna_seq = WorkflowTemplate::new("RNA-seq Standard Pipeline", AnalysisKind::RnaSeq, "system");
    rna_seq.description = Some(
        "Standard RNA-seq analysis pipeline including quality control, alignment, quantification, and differential expression analysis"
            .to_string(),
    );
    rna_seq.is_template = true;
    rna_seq.parameters.genome.species = Some("Homo sapiens".to_string());
    rna_seq.parameters.rna_seq = Some(RnaSeqParams::default());
    rna_seq.resources = ResourceRequest {
        cpu: 8,
        memory: "32.GB".to_string(),
        time: "24.h".to_string(),
        queue: "normal".to_string(),
    };
    rna_seq.containers = ContainerImages::defaults_for(&["fastqc", "star", "featurecounts", "deseq2"]);

    let mut genome_seq =
        WorkflowTemplate::new("Genome Sequencing Pipeline", AnalysisKind::GenomeSeq, "system");
    genome_seq.description = Some(
        "Complete genome sequencing analysis pipeline with variant calling and filtering".to_string(),
    );
    genome_seq.is_template = true;
    genome_seq.parameters.genome.species = Some("Homo sapiens".to_string());
    genome_seq.parameters.qc.min_length = 30;
    genome_seq.parameters.genome_seq = Some(GenomeSeqParams {
        filter_expression: Some(
            "QD < 2.0 || FS > 60.0 || MQ < 40.0 || MQRankSum < -12.5 || ReadPosRankSum < -8.0"
                .to_string(),
        ),
        ..Default::default()
    });
    genome_seq.resources = ResourceRequest {
        cpu: 16,
        memory: "64.GB".to_string(),
        time: "48.h".to_string(),
        queue: "high".to_string(),
    };
    genome_seq.containers = ContainerImages::defaults_for(&["fastqc", "bwa", "gatk"]);

    let mut single_cell = WorkflowTemplate::new(
        "Single-cell RNA-seq Pipeline",
        AnalysisKind::SingleCellRnaSeq,
        "system",
    );
    single_cell.description = Some(
        "Comprehensive single-cell RNA-seq analysis including Cell Ranger, Seurat clustering, and cell type annotation"
            .to_string(),
    );
    single_cell.is_template = true;
    single_cell.parameters.genome.species = Some("Homo sapiens".to_string());
    single_cell.parameters.qc.trim_adapters = false;
    single_cell.parameters.sc_rna_seq = Some(SingleCellParams::default());
    single_cell.resources = ResourceRequest {
        cpu: 16,
        memory: "128.GB".to_string(),
        time: "72.h".to_string(),
        queue: "high".to_string(),
    };
    single_cell.containers =
        ContainerImages::defaults_for(&["fastqc", "cellranger", "seurat", "singler"]);

    vec![rna_seq, genome_seq, single_cell]
}
