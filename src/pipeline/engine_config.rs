// Nextflow engine configuration (`nextflow.config`)
//
// Carries the template's resource limits, enables reporting under
// `<outdir>/pipeline_info/` and installs a completion handler that writes a
// machine-parsable record the orchestrator can read back after exit.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use super::definition::groovy_single;
use crate::workflow::{ResourceRequest, WorkflowTemplate};

/// Directory (relative to the output directory) holding engine reports
pub const PIPELINE_INFO_DIR: &str = "pipeline_info";

/// File written by the `workflow.onComplete` handler
pub const COMPLETION_FILE: &str = "completion.json";

/// Resource defaults applied per `withLabel:` selector
const PROCESS_LABELS: [(&str, u32, &str); 3] = [
    ("process_low", 2, "4 GB"),
    ("process_medium", 4, "8 GB"),
    ("process_high", 8, "16 GB"),
];

/// Rendered engine configuration for one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub name: String,
    pub description: String,
    pub version: String,
    pub resources: ResourceRequest,
}

impl EngineConfig {
    pub fn for_template(template: &WorkflowTemplate) -> Self {
        Self {
            name: template.name.clone(),
            description: template.description.clone().unwrap_or_default(),
            version: template.version.clone(),
            resources: template.resources.clone(),
        }
    }

    /// CPUs granted to the local executor
    pub fn executor_cpus(&self) -> u32 {
        self.resources.cpu.saturating_mul(2)
    }

    /// Memory in GB granted to the local executor, if the request has an amount
    pub fn executor_memory_gb(&self) -> Option<u64> {
        self.resources.memory_amount().map(|amount| amount.saturating_mul(2))
    }
}

impl fmt::Display for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "// Nextflow configuration")?;
        writeln!(f, "manifest {{")?;
        writeln!(f, "    name = {}", groovy_single(&self.name))?;
        writeln!(f, "    description = {}", groovy_single(&self.description))?;
        writeln!(f, "    version = {}", groovy_single(&self.version))?;
        writeln!(f, "}}")?;
        writeln!(f)?;

        writeln!(f, "// Process configuration")?;
        writeln!(f, "process {{")?;
        writeln!(f, "    cpus = {}", self.resources.cpu)?;
        writeln!(f, "    memory = {}", groovy_single(&self.resources.memory))?;
        writeln!(f, "    time = {}", groovy_single(&self.resources.time))?;
        for (label, cpus, memory) in PROCESS_LABELS {
            writeln!(f)?;
            writeln!(f, "    withLabel: '{}' {{", label)?;
            writeln!(f, "        cpus = {}", cpus)?;
            writeln!(f, "        memory = '{}'", memory)?;
            writeln!(f, "    }}")?;
        }
        writeln!(f, "}}")?;
        writeln!(f)?;

        writeln!(f, "// Docker configuration")?;
        writeln!(f, "docker {{")?;
        writeln!(f, "    enabled = true")?;
        writeln!(f, "    runOptions = '-u $(id -u):$(id -g)'")?;
        writeln!(f, "}}")?;
        writeln!(f)?;

        writeln!(f, "// Resource configuration")?;
        writeln!(f, "executor {{")?;
        writeln!(f, "    name = 'local'")?;
        writeln!(f, "    cpus = {}", self.executor_cpus())?;
        if let Some(memory) = self.executor_memory_gb() {
            writeln!(f, "    memory = '{} GB'", memory)?;
        }
        writeln!(f, "}}")?;

        for (scope, file) in [
            ("timeline", "execution_timeline.html"),
            ("report", "execution_report.html"),
            ("trace", "execution_trace.txt"),
            ("dag", "pipeline_dag.svg"),
        ] {
            writeln!(f)?;
            writeln!(f, "{} {{", scope)?;
            writeln!(f, "    enabled = true")?;
            writeln!(
                f,
                "    file = \"${{params.outdir}}/{}/{}\"",
                PIPELINE_INFO_DIR, file
            )?;
            writeln!(f, "}}")?;
        }

        writeln!(f)?;
        writeln!(f, "// Machine-parsable completion record")?;
        writeln!(f, "workflow.onComplete = {{")?;
        writeln!(f, "    def record = [")?;
        writeln!(f, "        success: workflow.success,")?;
        writeln!(f, "        exit_status: workflow.exitStatus,")?;
        writeln!(f, "        duration_ms: workflow.duration.toMillis(),")?;
        writeln!(f, "        error_message: workflow.errorMessage ?: ''")?;
        writeln!(f, "    ]")?;
        writeln!(
            f,
            "    def info = new File(\"${{params.outdir}}/{}\")",
            PIPELINE_INFO_DIR
        )?;
        writeln!(f, "    info.mkdirs()")?;
        writeln!(
            f,
            "    new File(info, '{}').text = groovy.json.JsonOutput.toJson(record)",
            COMPLETION_FILE
        )?;
        writeln!(f, "}}")
    }
}

/// Record written by the engine's completion handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub success: bool,
    #[serde(default)]
    pub exit_status: Option<i32>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub error_message: String,
}

impl CompletionRecord {
    pub fn path_in(output_dir: &Path) -> PathBuf {
        output_dir.join(PIPELINE_INFO_DIR).join(COMPLETION_FILE)
    }

    /// Read the completion record from an output directory
    ///
    /// `None` when the engine never wrote one or it cannot be parsed.
    pub fn read_from(output_dir: &Path) -> Option<Self> {
        let path = Self::path_in(output_dir);
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("Ignoring malformed completion record {}: {}", path.display(), e);
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::AnalysisKind;
    use tempfile::TempDir;

    fn config() -> EngineConfig {
        let mut template = WorkflowTemplate::new("RNA-seq Standard", AnalysisKind::RnaSeq, "admin");
        template.description = Some("bulk RNA".to_string());
        template.resources = ResourceRequest {
            cpu: 8,
            memory: "32.GB".to_string(),
            time: "24.h".to_string(),
            queue: "normal".to_string(),
        };
        EngineConfig::for_template(&template)
    }

    #[test]
    fn test_executor_doubles_template_resources() {
        let config = config();
        assert_eq!(config.executor_cpus(), 16);
        assert_eq!(config.executor_memory_gb(), Some(64));

        let rendered = config.to_string();
        assert!(rendered.contains("executor {\n    name = 'local'\n    cpus = 16\n    memory = '64 GB'\n}"));
        assert!(rendered.contains("    cpus = 8\n    memory = '32.GB'\n    time = '24.h'\n"));
    }

    #[test]
    fn test_reports_and_completion_handler() {
        let rendered = config().to_string();

        assert!(rendered.contains("name = 'RNA-seq Standard'"));
        assert!(rendered.contains("withLabel: 'process_high' {\n        cpus = 8\n        memory = '16 GB'"));
        assert!(rendered.contains("file = \"${params.outdir}/pipeline_info/execution_trace.txt\""));
        assert!(rendered.contains("file = \"${params.outdir}/pipeline_info/pipeline_dag.svg\""));
        assert!(rendered.contains("workflow.onComplete = {"));
        assert!(rendered.contains("new File(info, 'completion.json')"));
    }

    #[test]
    fn test_memory_without_amount_omits_executor_memory() {
        let mut config = config();
        config.resources.memory = "lots".to_string();

        assert_eq!(config.executor_memory_gb(), None);
        assert!(config.to_string().contains("    cpus = 16\n}\n"));
    }

    #[test]
    fn test_read_completion_record() {
        let temp_dir = TempDir::new().unwrap();
        assert!(CompletionRecord::read_from(temp_dir.path()).is_none());

        let info = temp_dir.path().join(PIPELINE_INFO_DIR);
        fs::create_dir_all(&info).unwrap();
        fs::write(
            info.join(COMPLETION_FILE),
            r#"{"success":true,"exit_status":0,"duration_ms":1520,"error_message":""}"#,
        )
        .unwrap();

        let record = CompletionRecord::read_from(temp_dir.path()).unwrap();
        assert!(record.success);
        assert_eq!(record.exit_status, Some(0));
        assert_eq!(record.duration_ms, Some(1520));
    }
}
