// Structured Nextflow DSL2 pipeline scripts
//
// A script is assembled from parameters, one input channel, a list of stages
// and the workflow calls wiring them together. The structure can be inspected
// (stage names, stage graph) without the engine; `Display` renders `main.nf`.

use std::fmt;

/// Node name used for the read channel in the stage graph
pub const READS_NODE: &str = "reads";

/// Quote a value as a Groovy double-quoted string literal
pub fn groovy_string(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('$', "\\$");
    format!("\"{}\"", escaped)
}

/// Quote a value as a Groovy single-quoted string literal
pub fn groovy_single(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

/// One `process` block of the script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// Process name, e.g. `STAR_ALIGN`
    pub name: String,
    /// Human readable title used in the leading comment
    pub title: String,
    pub container: String,
    /// Subdirectory of `params.outdir` results are copied into
    pub publish_subdir: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// Body of the `script:` section, unindented
    pub script: String,
}

impl Stage {
    pub fn new(name: &str, title: &str, container: &str, publish_subdir: &str) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            container: container.to_string(),
            publish_subdir: publish_subdir.to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            script: String::new(),
        }
    }

    pub fn input(mut self, declaration: &str) -> Self {
        self.inputs.push(declaration.to_string());
        self
    }

    pub fn output(mut self, declaration: &str) -> Self {
        self.outputs.push(declaration.to_string());
        self
    }

    pub fn script(mut self, body: impl Into<String>) -> Self {
        self.script = body.into();
        self
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "// Process: {}", self.title)?;
        writeln!(f, "process {} {{", self.name)?;
        writeln!(f, "    container {}", groovy_single(&self.container))?;
        writeln!(
            f,
            "    publishDir \"${{params.outdir}}/{}\", mode: 'copy'",
            self.publish_subdir
        )?;
        writeln!(f)?;
        writeln!(f, "    input:")?;
        for input in &self.inputs {
            writeln!(f, "    {}", input)?;
        }
        writeln!(f)?;
        writeln!(f, "    output:")?;
        for output in &self.outputs {
            writeln!(f, "    {}", output)?;
        }
        writeln!(f)?;
        writeln!(f, "    script:")?;
        for line in self.script.lines() {
            if line.is_empty() {
                writeln!(f)?;
            } else {
                writeln!(f, "    {}", line)?;
            }
        }
        writeln!(f, "}}")
    }
}

/// Where a workflow call takes its input from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallSource {
    /// The read channel (`ch_reads`)
    Reads,
    /// An emitted channel of an upstream stage, e.g. `STAR_ALIGN.out.bam`
    Stage {
        stage: String,
        channel: String,
        /// Trailing operator applied to the channel, e.g. `collect()`
        operator: Option<String>,
    },
}

/// Invocation of a stage inside the `workflow { }` block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowCall {
    pub stage: String,
    pub source: CallSource,
    pub comment: String,
}

impl WorkflowCall {
    pub fn on_reads(stage: &str, comment: &str) -> Self {
        Self {
            stage: stage.to_string(),
            source: CallSource::Reads,
            comment: comment.to_string(),
        }
    }

    pub fn on_stage(stage: &str, upstream: &str, channel: &str, comment: &str) -> Self {
        Self {
            stage: stage.to_string(),
            source: CallSource::Stage {
                stage: upstream.to_string(),
                channel: channel.to_string(),
                operator: None,
            },
            comment: comment.to_string(),
        }
    }

    /// Apply an operator such as `collect()` to an upstream channel
    pub fn with_operator(mut self, operator: &str) -> Self {
        if let CallSource::Stage { operator: op, .. } = &mut self.source {
            *op = Some(operator.to_string());
        }
        self
    }

    /// Upstream node of this call in the stage graph
    pub fn upstream(&self) -> &str {
        match &self.source {
            CallSource::Reads => READS_NODE,
            CallSource::Stage { stage, .. } => stage,
        }
    }

    fn argument(&self) -> String {
        match &self.source {
            CallSource::Reads => "ch_reads".to_string(),
            CallSource::Stage {
                stage,
                channel,
                operator: None,
            } => format!("{}.out.{}", stage, channel),
            CallSource::Stage {
                stage,
                channel,
                operator: Some(op),
            } => format!("{}.out.{}.{}", stage, channel, op),
        }
    }
}

/// A complete, self-contained `main.nf`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineScript {
    /// `params.<name> = <groovy literal>` assignments, in order
    pub params: Vec<(String, String)>,
    /// Expression building `ch_reads`
    pub read_channel: String,
    pub stages: Vec<Stage>,
    pub calls: Vec<WorkflowCall>,
}

impl PipelineScript {
    pub fn new(read_channel: impl Into<String>) -> Self {
        Self {
            params: Vec::new(),
            read_channel: read_channel.into(),
            stages: Vec::new(),
            calls: Vec::new(),
        }
    }

    /// Add a string parameter, quoted as a Groovy literal
    pub fn param(mut self, name: &str, value: &str) -> Self {
        self.params.push((name.to_string(), groovy_string(value)));
        self
    }

    /// Add a parameter whose value is already a Groovy literal
    pub fn raw_param(mut self, name: &str, literal: impl ToString) -> Self {
        self.params.push((name.to_string(), literal.to_string()));
        self
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn call(mut self, call: WorkflowCall) -> Self {
        self.calls.push(call);
        self
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn get_stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn get_param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Edges `(upstream, stage)` in workflow call order
    ///
    /// Stages fed by the read channel have [`READS_NODE`] as upstream.
    pub fn stage_graph(&self) -> Vec<(&str, &str)> {
        self.calls
            .iter()
            .map(|call| (call.upstream(), call.stage.as_str()))
            .collect()
    }
}

impl fmt::Display for PipelineScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "#!/usr/bin/env nextflow")?;
        writeln!(f)?;
        writeln!(f, "nextflow.enable.dsl=2")?;
        writeln!(f)?;
        writeln!(f, "// Parameters")?;
        for (name, value) in &self.params {
            writeln!(f, "params.{} = {}", name, value)?;
        }
        writeln!(f)?;
        writeln!(f, "// Input channels")?;
        writeln!(f, "ch_reads = {}", self.read_channel)?;

        for stage in &self.stages {
            writeln!(f)?;
            write!(f, "{}", stage)?;
        }

        writeln!(f)?;
        writeln!(f, "// Workflow")?;
        writeln!(f, "workflow {{")?;
        for (i, call) in self.calls.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "    // {}", call.comment)?;
            writeln!(f, "    {}({})", call.stage, call.argument())?;
        }
        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_stage_script() -> PipelineScript {
        PipelineScript::new("Channel.fromPath(params.reads.split(','))")
            .param("reads", "a.fq,b.fq")
            .raw_param("expected_cells", 3000)
            .stage(
                Stage::new("FIRST", "First", "img/first:1", "first")
                    .input("path(reads)")
                    .output("path(\"*.txt\"), emit: txt")
                    .script("\"\"\"\ntouch out.txt\n\"\"\""),
            )
            .stage(Stage::new("SECOND", "Second", "img/second:1", "second").input("path(txt)"))
            .call(WorkflowCall::on_reads("FIRST", "first"))
            .call(WorkflowCall::on_stage("SECOND", "FIRST", "txt", "second").with_operator("collect()"))
    }

    #[test]
    fn test_groovy_quoting_escapes_interpolation() {
        assert_eq!(groovy_string("a\"b"), "\"a\\\"b\"");
        assert_eq!(groovy_string("${evil}"), "\"\\${evil}\"");
        assert_eq!(groovy_single("it's"), "'it\\'s'");
    }

    #[test]
    fn test_stage_graph_follows_calls() {
        let script = two_stage_script();
        assert_eq!(script.stage_names(), vec!["FIRST", "SECOND"]);
        assert_eq!(
            script.stage_graph(),
            vec![(READS_NODE, "FIRST"), ("FIRST", "SECOND")]
        );
    }

    #[test]
    fn test_rendered_script_layout() {
        let rendered = two_stage_script().to_string();

        assert!(rendered.starts_with("#!/usr/bin/env nextflow\n\nnextflow.enable.dsl=2\n"));
        assert!(rendered.contains("params.reads = \"a.fq,b.fq\"\n"));
        assert!(rendered.contains("params.expected_cells = 3000\n"));
        assert!(rendered.contains("process FIRST {\n    container 'img/first:1'\n"));
        assert!(rendered.contains("    publishDir \"${params.outdir}/first\", mode: 'copy'\n"));
        assert!(rendered.contains("    \"\"\"\n    touch out.txt\n    \"\"\"\n}"));
        assert!(rendered.contains("    FIRST(ch_reads)\n"));
        assert!(rendered.contains("    SECOND(FIRST.out.txt.collect())\n"));
        assert!(rendered.trim_end().ends_with('}'));
    }
}
