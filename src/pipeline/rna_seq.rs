// Bulk RNA-seq pipeline: FASTQC, STAR_ALIGN -> FEATURECOUNTS -> DESEQ2

use super::definition::{PipelineScript, Stage, WorkflowCall};
use super::{fastqc_stage, joined_inputs, paired_read_channel};
use crate::workflow::{RnaSeqParams, RuntimeParams, WorkflowTemplate};

/// Stage names in declaration order
pub const STAGES: [&str; 4] = ["FASTQC", "STAR_ALIGN", "FEATURECOUNTS", "DESEQ2"];

pub fn render(template: &WorkflowTemplate, runtime: &RuntimeParams) -> PipelineScript {
    let defaults = RnaSeqParams::default();
    let rna = template.parameters.rna_seq.as_ref().unwrap_or(&defaults);
    let containers = &template.containers;

    PipelineScript::new(paired_read_channel())
        .param("reads", &joined_inputs(runtime))
        .param("genome_ref", rna.star_index.as_deref().unwrap_or_default())
        .param("gtf", rna.gtf_file.as_deref().unwrap_or_default())
        .param("outdir", &runtime.output_dir.display().to_string())
        .param("strandedness", rna.strandedness.as_str())
        .stage(fastqc_stage(containers))
        .stage(star_align_stage(containers.image("star")))
        .stage(feature_counts_stage(containers.image("featurecounts"), rna))
        .stage(deseq2_stage(containers.image("deseq2"), rna))
        .call(WorkflowCall::on_reads("FASTQC", "Quality control"))
        .call(WorkflowCall::on_reads("STAR_ALIGN", "Alignment"))
        .call(WorkflowCall::on_stage(
            "FEATURECOUNTS",
            "STAR_ALIGN",
            "bam",
            "Quantification",
        ))
        .call(
            WorkflowCall::on_stage("DESEQ2", "FEATURECOUNTS", "counts", "Differential expression analysis")
                .with_operator("collect()"),
        )
}

fn star_align_stage(container: &str) -> Stage {
    Stage::new("STAR_ALIGN", "STAR Alignment", container, "star")
        .input("tuple val(meta), path(reads)")
        .output("tuple val(meta), path(\"*Aligned.sortedByCoord.out.bam\"), emit: bam")
        .output("path(\"*Log.final.out\"), emit: log")
        .script(
            r#"def strandedness = params.strandedness == 'unstranded' ? '' : '--outFilterIntronMotifs RemoveNoncanonical'
"""
STAR \
    --genomeDir ${params.genome_ref} \
    --readFilesIn $reads \
    --runThreadN $task.cpus \
    --outSAMtype BAM SortedByCoordinate \
    --outFileNamePrefix ${meta.id}. \
    --readFilesCommand zcat \
    $strandedness
""""#,
        )
}

fn feature_counts_stage(container: &str, rna: &RnaSeqParams) -> Stage {
    let script = format!(
        r#""""
featureCounts \
    -T $task.cpus \
    -a ${{params.gtf}} \
    -o ${{meta.id}}.counts.txt \
    -s {strand} \
    -t {feature_type} \
    -g {attribute_type} \
    $bam
""""#,
        strand = rna.strandedness.feature_counts_flag(),
        feature_type = rna.feature_type,
        attribute_type = rna.attribute_type,
    );

    Stage::new("FEATURECOUNTS", "featureCounts", container, "featurecounts")
        .input("tuple val(meta), path(bam)")
        .output("path(\"*.txt\"), emit: counts")
        .output("path(\"*.summary\"), emit: summary")
        .script(script)
}

fn deseq2_stage(container: &str, rna: &RnaSeqParams) -> Stage {
    let deseq2 = &rna.deseq2;
    let design = deseq2.design_formula.as_deref().unwrap_or("~ condition");
    let group = deseq2.contrast_group.as_deref().unwrap_or("condition");

    let script = format!(
        r#""""
#!/usr/bin/env Rscript
library(DESeq2)
library(ggplot2)

count_files <- list.files(".", pattern = ".counts.txt", full.names = TRUE)
sample_names <- gsub(".counts.txt", "", basename(count_files))

count_matrix <- NULL
for (i in seq_along(count_files)) {{
    counts <- read.table(count_files[i], header = TRUE, skip = 1, row.names = 1)
    if (is.null(count_matrix)) {{
        count_matrix <- counts[, 6, drop = FALSE]
    }} else {{
        count_matrix <- cbind(count_matrix, counts[, 6])
    }}
}}
colnames(count_matrix) <- sample_names

sample_data <- data.frame(
    {group} = rep(c("control", "treatment"), length.out = ncol(count_matrix)),
    row.names = colnames(count_matrix)
)

dds <- DESeqDataSetFromMatrix(
    countData = count_matrix,
    colData = sample_data,
    design = {design}
)

dds <- DESeq(dds)
res <- results(dds, contrast = c("{group}", "treatment", "control"))
write.csv(as.data.frame(res), "deseq2_results.csv")

sig <- subset(res, padj < {p_value} & abs(log2FoldChange) > {log_fc})
write.csv(as.data.frame(sig), "deseq2_significant.csv")

pdf("deseq2_plots.pdf")
plotMA(res, main = "MA Plot")
plotCounts(dds, gene = which.min(res\$padj), intgroup = "{group}")
dev.off()
""""#,
        group = group,
        design = design,
        p_value = deseq2.p_value_cutoff,
        log_fc = deseq2.log_fc_cutoff,
    );

    Stage::new("DESEQ2", "DESeq2 Analysis", container, "deseq2")
        .input("path(count_files)")
        .output("path(\"*.csv\")")
        .output("path(\"*.pdf\")")
        .script(script)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::definition::READS_NODE;
    use crate::workflow::{AnalysisKind, Strandedness};
    use std::path::PathBuf;

    fn runtime() -> RuntimeParams {
        RuntimeParams::new("/tmp/work", "/tmp/out").with_inputs(vec![
            PathBuf::from("/data/s1_R1.fastq.gz"),
            PathBuf::from("/data/s2_R1.fastq.gz"),
        ])
    }

    #[test]
    fn test_stage_graph_contract() {
        let template = WorkflowTemplate::new("rna", AnalysisKind::RnaSeq, "admin");
        let script = render(&template, &runtime());

        assert_eq!(script.stage_names(), STAGES.to_vec());
        assert_eq!(
            script.stage_graph(),
            vec![
                (READS_NODE, "FASTQC"),
                (READS_NODE, "STAR_ALIGN"),
                ("STAR_ALIGN", "FEATURECOUNTS"),
                ("FEATURECOUNTS", "DESEQ2"),
            ]
        );
    }

    #[test]
    fn test_runtime_values_substituted() {
        let mut template = WorkflowTemplate::new("rna", AnalysisKind::RnaSeq, "admin");
        template.parameters.rna_seq = Some(RnaSeqParams {
            star_index: Some("/refs/star".to_string()),
            strandedness: Strandedness::Reverse,
            feature_type: "gene".to_string(),
            ..Default::default()
        });

        let script = render(&template, &runtime());

        assert_eq!(
            script.get_param("reads"),
            Some("\"/data/s1_R1.fastq.gz,/data/s2_R1.fastq.gz\"")
        );
        assert_eq!(script.get_param("genome_ref"), Some("\"/refs/star\""));
        assert_eq!(script.get_param("strandedness"), Some("\"reverse\""));
        assert_eq!(script.get_param("outdir"), Some("\"/tmp/out\""));

        let counts = script.get_stage("FEATURECOUNTS").unwrap();
        assert!(counts.script.contains("-s 2 \\"));
        assert!(counts.script.contains("-t gene \\"));
        assert!(counts.script.contains("-a ${params.gtf}"));
        assert_eq!(counts.container, "nfcore/subread:2.0.1");
    }

    #[test]
    fn test_missing_parameter_group_uses_defaults() {
        let template = WorkflowTemplate::new("rna", AnalysisKind::RnaSeq, "admin");
        let rendered = render(&template, &runtime()).to_string();

        assert!(rendered.contains("params.genome_ref = \"\"\n"));
        assert!(rendered.contains("-g gene_id"));
        assert!(rendered.contains("design = ~ condition"));
        assert!(rendered.contains("DESEQ2(FEATURECOUNTS.out.counts.collect())"));
    }
}
