// Whole genome sequencing pipeline
//
// FASTQC runs beside the variant calling chain
// BWA_ALIGN -> MARK_DUPLICATES -> BQSR -> HAPLOTYPE_CALLER -> VARIANT_FILTER.

use super::definition::{groovy_string, PipelineScript, Stage, WorkflowCall};
use super::{fastqc_stage, joined_inputs, paired_read_channel};
use crate::workflow::{GenomeSeqParams, RuntimeParams, WorkflowTemplate};

pub const STAGES: [&str; 6] = [
    "FASTQC",
    "BWA_ALIGN",
    "MARK_DUPLICATES",
    "BQSR",
    "HAPLOTYPE_CALLER",
    "VARIANT_FILTER",
];

pub fn render(template: &WorkflowTemplate, runtime: &RuntimeParams) -> PipelineScript {
    let defaults = GenomeSeqParams::default();
    let genome = template.parameters.genome_seq.as_ref().unwrap_or(&defaults);
    let gatk = template.containers.image("gatk");

    PipelineScript::new(paired_read_channel())
        .param("reads", &joined_inputs(runtime))
        .param("genome_ref", genome.bwa_index.as_deref().unwrap_or_default())
        .param("gatk_bundle", genome.gatk_bundle.as_deref().unwrap_or_default())
        .param("known_sites", &genome.known_sites.join(","))
        .param("outdir", &runtime.output_dir.display().to_string())
        .stage(fastqc_stage(&template.containers))
        .stage(bwa_align_stage(template.containers.image("bwa")))
        .stage(mark_duplicates_stage(gatk))
        .stage(bqsr_stage(gatk))
        .stage(haplotype_caller_stage(gatk, genome.ploidy))
        .stage(variant_filter_stage(gatk, genome))
        .call(WorkflowCall::on_reads("FASTQC", "Quality control"))
        .call(WorkflowCall::on_reads("BWA_ALIGN", "Alignment"))
        .call(WorkflowCall::on_stage(
            "MARK_DUPLICATES",
            "BWA_ALIGN",
            "bam",
            "Mark duplicates",
        ))
        .call(WorkflowCall::on_stage(
            "BQSR",
            "MARK_DUPLICATES",
            "bam",
            "Base quality recalibration",
        ))
        .call(WorkflowCall::on_stage(
            "HAPLOTYPE_CALLER",
            "BQSR",
            "bam",
            "Variant calling",
        ))
        .call(WorkflowCall::on_stage(
            "VARIANT_FILTER",
            "HAPLOTYPE_CALLER",
            "vcf",
            "Variant filtering",
        ))
}

fn bwa_align_stage(container: &str) -> Stage {
    Stage::new("BWA_ALIGN", "BWA Alignment", container, "bwa")
        .input("tuple val(meta), path(reads)")
        .output("tuple val(meta), path(\"*.bam\"), emit: bam")
        .script(
            r#""""
bwa mem -t $task.cpus ${params.genome_ref} $reads | \
samtools sort -@ $task.cpus -o ${meta.id}.sorted.bam -
samtools index ${meta.id}.sorted.bam
""""#,
        )
}

fn mark_duplicates_stage(container: &str) -> Stage {
    Stage::new("MARK_DUPLICATES", "Mark Duplicates", container, "marked_duplicates")
        .input("tuple val(meta), path(bam)")
        .output("tuple val(meta), path(\"*.marked.bam\"), emit: bam")
        .output("path(\"*.metrics.txt\"), emit: metrics")
        .script(
            r#""""
gatk MarkDuplicates \
    -I $bam \
    -O ${meta.id}.marked.bam \
    -M ${meta.id}.metrics.txt \
    --CREATE_INDEX true
""""#,
        )
}

fn bqsr_stage(container: &str) -> Stage {
    Stage::new("BQSR", "Base Quality Score Recalibration", container, "bqsr")
        .input("tuple val(meta), path(bam)")
        .output("tuple val(meta), path(\"*.recal.bam\"), emit: bam")
        .output("path(\"*.recal_data.table\"), emit: table")
        .script(
            r#"def known_sites_args = params.known_sites ?
    params.known_sites.split(',').collect { "--known-sites $it" }.join(' ') : ''
"""
gatk BaseRecalibrator \
    -I $bam \
    -R ${params.genome_ref} \
    $known_sites_args \
    -O ${meta.id}.recal_data.table

gatk ApplyBQSR \
    -I $bam \
    -R ${params.genome_ref} \
    --bqsr-recal-file ${meta.id}.recal_data.table \
    -O ${meta.id}.recal.bam
""""#,
        )
}

fn haplotype_caller_stage(container: &str, ploidy: u32) -> Stage {
    let script = format!(
        r#""""
gatk HaplotypeCaller \
    -I $bam \
    -R ${{params.genome_ref}} \
    -O ${{meta.id}}.vcf.gz \
    -ploidy {ploidy}
""""#,
        ploidy = ploidy,
    );

    Stage::new("HAPLOTYPE_CALLER", "Variant Calling", container, "variants")
        .input("tuple val(meta), path(bam)")
        .output("tuple val(meta), path(\"*.vcf.gz\"), emit: vcf")
        .script(script)
}

fn variant_filter_stage(container: &str, genome: &GenomeSeqParams) -> Stage {
    let filter = genome
        .filter_expression
        .as_deref()
        .unwrap_or(GenomeSeqParams::DEFAULT_FILTER_EXPRESSION);

    let script = format!(
        r#"def filter_expr = {filter}
"""
gatk VariantFiltration \
    -V $vcf \
    -R ${{params.genome_ref}} \
    --filter-expression "$filter_expr" \
    --filter-name "basic_filter" \
    -O ${{meta.id}}.filtered.vcf.gz
""""#,
        filter = groovy_string(filter),
    );

    Stage::new("VARIANT_FILTER", "Variant Filtering", container, "filtered_variants")
        .input("tuple val(meta), path(vcf)")
        .output("path(\"*.filtered.vcf.gz\")")
        .script(script)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::definition::READS_NODE;
    use crate::workflow::AnalysisKind;
    use std::path::PathBuf;

    fn runtime() -> RuntimeParams {
        RuntimeParams::new("/tmp/work", "/tmp/out")
            .with_inputs(vec![PathBuf::from("/data/NA12878_R1.fastq.gz")])
    }

    #[test]
    fn test_stage_graph_contract() {
        let template = WorkflowTemplate::new("wgs", AnalysisKind::GenomeSeq, "admin");
        let script = render(&template, &runtime());

        assert_eq!(script.stage_names(), STAGES.to_vec());
        assert_eq!(
            script.stage_graph(),
            vec![
                (READS_NODE, "FASTQC"),
                (READS_NODE, "BWA_ALIGN"),
                ("BWA_ALIGN", "MARK_DUPLICATES"),
                ("MARK_DUPLICATES", "BQSR"),
                ("BQSR", "HAPLOTYPE_CALLER"),
                ("HAPLOTYPE_CALLER", "VARIANT_FILTER"),
            ]
        );
    }

    #[test]
    fn test_gatk_stages_share_container_and_defaults() {
        let template = WorkflowTemplate::new("wgs", AnalysisKind::GenomeSeq, "admin");
        let script = render(&template, &runtime());

        for name in ["MARK_DUPLICATES", "BQSR", "HAPLOTYPE_CALLER", "VARIANT_FILTER"] {
            assert_eq!(
                script.get_stage(name).unwrap().container,
                "broadinstitute/gatk:4.2.6.1"
            );
        }
        assert!(script
            .get_stage("HAPLOTYPE_CALLER")
            .unwrap()
            .script
            .contains("-ploidy 2"));
        assert!(script
            .get_stage("VARIANT_FILTER")
            .unwrap()
            .script
            .starts_with("def filter_expr = \"QD < 2.0 || FS > 60.0 || MQ < 40.0\""));
    }

    #[test]
    fn test_known_sites_joined() {
        let mut template = WorkflowTemplate::new("wgs", AnalysisKind::GenomeSeq, "admin");
        template.parameters.genome_seq = Some(GenomeSeqParams {
            known_sites: vec!["dbsnp.vcf.gz".to_string(), "mills.vcf.gz".to_string()],
            ploidy: 1,
            ..Default::default()
        });

        let script = render(&template, &runtime());
        assert_eq!(
            script.get_param("known_sites"),
            Some("\"dbsnp.vcf.gz,mills.vcf.gz\"")
        );
        assert!(script.to_string().contains("-ploidy 1"));
    }
}
