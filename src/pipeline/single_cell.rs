// Single-cell RNA-seq pipeline
//
// FASTQC runs beside CELLRANGER_COUNT -> SEURAT_ANALYSIS -> SINGLER_ANNOTATION.
// Reads are grouped per 10x sample before counting.

use super::definition::{PipelineScript, Stage, WorkflowCall};
use super::{fastqc_stage, joined_inputs};
use crate::workflow::{RuntimeParams, SeuratParams, SingleCellParams, SingleRParams, WorkflowTemplate};

pub const STAGES: [&str; 4] = [
    "FASTQC",
    "CELLRANGER_COUNT",
    "SEURAT_ANALYSIS",
    "SINGLER_ANNOTATION",
];

const SAMPLE_READ_CHANNEL: &str = r#"Channel.fromPath(params.reads.split(','), checkIfExists: true)
    .map { file ->
        def meta = [id: file.baseName.replaceAll(/_S[0-9]+_L[0-9]+_R[12]_001\.(fastq|fq)(\.gz)?$/, '')]
        return [meta, file]
    }
    .groupTuple()"#;

pub fn render(template: &WorkflowTemplate, runtime: &RuntimeParams) -> PipelineScript {
    let defaults = SingleCellParams::default();
    let sc = template.parameters.sc_rna_seq.as_ref().unwrap_or(&defaults);
    let containers = &template.containers;

    PipelineScript::new(SAMPLE_READ_CHANNEL)
        .param("reads", &joined_inputs(runtime))
        .param("cellranger_ref", sc.cell_ranger_ref.as_deref().unwrap_or_default())
        .raw_param("expected_cells", sc.expected_cells)
        .param("chemistry", &sc.chemistry)
        .param("outdir", &runtime.output_dir.display().to_string())
        .stage(fastqc_stage(containers))
        .stage(cellranger_stage(containers.image("cellranger")))
        .stage(seurat_stage(containers.image("seurat"), &sc.seurat))
        .stage(singler_stage(containers.image("singler"), &sc.single_r))
        .call(WorkflowCall::on_reads("FASTQC", "Quality control"))
        .call(WorkflowCall::on_reads("CELLRANGER_COUNT", "Cell Ranger processing"))
        .call(WorkflowCall::on_stage(
            "SEURAT_ANALYSIS",
            "CELLRANGER_COUNT",
            "matrix",
            "Seurat analysis",
        ))
        .call(WorkflowCall::on_stage(
            "SINGLER_ANNOTATION",
            "SEURAT_ANALYSIS",
            "seurat_obj",
            "Cell type annotation",
        ))
}

fn cellranger_stage(container: &str) -> Stage {
    Stage::new("CELLRANGER_COUNT", "Cell Ranger Count", container, "cellranger")
        .input("tuple val(meta), path(reads)")
        .output("tuple val(meta), path(\"${meta.id}/outs/filtered_feature_bc_matrix\"), emit: matrix")
        .output("path(\"${meta.id}/outs/web_summary.html\"), emit: summary")
        .output("path(\"${meta.id}/outs/metrics_summary.csv\"), emit: metrics")
        .script(
            r#""""
cellranger count \
    --id=${meta.id} \
    --transcriptome=${params.cellranger_ref} \
    --fastqs=. \
    --sample=${meta.id} \
    --chemistry=${params.chemistry} \
    --expect-cells=${params.expected_cells} \
    --localcores=$task.cpus \
    --localmem=${task.memory.toGiga()}
""""#,
        )
}

fn seurat_stage(container: &str, seurat: &SeuratParams) -> Stage {
    let script = format!(
        r#""""
#!/usr/bin/env Rscript
library(Seurat)
library(dplyr)
library(ggplot2)

data <- Read10X(data.dir = "$matrix_dir")
seurat_obj <- CreateSeuratObject(counts = data, project = "${{meta.id}}", min.cells = {min_cells})

seurat_obj[["percent.mt"]] <- PercentageFeatureSet(seurat_obj, pattern = "^MT-")

seurat_obj <- subset(seurat_obj,
    subset = nFeature_RNA > {min_features} &
             nFeature_RNA < {max_features} &
             percent.mt < {mt_cutoff})

seurat_obj <- NormalizeData(seurat_obj)
seurat_obj <- FindVariableFeatures(seurat_obj, selection.method = "vst", nfeatures = 2000)
seurat_obj <- ScaleData(seurat_obj)
seurat_obj <- RunPCA(seurat_obj, features = VariableFeatures(object = seurat_obj))

seurat_obj <- FindNeighbors(seurat_obj, dims = 1:{dims})
seurat_obj <- FindClusters(seurat_obj, resolution = {resolution})
seurat_obj <- RunUMAP(seurat_obj, dims = 1:{dims})

markers <- FindAllMarkers(seurat_obj, only.pos = TRUE, min.pct = 0.25, logfc.threshold = 0.25)

saveRDS(seurat_obj, "${{meta.id}}_seurat.rds")
write.csv(markers, "${{meta.id}}_markers.csv")

pdf("${{meta.id}}_plots.pdf", width = 10, height = 8)
VlnPlot(seurat_obj, features = c("nFeature_RNA", "nCount_RNA", "percent.mt"), ncol = 3)
FeatureScatter(seurat_obj, feature1 = "nCount_RNA", feature2 = "percent.mt")
FeatureScatter(seurat_obj, feature1 = "nCount_RNA", feature2 = "nFeature_RNA")
ElbowPlot(seurat_obj)
DimPlot(seurat_obj, reduction = "pca")
DimPlot(seurat_obj, reduction = "umap", label = TRUE)
dev.off()
""""#,
        min_cells = seurat.min_cells,
        min_features = seurat.min_features,
        max_features = seurat.max_features,
        mt_cutoff = seurat.mt_percent_cutoff,
        dims = seurat.dims,
        resolution = seurat.resolution,
    );

    Stage::new("SEURAT_ANALYSIS", "Seurat Analysis", container, "seurat")
        .input("tuple val(meta), path(matrix_dir)")
        .output("path(\"*.rds\"), emit: seurat_obj")
        .output("path(\"*.pdf\"), emit: plots")
        .output("path(\"*.csv\"), emit: markers")
        .script(script)
}

fn singler_stage(container: &str, single_r: &SingleRParams) -> Stage {
    let script = format!(
        r#""""
#!/usr/bin/env Rscript
library(SingleR)
library(celldex)
library(Seurat)
library(ggplot2)

seurat_obj <- readRDS("$seurat_rds")
ref_data <- celldex::{dataset}()
expr_matrix <- GetAssayData(seurat_obj, assay = "RNA", slot = "data")

predictions <- SingleR(test = expr_matrix,
                      ref = ref_data,
                      labels = ref_data\${label})

seurat_obj\$singler_labels <- predictions\$labels
write.csv(predictions, "cell_type_annotations.csv")

pdf("singler_plots.pdf", width = 10, height = 8)
DimPlot(seurat_obj, group.by = "singler_labels", label = TRUE, label.size = 3) + NoLegend()
plotScoreHeatmap(predictions)
dev.off()
""""#,
        dataset = single_r.reference_dataset,
        label = single_r.label_column,
    );

    Stage::new("SINGLER_ANNOTATION", "SingleR Cell Type Annotation", container, "singler")
        .input("path(seurat_rds)")
        .output("path(\"*.csv\"), emit: annotations")
        .output("path(\"*.pdf\"), emit: plots")
        .script(script)
}
