use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use ryoshu_core::{
    BoundingBox, DraftRecord, PixelRegion, Provenance, ReconciledRecord, ScanPass,
};
use ryoshu_reconcile::{MergeStats, ReconcileEngine};

use crate::config::OcrConfig;
use crate::extract::{current_year, normalize_draft};
use crate::gateway::OcrGateway;
use crate::hash;
use crate::response::ResponseItem;
use crate::tiler::{self, Tile, TileError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Image could not be decoded: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Tiling failed: {0}")]
    Tile(#[from] TileError),
}

/// Everything one `analyze` run produced.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    /// SHA-256 hex digest of the submitted image bytes.
    pub image_hash: String,
    pub records: Vec<ReconciledRecord>,
    pub raw_drafts: Vec<DraftRecord>,
    pub merge_log: Vec<String>,
    pub stats: MergeStats,
}

/// Orchestrates: whole-image scan → optional tile scans → normalize → reconcile.
pub struct ReceiptPipeline {
    gateway: Arc<OcrGateway>,
    engine: ReconcileEngine,
    tile_concurrency: usize,
    rescan_margin: f64,
    temp_dir: Option<PathBuf>,
    current_year: i32,
}

impl ReceiptPipeline {
    pub fn new(gateway: OcrGateway, config: &OcrConfig) -> Self {
        Self {
            gateway: Arc::new(gateway),
            engine: ReconcileEngine::default(),
            tile_concurrency: config.tile_concurrency.max(1),
            rescan_margin: config.rescan_margin,
            temp_dir: config.temp_dir.clone(),
            current_year: current_year(),
        }
    }

    /// Fix the reference year used for date scoring.
    pub fn with_current_year(mut self, year: i32) -> Self {
        self.current_year = year;
        self
    }

    /// Scan an image and reconcile every receipt found in it.
    ///
    /// With `detailed`, the five tiles are scanned as well, at most
    /// `tile_concurrency` at a time. Backend failures only shrink the result;
    /// the error path is for images that cannot be decoded or staged.
    pub async fn analyze(&self, image_bytes: &[u8], detailed: bool) -> Result<AnalysisReport, PipelineError> {
        let image_hash = hash::image_digest(image_bytes);
        let img = image::load_from_memory(image_bytes)?;
        let (width, height) = (img.width(), img.height());
        info!(hash = %image_hash, width, height, detailed, "analyzing image");

        // 1. Whole image.
        let reply = self.gateway.analyze(image_bytes).await;
        let mut drafts = self.drafts_from(
            reply.items,
            reply.backend.as_deref(),
            ScanPass::Whole,
            PixelRegion::full(width, height),
            (width, height),
        );
        info!(count = drafts.len(), "whole-image pass done");

        // 2. Tiles.
        if detailed {
            drafts.extend(self.scan_tiles(tiler::split_into_tiles(&img), (width, height)).await);
        }

        // 3. Reconcile.
        let reconciliation = self.engine.reconcile(&drafts);
        let stats = MergeStats::from_records(&reconciliation.records);
        info!(
            raw = stats.raw_count,
            merged = stats.merged_count,
            "analysis complete"
        );

        Ok(AnalysisReport {
            image_hash,
            records: reconciliation.records,
            raw_drafts: drafts,
            merge_log: reconciliation.log,
            stats,
        })
    }

    async fn scan_tiles(&self, tiles: Vec<Tile>, full: (u32, u32)) -> Vec<DraftRecord> {
        let semaphore = Arc::new(Semaphore::new(self.tile_concurrency));
        let collected: Arc<Mutex<Vec<(u8, Vec<DraftRecord>)>>> = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::with_capacity(tiles.len());

        for tile in tiles {
            let semaphore = semaphore.clone();
            let collected = collected.clone();
            let gateway = self.gateway.clone();
            let temp_dir = self.temp_dir.clone();
            let current_year = self.current_year;

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let index = tile.index;
                let staged = match tile.stage(temp_dir.as_deref()) {
                    Ok(f) => f,
                    Err(e) => {
                        warn!(tile = index, error = %e, "could not stage tile");
                        return;
                    }
                };
                let bytes = match tokio::fs::read(staged.path()).await {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(tile = index, error = %e, "could not read staged tile");
                        return;
                    }
                };

                let reply = gateway.analyze(&bytes).await;
                drop(staged);

                let drafts = build_drafts(
                    reply.items,
                    reply.backend.as_deref(),
                    ScanPass::Tile(index),
                    tile.region,
                    full,
                    current_year,
                );
                debug!(tile = index, count = drafts.len(), "tile pass done");
                collected.lock().await.push((index, drafts));
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "tile task aborted");
            }
        }

        let mut per_tile = std::mem::take(&mut *collected.lock().await);
        per_tile.sort_by_key(|(index, _)| *index);
        per_tile.into_iter().flat_map(|(_, drafts)| drafts).collect()
    }

    /// Re-read one region of the image, padded by the configured margin.
    /// Returns the first receipt found there, unmerged.
    pub async fn rescan(
        &self,
        image_bytes: &[u8],
        region: BoundingBox,
    ) -> Result<Option<ReconciledRecord>, PipelineError> {
        let img = image::load_from_memory(image_bytes)?;
        let (width, height) = (img.width(), img.height());
        let crop_region = tiler::expand_region(region, self.rescan_margin, width, height);
        let png = tiler::encode_png(&tiler::crop(&img, crop_region))?;
        info!(?crop_region, "rescanning region");

        let reply = self.gateway.analyze(&png).await;
        let Some(draft) = self
            .drafts_from(reply.items, reply.backend.as_deref(), ScanPass::Rescan, crop_region, (width, height))
            .into_iter()
            .next()
        else {
            info!("rescan found nothing");
            return Ok(None);
        };

        let provenance = vec![Provenance::from(&draft)];
        let segment_id = draft.segment_id.clone();
        Ok(Some(ReconciledRecord::from_draft(
            draft,
            segment_id,
            "Rescan".to_string(),
            provenance,
        )))
    }

    fn drafts_from(
        &self,
        items: Vec<ResponseItem>,
        backend: Option<&str>,
        pass: ScanPass,
        region: PixelRegion,
        full: (u32, u32),
    ) -> Vec<DraftRecord> {
        build_drafts(items, backend, pass, region, full, self.current_year)
    }
}

/// Turn parsed items from one scan into normalized drafts with global boxes.
fn build_drafts(
    items: Vec<ResponseItem>,
    backend: Option<&str>,
    pass: ScanPass,
    region: PixelRegion,
    (width, height): (u32, u32),
    current_year: i32,
) -> Vec<DraftRecord> {
    let backend = backend.unwrap_or("none");
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let mut draft = item.into_draft(backend, format!("{pass}_{i}"), pass);
            draft.global_box = draft.box_2d.map(|b| b.to_global(region, width, height));
            normalize_draft(&mut draft, current_year);
            draft
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
