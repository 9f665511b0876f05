//! Corpus ingestion: parallel per-song analysis, ordered registry merges

use crate::config::{validate_config, Config};
use crate::error::{MineError, Result as MineResult};
use crate::miner::{PatternMiner, PatternRegistry};
use crate::pattern::PatternUpsert;
use crate::song::Song;
use crate::state::SongAnalysis;
use crate::SongPipeline;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// One song merged into the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongMiningResult {
    pub song_id: String,
    pub analysis: SongAnalysis,
    /// Pattern and instance per chunk, ready for storage
    pub upserts: Vec<PatternUpsert>,
}

/// A song that was left out of the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongFailure {
    pub song_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusMiningResult {
    pub songs: Vec<SongMiningResult>,
    pub failures: Vec<SongFailure>,
    pub registry: PatternRegistry,
}

/// Analyze every song and mine its patterns.
///
/// Songs are analyzed concurrently on the blocking pool and merged in input
/// order, so pattern ids and canonical representatives depend only on the
/// order of `songs`. A song that fails is reported in `failures` and leaves
/// the registry untouched.
pub async fn mine_corpus(songs: Vec<Song>, config: Config) -> MineResult<CorpusMiningResult> {
    validate_config(&config).map_err(|e| MineError::ConfigValidationFailed(e.to_string()))?;

    info!("Mining {} songs", songs.len());
    let pipeline = Arc::new(SongPipeline::new(config));

    let tasks: Vec<_> = songs
        .into_iter()
        .map(|song| {
            let song_id = song.id.clone();
            let pipeline = Arc::clone(&pipeline);
            let task = tokio::task::spawn_blocking(move || pipeline.analyze(song));
            (song_id, task)
        })
        .collect();

    let miner = PatternMiner::spawn();
    let handle = miner.handle();

    let mut results = Vec::with_capacity(tasks.len());
    let mut failures = Vec::new();

    for (song_id, task) in tasks {
        let analysis = match task.await {
            Ok(Ok(analysis)) => analysis,
            Ok(Err(err)) => {
                warn!("Song {} failed analysis: {}", song_id, err);
                failures.push(SongFailure {
                    song_id,
                    error: err.to_string(),
                });
                continue;
            }
            Err(join_err) => {
                let err = MineError::ProcessingPipelineError(join_err.to_string());
                warn!("Song {} analysis task failed: {}", song_id, err);
                failures.push(SongFailure {
                    song_id,
                    error: err.to_string(),
                });
                continue;
            }
        };

        match handle.submit_analysis(&analysis).await {
            Ok(upserts) => results.push(SongMiningResult {
                song_id,
                analysis,
                upserts,
            }),
            Err(err @ MineError::RegistryUnavailable(_)) => return Err(err),
            Err(err) => {
                warn!("Song {} rejected by registry: {}", song_id, err);
                failures.push(SongFailure {
                    song_id,
                    error: err.to_string(),
                });
            }
        }
    }

    drop(handle);
    let registry = miner.shutdown().await?;

    info!(
        "Corpus mined: {} songs merged, {} failed, {} patterns",
        results.len(),
        failures.len(),
        registry.len()
    );

    Ok(CorpusMiningResult {
        songs: results,
        failures,
        registry,
    })
}
